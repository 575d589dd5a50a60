//! Whole runs over a pool of scripted browsers


use hippo_capture::capture::{ImageFormat, ImageSink, LocalOnlyStore};
use hippo_capture::config::ProjectConfig;
use hippo_capture::run::{run_capture, RunOptions, RunReport, ERRORS_FILE, IMAGE_MANIFEST_FILE, PDF_MANIFEST_FILE};
use mock_driver::{MockDriver, MockFactory};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn project(value: serde_json::Value) -> ProjectConfig {
    let config = ProjectConfig::from_json(&value.to_string(), "test.json").unwrap();
    config.validate().unwrap();
    config
}

fn options(threads: usize) -> RunOptions {
    RunOptions {
        mobile: false,
        threads,
        crop_for_pdf: false,
        page_settle: Duration::ZERO,
    }
}

async fn run(config: &ProjectConfig, factory: &Arc<MockFactory>, options: RunOptions) -> (RunReport, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(ImageSink::new(dir.path(), ImageFormat::Png, Arc::new(LocalOnlyStore)));
    let report = run_capture(config, HashMap::new(), factory.clone(), sink, options).await;
    (report, dir)
}

fn filenames(report: &RunReport, page: usize) -> Vec<String> {
    report.manifest.pages[page]
        .images
        .iter()
        .map(|i| i.filename.clone())
        .collect()
}

fn all_calls(factory: &MockFactory) -> Vec<String> {
    factory.created().iter().flat_map(|d| d.calls()).collect()
}

#[tokio::test]
async fn test_pages_without_actions_get_a_plain_capture() {
    let config = project(json!({
        "project": "Acme",
        "base_url": "https://acme.test",
        "site_paths": ["/", "/about", "/contact", "/blog/post.html"],
        "browser": {"headless": false},
        "environments": {"desktop": {}}
    }));
    let factory = Arc::new(MockFactory::new(MockDriver::new()));

    let (report, _dir) = run(&config, &factory, options(3)).await;

    assert!(report.passed, "{:?}", report.errors);
    assert_eq!(report.manifest.pages.len(), 5);
    assert_eq!(filenames(&report, 0), vec!["home_page.png"]);
    assert_eq!(filenames(&report, 1), vec!["about.png"]);
    assert_eq!(filenames(&report, 2), vec!["contact.png"]);
    assert_eq!(filenames(&report, 3), vec!["blog_post.png"]);
    assert_eq!(report.manifest.pages[1].url, "https://acme.test/about");
    assert!(report.manifest.misc().unwrap().images.is_empty());

    let image = &report.manifest.pages[0].images[0];
    assert_eq!((image.width, image.height), (1440, 600));

    let drivers = factory.created();
    assert_eq!(drivers.len(), 3);
    for driver in &drivers {
        let calls = driver.calls();
        assert_eq!(calls.first().map(String::as_str), Some("resize_window:1440x1000"));
        assert_eq!(calls.last().map(String::as_str), Some("quit"));
    }
}

#[tokio::test]
async fn test_never_more_workers_than_pages() {
    let config = project(json!({
        "project": "Acme",
        "base_url": "https://acme.test",
        "site_paths": ["/"],
        "browser": {"headless": false}
    }));
    let factory = Arc::new(MockFactory::new(MockDriver::new()));

    let (report, _dir) = run(&config, &factory, options(8)).await;
    assert!(report.passed);
    assert_eq!(factory.created().len(), 1);
}

#[tokio::test]
async fn test_page_actions_and_misc_bucket() {
    let config = project(json!({
        "project": "Acme",
        "base_url": "https://acme.test",
        "site_paths": ["/", "/about"],
        "browser": {"headless": false},
        "environments": {
            "common": {
                "pages": [{"path": "/about", "actions": [
                    {"action": "capture", "viewport_only": true, "suffix": "top"}
                ]}]
            },
            "desktop": {
                "pages": [{"path": "/about", "actions": [
                    {"action": "capture", "viewport_only": true, "full_name": "banner", "add_to_misc": true}
                ]}]
            }
        }
    }));
    let factory = Arc::new(MockFactory::new(MockDriver::new()));

    let (report, _dir) = run(&config, &factory, options(1)).await;

    assert!(report.passed, "{:?}", report.errors);
    assert_eq!(filenames(&report, 0), vec!["home_page.png"]);
    assert_eq!(filenames(&report, 1), vec!["about_top.png"]);
    let misc = report.manifest.misc().unwrap();
    assert_eq!(misc.images.len(), 1);
    assert_eq!(misc.images[0].filename, "banner.png");
    assert_eq!(report.manifest.image_count(), 3);
}

#[tokio::test]
async fn test_before_screenshot_actions_respect_skipped_paths() {
    let config = project(json!({
        "project": "Acme",
        "base_url": "https://acme.test",
        "site_paths": ["/", "/about", "/contact"],
        "browser": {"headless": false},
        "environments": {
            "common": {
                "before_screenshot": {
                    "actions": [{"action": "click", "css_selector": "#accept"}],
                    "paths_to_skip": ["/contact"]
                }
            }
        }
    }));
    let factory = Arc::new(MockFactory::new(MockDriver::new().with_elements("#accept", 1)));

    let (report, _dir) = run(&config, &factory, options(1)).await;

    assert!(report.passed);
    assert_eq!(
        all_calls(&factory),
        vec![
            "resize_window:1440x1000",
            "load_url:https://acme.test/",
            "click:#accept[0]",
            "screenshot_full_page",
            "load_url:https://acme.test/about",
            "click:#accept[0]",
            "screenshot_full_page",
            "load_url:https://acme.test/contact",
            "screenshot_full_page",
            "quit",
        ]
    );
}

#[tokio::test]
async fn test_before_screenshot_failure_is_reported_and_the_page_still_captured() {
    let config = project(json!({
        "project": "Acme",
        "base_url": "https://acme.test",
        "site_paths": ["/"],
        "browser": {"headless": false},
        "environments": {
            "desktop": {
                "before_screenshot": {
                    "actions": [{"action": "for_each", "css_selector": ".missing", "actions": [{"action": "refresh"}]}]
                }
            }
        }
    }));
    let factory = Arc::new(MockFactory::new(MockDriver::new()));

    let (report, _dir) = run(&config, &factory, options(1)).await;

    assert!(!report.passed);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("Unable to perform the before screenshot actions on / |"));
    assert!(report.errors[0].contains(".missing"));
    assert_eq!(filenames(&report, 0), vec!["home_page.png"]);
}

#[tokio::test]
async fn test_setup_actions_run_once_per_worker() {
    let config = project(json!({
        "project": "Acme",
        "base_url": "https://acme.test",
        "site_paths": ["/", "/account"],
        "browser": {"headless": false},
        "setup_actions": [
            {"action": "enter_text", "css_selector": "#user", "custom_input": "username"},
            {"action": "click", "css_selector": "#sign-in"}
        ],
        "custom_inputs": {"username": "qa@acme.test"}
    }));
    let template = MockDriver::new().with_elements("#user", 1).with_elements("#sign-in", 1);
    let factory = Arc::new(MockFactory::new(template));

    let (report, _dir) = run(&config, &factory, options(1)).await;

    assert!(report.passed, "{:?}", report.errors);
    let calls = factory.created()[0].calls();
    assert_eq!(
        &calls[..4],
        &[
            "resize_window:1440x1000",
            "load_url:https://acme.test",
            "clear_and_fill:#user[0]=qa@acme.test",
            "click:#sign-in[0]",
        ]
    );
    assert_eq!(calls.iter().filter(|c| c.starts_with("click:")).count(), 1);
}

#[tokio::test]
async fn test_factory_failure_fails_the_run() {
    let config = project(json!({
        "project": "Acme",
        "base_url": "https://acme.test",
        "site_paths": ["/", "/about"]
    }));
    let factory = Arc::new(MockFactory::failing());

    let (report, _dir) = run(&config, &factory, options(2)).await;

    assert!(!report.passed);
    assert!(report.errors[0].contains("Could not create the browser"));
    assert_eq!(report.manifest.pages.len(), 3);
    assert_eq!(report.manifest.image_count(), 0);
}

#[tokio::test]
async fn test_page_failures_are_recorded_and_the_run_continues() {
    let config = project(json!({
        "project": "Acme",
        "base_url": "https://acme.test",
        "site_paths": ["/", "/broken", "/gallery", "/about"],
        "browser": {"headless": false},
        "environments": {
            "desktop": {
                "pages": [{"path": "/gallery", "actions": [
                    {"action": "for_each", "css_selector": ".photo", "actions": [{"action": "capture"}]}
                ]}]
            }
        }
    }));
    let template = MockDriver::new().with_failing_url("https://acme.test/broken");
    let factory = Arc::new(MockFactory::new(template));

    let (report, _dir) = run(&config, &factory, options(1)).await;

    assert!(!report.passed);
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors.iter().any(|e| e.contains("could not load the page at https://acme.test/broken")));
    assert!(report
        .errors
        .iter()
        .any(|e| e.starts_with("Error while capturing the page at https://acme.test/gallery") && e.contains(".photo")));

    assert_eq!(filenames(&report, 0), vec!["home_page.png"]);
    assert!(filenames(&report, 1).is_empty());
    assert!(filenames(&report, 2).is_empty());
    assert_eq!(filenames(&report, 3), vec!["about.png"]);
}

#[tokio::test]
async fn test_mobile_run_uses_mobile_environment() {
    let config = project(json!({
        "project": "Acme",
        "base_url": "https://acme.test",
        "site_paths": ["/"],
        "browser": {"headless": false},
        "environments": {
            "desktop": {"pages": [{"path": "/", "actions": [{"action": "capture", "suffix": "desktop"}]}]},
            "mobile": {"pages": [{"path": "/", "actions": [{"action": "capture", "suffix": "mobile"}]}]}
        }
    }));
    let factory = Arc::new(MockFactory::new(MockDriver::new()));

    let (report, _dir) = run(
        &config,
        &factory,
        RunOptions {
            mobile: true,
            ..options(1)
        },
    )
    .await;

    assert!(report.passed);
    assert_eq!(filenames(&report, 0), vec!["home_page_mobile.png"]);
    assert_eq!(factory.created()[0].calls()[0], "resize_window:320x1000");
}

#[tokio::test]
async fn test_report_files() {
    let config = project(json!({
        "project": "Acme",
        "base_url": "https://acme.test",
        "site_paths": ["/"],
        "browser": {"headless": false}
    }));
    let factory = Arc::new(MockFactory::new(MockDriver::new()));

    let (report, dir) = run(
        &config,
        &factory,
        RunOptions {
            crop_for_pdf: true,
            ..options(1)
        },
    )
    .await;

    assert!(report.passed);
    // nothing is tall enough to crop
    assert_eq!(report.pdf_manifest.as_ref(), Some(&report.manifest));

    let out = dir.path().join("report");
    report.write_to(&out).await.unwrap();
    assert!(out.join(IMAGE_MANIFEST_FILE).exists());
    assert!(out.join(PDF_MANIFEST_FILE).exists());

    let errors: Vec<String> =
        serde_json::from_str(&std::fs::read_to_string(out.join(ERRORS_FILE)).unwrap()).unwrap();
    assert!(errors.is_empty());

    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join(IMAGE_MANIFEST_FILE)).unwrap()).unwrap();
    assert_eq!(manifest["pages"][0]["image_data"][0]["filename"], "home_page.png");
    assert_eq!(manifest["pages"][1]["path"], "Miscellaneous Images");
}

//! Action dispatch against a scripted browser


use hippo_capture::actions::{Action, ActionContext, ActionInterpreter, InterpreterSettings, ReferenceTables};
use hippo_capture::capture::{CaptureSettings, CapturedImage, ImageFormat, ImageSink, LocalOnlyStore, PageImageSet, Screenshot};
use hippo_capture::error::{ActionDispatchError, DispatchResult, ErrorLog};
use mock_driver::MockDriver;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    driver: MockDriver,
    sink: ImageSink,
    settings: InterpreterSettings,
    capture: CaptureSettings,
    errors: ErrorLog,
    _dir: TempDir,
}

struct Outcome {
    result: DispatchResult<()>,
    page: PageImageSet,
    misc: Vec<CapturedImage>,
}

impl Outcome {
    fn filenames(&self) -> Vec<String> {
        self.page.images.iter().map(|i| i.filename.clone()).collect()
    }
}

impl Harness {
    fn new(driver: MockDriver) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let sink = ImageSink::new(dir.path(), ImageFormat::Png, Arc::new(LocalOnlyStore));
        let capture = CaptureSettings {
            scroll_settle: Duration::ZERO,
            sticky_settle: Duration::ZERO,
            ..CaptureSettings::default()
        };
        let settings = InterpreterSettings {
            project: "Acme".to_string(),
            ..InterpreterSettings::default()
        };
        Self {
            driver,
            sink,
            settings,
            capture,
            errors: ErrorLog::new(),
            _dir: dir,
        }
    }

    async fn run_with(&self, actions: &[Action], ctx: &mut ActionContext, path: &str) -> Outcome {
        let page = PageImageSet::new(format!("https://example.com{}", path), path);
        let screenshot = Screenshot::new(&self.driver, self.capture.clone());
        let interpreter = ActionInterpreter::new(
            screenshot,
            &self.driver,
            &self.sink,
            &self.settings,
            self.errors.clone(),
            page,
        );
        let result = interpreter.dispatch(actions, ctx).await;
        let (page, misc) = interpreter.into_images();
        Outcome { result, page, misc }
    }

    async fn run(&self, actions: &[Action], path: &str) -> Outcome {
        let mut ctx = ActionContext::default();
        self.run_with(actions, &mut ctx, path).await
    }
}

fn actions(value: serde_json::Value) -> Vec<Action> {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_leaf_actions_run_in_order() {
    let driver = MockDriver::new().with_elements("#name", 1).with_elements("#go", 1);
    let harness = Harness::new(driver.clone());

    let list = actions(json!([
        {"action": "enter_text", "css_selector": "#name", "input": "hello"},
        {"action": "click", "css_selector": "#go"},
        {"action": "hover", "css_selector": "#go"},
        {"action": "send_special_key", "key": "Enter"},
        {"action": "refresh"},
        {"action": "scroll_window_to_position", "position_bottom": true},
        {"action": "focus"}
    ]));
    let outcome = harness.run(&list, "/").await;

    assert!(outcome.result.is_ok());
    assert_eq!(
        driver.calls(),
        vec![
            "clear_and_fill:#name[0]=hello",
            "click:#go[0]",
            "hover:#go[0]",
            "send_special_key:Enter",
            "refresh",
            "scroll_window_to:Bottom",
            "focus_window",
        ]
    );
    assert!(harness.errors.is_empty());
}

#[tokio::test]
async fn test_for_each_binds_each_element() {
    let driver = MockDriver::new().with_elements(".card", 3);
    let harness = Harness::new(driver.clone());

    let list = actions(json!([
        {"action": "for_each", "css_selector": ".card", "actions": [
            {"action": "click", "element": true}
        ]}
    ]));
    let mut ctx = ActionContext::default();
    let outcome = harness.run_with(&list, &mut ctx, "/").await;

    assert!(outcome.result.is_ok());
    assert_eq!(driver.calls(), vec!["click:.card[0]", "click:.card[1]", "click:.card[2]"]);
    // counter resets once the loop finishes
    assert_eq!(ctx.iteration, 0);
    assert!(ctx.element.is_none());
}

#[tokio::test]
async fn test_for_each_counter_flags() {
    let driver = MockDriver::new().with_elements(".card", 3);
    let harness = Harness::new(driver);

    let child = actions(json!([
        {"action": "for_each", "css_selector": ".card", "child": true, "actions": [{"action": "focus"}]}
    ]));
    let mut ctx = ActionContext::default();
    harness.run_with(&child, &mut ctx, "/").await.result.unwrap();
    assert_eq!(ctx.iteration, 3);

    let frozen = actions(json!([
        {"action": "for_each", "css_selector": ".card", "child": true,
         "do_not_increment_element_count": true, "actions": [{"action": "focus"}]}
    ]));
    let mut ctx = ActionContext::default();
    harness.run_with(&frozen, &mut ctx, "/").await.result.unwrap();
    assert_eq!(ctx.iteration, 0);
}

#[tokio::test]
async fn test_captures_inside_for_each_carry_the_iteration() {
    let driver = MockDriver::new().with_elements(".card", 2);
    let harness = Harness::new(driver);

    let list = actions(json!([
        {"action": "for_each", "css_selector": ".card", "actions": [
            {"action": "capture", "suffix": "card"}
        ]}
    ]));
    let outcome = harness.run(&list, "/about").await;

    assert!(outcome.result.is_ok());
    assert_eq!(outcome.filenames(), vec!["about_card_001.png", "about_card_002.png"]);
    assert_eq!(outcome.page.images[0].suffix, "card_001");
    assert_eq!(outcome.page.images[1].suffix, "card_002");
}

#[tokio::test]
async fn test_loop_captures_do_not_collide_with_a_capture_before_the_loop() {
    let driver = MockDriver::new().with_elements(".card", 2);
    let harness = Harness::new(driver);

    let list = actions(json!([
        {"action": "capture", "suffix": "card"},
        {"action": "for_each", "css_selector": ".card", "actions": [
            {"action": "capture", "suffix": "card"}
        ]}
    ]));
    let outcome = harness.run(&list, "/about").await;

    assert!(outcome.result.is_ok());
    assert_eq!(
        outcome.filenames(),
        vec!["about_card.png", "about_card_001.png", "about_card_002.png"]
    );
}

#[tokio::test]
async fn test_sleep_longer_than_a_duration_can_hold_is_an_error() {
    let driver = MockDriver::new().with_elements("#done", 1);
    let harness = Harness::new(driver.clone());

    let list = actions(json!([
        {"action": "sleep", "duration": 1e20},
        {"action": "focus"}
    ]));
    let outcome = harness.run(&list, "/").await;
    assert!(matches!(
        outcome.result,
        Err(ActionDispatchError::InvalidField { field: "duration", .. })
    ));
    assert!(driver.calls().is_empty());

    let list = actions(json!([
        {"action": "wait_for_element", "css_selector": "#done", "duration": 1e20}
    ]));
    let outcome = harness.run(&list, "/").await;
    assert!(matches!(outcome.result, Err(ActionDispatchError::InvalidField { .. })));
}

#[tokio::test]
async fn test_empty_for_each() {
    let driver = MockDriver::new();
    let harness = Harness::new(driver.clone());

    let list = actions(json!([
        {"action": "for_each", "css_selector": ".missing", "actions": [{"action": "refresh"}]},
        {"action": "focus"}
    ]));
    let outcome = harness.run(&list, "/").await;
    assert!(matches!(
        outcome.result,
        Err(ActionDispatchError::EmptyForEach { ref selector }) if selector == ".missing"
    ));
    assert!(driver.calls().is_empty());

    let list = actions(json!([
        {"action": "for_each", "css_selector": ".missing", "allow_empty": true, "actions": [{"action": "refresh"}]},
        {"action": "focus"}
    ]));
    let outcome = harness.run(&list, "/").await;
    assert!(outcome.result.is_ok());
    assert_eq!(driver.calls(), vec!["focus_window"]);
}

#[tokio::test]
async fn test_top_and_bottom_captures() {
    let driver = MockDriver::new()
        .with_url("https://example.com/")
        .with_document_height(2000);
    let harness = Harness::new(driver.clone());

    let list = actions(json!([
        {"action": "load_url", "path": "/about"},
        {"action": "capture", "suffix": "top"},
        {"action": "scroll_window_to_position", "scroll_bottom": true},
        {"action": "capture", "suffix": "bottom"}
    ]));
    let outcome = harness.run(&list, "/about").await;

    assert!(outcome.result.is_ok());
    assert_eq!(outcome.filenames(), vec!["about_top.png", "about_bottom.png"]);
    let suffixes: Vec<&str> = outcome.page.images.iter().map(|i| i.suffix.as_str()).collect();
    assert_eq!(suffixes, vec!["top", "bottom"]);
    assert!(outcome.page.images.iter().all(|i| i.url == "https://example.com/about"));
    assert!(outcome.page.images.iter().all(|i| (i.width, i.height) == (800, 2000)));
    assert!(outcome.page.images[0].local_path.exists());

    let steps: Vec<String> = driver
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("load_url") || c.starts_with("scroll_window_to") || c.starts_with("screenshot"))
        .collect();
    assert_eq!(
        steps,
        vec![
            "load_url:https://example.com/about",
            "screenshot_full_page",
            "scroll_window_to:Bottom",
            "screenshot_full_page",
        ]
    );
}

#[tokio::test]
async fn test_viewport_captures_keep_the_window_size() {
    let driver = MockDriver::new().with_document_height(2000);
    let harness = Harness::new(driver);

    let list = actions(json!([
        {"action": "scroll_window_to_position", "position_top": true},
        {"action": "capture", "viewport_only": true, "suffix": "top"},
        {"action": "scroll_window_to_position", "position_bottom": true},
        {"action": "capture", "viewport_only": true, "suffix": "bottom"}
    ]));
    let outcome = harness.run(&list, "/about").await;

    assert!(outcome.result.is_ok());
    assert_eq!(outcome.filenames(), vec!["about_top.png", "about_bottom.png"]);
    assert!(outcome.page.images.iter().all(|i| (i.width, i.height) == (800, 600)));
}

#[tokio::test]
async fn test_repeated_capture_gets_a_distinct_filename() {
    let harness = Harness::new(MockDriver::new());

    let list = actions(json!([{"action": "capture"}, {"action": "capture"}]));
    let outcome = harness.run(&list, "/").await;

    assert!(outcome.result.is_ok());
    assert_eq!(outcome.filenames(), vec!["home_page.png", "home_page-2.png"]);
    assert_eq!(outcome.page.images[0].suffix, "base_capture");
}

#[tokio::test]
async fn test_full_page_capture_covers_the_document() {
    let harness = Harness::new(MockDriver::new().with_document_height(1800));

    let list = actions(json!([{"action": "capture"}]));
    let outcome = harness.run(&list, "/long").await;

    assert!(outcome.result.is_ok());
    let image = &outcome.page.images[0];
    assert_eq!((image.width, image.height), (800, 1800));
}

#[tokio::test]
async fn test_paginated_capture_with_full_name() {
    let driver = MockDriver::new().with_document_height(1500);
    let mut harness = Harness::new(driver);
    harness.capture.paginated = true;

    let list = actions(json!([{"action": "capture", "full_name": "checkout", "suffix": "step"}]));
    let outcome = harness.run(&list, "/cart").await;

    assert!(outcome.result.is_ok());
    assert_eq!(
        outcome.filenames(),
        vec!["checkout_step_001.png", "checkout_step_002.png", "checkout_step_003.png"]
    );
}

#[tokio::test]
async fn test_capture_named_after_current_url() {
    let driver = MockDriver::new().with_url("https://example.com/thank-you?order=7");
    let harness = Harness::new(driver);

    let list = actions(json!([{"action": "capture", "current_url": true, "viewport_only": true}]));
    let outcome = harness.run(&list, "/checkout").await;

    assert_eq!(outcome.filenames(), vec!["thank-you_order=7.png"]);
}

#[tokio::test]
async fn test_capture_scrolling_element_sequence() {
    let driver = MockDriver::new().with_scrollable(".list", 150);
    let harness = Harness::new(driver.clone());

    let list = actions(json!([
        {"action": "capture_scrolling_element", "css_selector": ".list", "scroll_padding": 20}
    ]));
    let outcome = harness.run(&list, "/").await;

    assert!(outcome.result.is_ok());
    assert_eq!(outcome.filenames(), vec!["home_page_1.png", "home_page_2.png", "home_page_3.png"]);
    assert_eq!(
        driver.calls_to("scroll_element"),
        vec![
            "scroll_element:.list[0]:Top",
            "scroll_element:.list[0]:PageDown { padding: 20 }",
            "scroll_element:.list[0]:PageDown { padding: 20 }",
        ]
    );
}

#[tokio::test]
async fn test_capture_element_restores_the_window() {
    let driver = MockDriver::new().with_elements(".hero", 1);
    let harness = Harness::new(driver.clone());

    let list = actions(json!([
        {"action": "capture_element", "css_selector": ".hero", "padding": 10, "suffix": "hero"}
    ]));
    let outcome = harness.run(&list, "/about").await;

    assert!(outcome.result.is_ok());
    assert_eq!(
        driver.calls(),
        vec![
            "resize_window:800x200",
            "scroll_to_element:.hero[0]:Top:-10",
            "screenshot",
            "resize_window:800x600",
        ]
    );
    assert_eq!(outcome.filenames(), vec!["about_hero.png"]);
    assert_eq!(outcome.page.images[0].height, 200);
    assert_eq!(driver.state().window, (800, 600));
}

#[tokio::test]
async fn test_add_to_misc() {
    let harness = Harness::new(MockDriver::new());

    let list = actions(json!([
        {"action": "capture", "viewport_only": true, "full_name": "cookie_banner", "add_to_misc": true},
        {"action": "capture", "viewport_only": true}
    ]));
    let outcome = harness.run(&list, "/").await;

    assert!(outcome.result.is_ok());
    assert_eq!(outcome.misc.len(), 1);
    assert_eq!(outcome.misc[0].filename, "cookie_banner.png");
    assert_eq!(outcome.filenames(), vec!["home_page.png"]);
}

#[tokio::test]
async fn test_driver_failure_is_recorded_and_skipped() {
    let driver = MockDriver::new();
    let harness = Harness::new(driver.clone());

    let list = actions(json!([
        {"action": "click", "css_selector": "#missing"},
        {"action": "wait_for_element", "css_selector": "#never", "duration": 0.5},
        {"action": "refresh"}
    ]));
    let outcome = harness.run(&list, "/about").await;

    assert!(outcome.result.is_ok());
    assert_eq!(driver.calls_to("refresh"), vec!["refresh"]);
    let errors = harness.errors.snapshot();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].starts_with("/about | "));
    assert!(errors[0].contains("#missing"));
    assert!(errors[1].contains("#never"));
}

#[tokio::test]
async fn test_unknown_kind_aborts_the_list() {
    let driver = MockDriver::new();
    let harness = Harness::new(driver.clone());

    let list = actions(json!([{"action": "dance"}, {"action": "refresh"}]));
    let outcome = harness.run(&list, "/").await;

    assert!(matches!(outcome.result, Err(ActionDispatchError::UnknownKind(ref k)) if k == "dance"));
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn test_missing_field_aborts_the_list() {
    let harness = Harness::new(MockDriver::new());

    let list = actions(json!([{"action": "send_special_key"}]));
    let outcome = harness.run(&list, "/").await;

    assert!(matches!(
        outcome.result,
        Err(ActionDispatchError::MissingField { field: "key", .. })
    ));
}

#[tokio::test]
async fn test_references_and_libraries() {
    let driver = MockDriver::new().with_elements("#accept", 1).with_elements("#login", 1);
    let harness = Harness::new(driver.clone());

    let mut references = HashMap::new();
    references.insert("login".to_string(), actions(json!([{"action": "click", "css_selector": "#login"}])));
    let mut common = HashMap::new();
    common.insert("accept".to_string(), actions(json!([{"action": "click", "css_selector": "#accept"}])));
    let mut libraries = HashMap::new();
    libraries.insert("common".to_string(), common);
    let mut ctx = ActionContext::new(Arc::new(ReferenceTables::new(references, libraries)));

    let list = actions(json!([
        {"action": "external", "library": "common", "ref": "accept"},
        {"action": "reference", "ref": ["login", "unknown"]},
        {"action": "external", "library": "common", "ref": "unknown"}
    ]));
    let outcome = harness.run_with(&list, &mut ctx, "/").await;

    assert!(outcome.result.is_ok());
    assert_eq!(driver.calls(), vec!["click:#accept[0]", "click:#login[0]"]);
    assert!(ctx.reference_stack().is_empty());
}

#[tokio::test]
async fn test_reference_cycle_is_an_error() {
    let harness = Harness::new(MockDriver::new());

    let mut references = HashMap::new();
    references.insert("a".to_string(), actions(json!([{"action": "reference", "ref": "b"}])));
    references.insert("b".to_string(), actions(json!([{"action": "reference", "ref": "a"}])));
    let mut ctx = ActionContext::new(Arc::new(ReferenceTables::new(references, HashMap::new())));

    let list = actions(json!([{"action": "reference", "ref": "a"}]));
    let outcome = harness.run_with(&list, &mut ctx, "/").await;

    match outcome.result {
        Err(ActionDispatchError::ReferenceCycle { name, stack }) => {
            assert_eq!(name, "a");
            assert_eq!(stack, "a -> b -> a");
        }
        other => panic!("expected a reference cycle, got {:?}", other),
    }
}

#[tokio::test]
async fn test_enter_text_sources() {
    let driver = MockDriver::new().with_elements("input", 1);
    let mut harness = Harness::new(driver.clone());
    harness.settings.custom_inputs.insert("phone".to_string(), "555-0100".to_string());

    let list = actions(json!([
        {"action": "enter_text", "css_selector": "input", "input": "brand"},
        {"action": "enter_text", "css_selector": "input", "custom_input": "phone"},
        {"action": "enter_text", "css_selector": "input", "custom_input": "fax"},
        {"action": "enter_text", "css_selector": "input", "input_type": "zip_code"}
    ]));
    let outcome = harness.run(&list, "/").await;

    assert!(outcome.result.is_ok());
    let calls = driver.calls();
    assert_eq!(calls[0], "clear_and_fill:input[0]=Acme");
    assert_eq!(calls[1], "clear_and_fill:input[0]=555-0100");
    assert_eq!(calls[2], "clear_and_fill:input[0]=Not-Configured");
    let zip = calls[3].strip_prefix("clear_and_fill:input[0]=").unwrap();
    assert_eq!(zip.len(), 5);
    assert!(zip.chars().all(|c| c.is_ascii_digit()));
}

#[tokio::test]
async fn test_load_url_resolution() {
    let driver = MockDriver::new().with_url("https://shop.example.com/about");
    let harness = Harness::new(driver.clone());

    let list = actions(json!([
        {"action": "load_url", "path": "/contact"},
        {"action": "load_url", "url": "https://other.example.com", "path": "/faq"},
        {"action": "load_url", "url": "https://other.example.com/terms"}
    ]));
    harness.run(&list, "/about").await.result.unwrap();

    assert_eq!(
        driver.calls(),
        vec![
            "load_url:https://shop.example.com/contact",
            "load_url:https://other.example.com/faq",
            "load_url:https://other.example.com/terms",
        ]
    );
}

#[tokio::test]
async fn test_load_url_path_without_a_page() {
    let driver = MockDriver::new();
    let mut harness = Harness::new(driver.clone());

    let list = actions(json!([{"action": "load_url", "path": "/login"}]));
    let outcome = harness.run(&list, "/").await;
    assert!(matches!(
        outcome.result,
        Err(ActionDispatchError::MissingField { field: "url", .. })
    ));

    harness.settings.base_url = Some("https://example.com/".to_string());
    harness.run(&list, "/").await.result.unwrap();
    assert_eq!(driver.calls(), vec!["load_url:https://example.com/login"]);
}

#[tokio::test]
async fn test_cookie_domain_placeholder() {
    let driver = MockDriver::new().with_url("https://shop.example.com/cart");
    let harness = Harness::new(driver.clone());

    let list = actions(json!([
        {"action": "add_cookie", "name": "<domain>_consent", "value": "yes"},
        {"action": "delete_cookie", "name": "session"}
    ]));
    harness.run(&list, "/cart").await.result.unwrap();

    assert_eq!(
        driver.calls(),
        vec!["add_cookie:shop.example.com_consent=yes", "delete_cookie:session"]
    );
}

#[tokio::test]
async fn test_window_and_frame_switching() {
    let driver = MockDriver::new()
        .with_handles(&["main", "popup"])
        .with_elements("iframe.checkout", 1);
    let harness = Harness::new(driver.clone());

    let list = actions(json!([
        {"action": "switch_window_handle", "index": 1},
        {"action": "switch_window_handle"},
        {"action": "switch_window_handle", "index": 5},
        {"action": "switch_to_iframe", "css_selector": "iframe.checkout"},
        {"action": "switch_to_iframe", "default_content": true},
        {"action": "close_window"}
    ]));
    let outcome = harness.run(&list, "/").await;

    assert!(outcome.result.is_ok());
    assert_eq!(
        driver.calls(),
        vec![
            "switch_window_handle:popup",
            "switch_window_handle:newest",
            "switch_to_frame:iframe.checkout[0]",
            "switch_to_frame:default",
            "close_window",
        ]
    );
    assert_eq!(harness.errors.len(), 1);
}

#[tokio::test]
async fn test_resize_browser() {
    let driver = MockDriver::new().with_document_height(2400);
    let mut harness = Harness::new(driver.clone());
    harness.capture.head_padding = 75;

    let list = actions(json!([
        {"action": "resize_browser", "width": 320, "height": 700},
        {"action": "resize_browser", "content_height": true},
        {"action": "resize_browser"}
    ]));
    harness.run(&list, "/").await.result.unwrap();

    assert_eq!(
        driver.calls(),
        vec![
            "resize_window:320x700",
            "resize_window:1440x2475",
            "resize_window:1440x1000",
        ]
    );
}

#[tokio::test]
async fn test_element_scripts_and_scrolling() {
    let driver = MockDriver::new().with_elements(".tab", 2).with_scrollable(".panel", 500);
    let harness = Harness::new(driver.clone());

    let list = actions(json!([
        {"action": "for_each", "css_selector": ".tab", "actions": [
            {"action": "execute_script", "element": true, "script": "arguments[0].click();"}
        ]},
        {"action": "execute_script", "script": "window.dispatchEvent(new Event('resize'));"},
        {"action": "scroll_an_element", "css_selector": ".panel", "scroll_padding": 30},
        {"action": "scroll_an_element", "css_selector": ".panel", "position_top": true},
        {"action": "scroll_window_to_element", "css_selector": ".tab", "position_middle": true},
        {"action": "hide_element", "css_selector": ".tab"},
        {"action": "show_element", "css_selector": ".tab"}
    ]));
    harness.run(&list, "/").await.result.unwrap();

    assert_eq!(
        driver.calls(),
        vec![
            "execute_script:arguments[0].click();:1",
            "execute_script:arguments[0].click();:1",
            "execute_script:window.dispatchEvent(new Event('resize'));:0",
            "scroll_element:.panel[0]:PageDown { padding: 30 }",
            "scroll_element:.panel[0]:Top",
            "scroll_to_element:.tab[0]:Middle:0",
            "hide_element:.tab[0]",
            "show_element:.tab[0]",
        ]
    );
}

#[tokio::test]
async fn test_sleep_waits() {
    let harness = Harness::new(MockDriver::new());

    let list = actions(json!([{"action": "sleep", "duration": 0.05}]));
    let started = std::time::Instant::now();
    harness.run(&list, "/").await.result.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(50));
}

use anyhow::Context;
use clap::Parser;
use hippo_capture::config::load_action_libraries;
use hippo_capture::{
    run_capture, ChromeDriverFactory, ImageSink, LaunchOptions, LocalOnlyStore, ProjectConfig,
    RunOptions,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Project configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Directory for images, manifests and the error list
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory of action library files (<library>.json)
    #[arg(short, long)]
    libraries: Option<PathBuf>,

    /// Number of browser workers
    #[arg(short, long)]
    threads: Option<usize>,

    /// Use the mobile environment
    #[arg(long)]
    mobile: bool,

    /// Run Chrome without a window
    #[arg(long)]
    headless: bool,

    /// Disable the Chrome sandbox (containers, CI)
    #[arg(long)]
    no_sandbox: bool,

    /// Path to the Chrome executable
    #[arg(long)]
    chrome_path: Option<PathBuf>,

    /// Crop tall images for a PDF and write pdf_image_manifest.json
    #[arg(long)]
    crop_for_pdf: bool,
}

fn default_output_dir(project: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("hippo-capture")
        .join(project.replace(char::is_whitespace, "_"))
        .join(stamp)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = ProjectConfig::from_file(&args.config).await?;
    if args.headless {
        config.browser.headless = true;
    }
    if args.no_sandbox {
        config.browser.no_sandbox = true;
    }
    if let Some(path) = args.chrome_path {
        config.browser.chrome_path = Some(path);
    }

    let libraries = match &args.libraries {
        Some(dir) => load_action_libraries(dir).await?,
        None => HashMap::new(),
    };

    let output = args
        .output
        .unwrap_or_else(|| default_output_dir(&config.project));
    log::info!("Writing {} captures to {}", config.project, output.display());

    let factory = Arc::new(ChromeDriverFactory::new(LaunchOptions {
        chrome_path: config
            .browser
            .chrome_path
            .as_ref()
            .map(|p| p.display().to_string()),
        no_sandbox: config.browser.no_sandbox,
        headless: config.browser.headless,
    }));
    let sink = Arc::new(ImageSink::new(
        &output,
        config.file_extension,
        Arc::new(LocalOnlyStore),
    ));

    let mut options = RunOptions::from_config(&config);
    options.mobile |= args.mobile;
    options.crop_for_pdf |= args.crop_for_pdf;
    if let Some(threads) = args.threads {
        options.threads = threads.max(1);
    }

    let report = run_capture(&config, libraries, factory, sink, options).await;
    report
        .write_to(&output)
        .await
        .context("Failed to write the run report")?;

    if report.passed {
        println!(
            "Passed: {} images in {}",
            report.manifest.image_count(),
            output.display()
        );
        Ok(())
    } else {
        eprintln!("Failed with {} errors:", report.errors.len());
        for error in &report.errors {
            eprintln!("  - {}", error);
        }
        std::process::exit(1);
    }
}

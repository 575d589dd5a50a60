//! Capture Run
//!
//! Spreads a project's pages over a pool of workers. Each worker owns one
//! browser session and visits pages pulled from a shared queue: load the page,
//! run the before-screenshot actions, then the page's action lists (or a plain
//! capture when it has none). Images land in per-page slots so the manifest
//! keeps queue order no matter which worker finished first.

use crate::actions::{Action, ActionContext, ActionInterpreter, ActionKind, InterpreterSettings, ReferenceTables};
use crate::browser::{BrowserDriver, DriverFactory};
use crate::capture::{CaptureSettings, CapturedImage, ImageManifest, ImageSink, PageImageSet, Screenshot};
use crate::config::{PageActionTables, ProjectConfig, ResolvedEnvironment};
use crate::error::{ActionDispatchError, ErrorLog};
use crate::pdf::PdfCropper;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;

pub const IMAGE_MANIFEST_FILE: &str = "image_manifest.json";
pub const PDF_MANIFEST_FILE: &str = "pdf_image_manifest.json";
pub const ERRORS_FILE: &str = "errors.json";

/// One page visit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageJob {
    /// Position in the final manifest
    pub index: usize,
    pub url: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mobile: bool,
    pub threads: usize,
    pub crop_for_pdf: bool,
    /// Wait after each page load before running actions
    pub page_settle: Duration,
}

impl RunOptions {
    pub fn from_config(config: &ProjectConfig) -> Self {
        Self {
            mobile: config.mobile,
            threads: config.threads(),
            crop_for_pdf: config.crop_images_for_pdf,
            page_settle: Duration::from_secs(5),
        }
    }
}

/// Outcome of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub manifest: ImageManifest,
    /// Manifest with oversized images replaced by their crops
    pub pdf_manifest: Option<ImageManifest>,
    pub errors: Vec<String>,
    pub passed: bool,
}

impl RunReport {
    /// Write the manifests and the error list into `dir`
    pub async fn write_to(&self, dir: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        write_json(&dir.join(IMAGE_MANIFEST_FILE), &self.manifest).await?;
        if let Some(pdf_manifest) = &self.pdf_manifest {
            write_json(&dir.join(PDF_MANIFEST_FILE), pdf_manifest).await?;
        }
        write_json(&dir.join(ERRORS_FILE), &self.errors).await?;
        Ok(())
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// `path` under the site root; absolute URLs are kept as they are
pub fn page_url(base_url: &str, path: &str) -> String {
    if url::Url::parse(path).is_ok() {
        return path.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// State shared by every worker; only the queue, slots and logs change
struct Shared {
    queue: Mutex<VecDeque<PageJob>>,
    slots: Mutex<Vec<PageImageSet>>,
    misc: Mutex<Vec<CapturedImage>>,
    errors: ErrorLog,
    capture: CaptureSettings,
    interpreter: InterpreterSettings,
    environment: ResolvedEnvironment,
    tables: PageActionTables,
    references: Arc<ReferenceTables>,
    setup_actions: Vec<Action>,
    base_url: String,
    /// Serializes setup (logins) against the shared origin
    setup_guard: tokio::sync::Mutex<()>,
    sink: Arc<ImageSink>,
    factory: Arc<dyn DriverFactory>,
    mobile: bool,
    page_settle: Duration,
}

impl Shared {
    fn next_job(&self) -> Option<PageJob> {
        self.queue.lock().unwrap_or_else(|p| p.into_inner()).pop_front()
    }

    fn fill_slot(&self, index: usize, page: PageImageSet, misc: Vec<CapturedImage>) {
        if let Some(slot) = self.slots.lock().unwrap_or_else(|p| p.into_inner()).get_mut(index) {
            *slot = page;
        }
        self.misc.lock().unwrap_or_else(|p| p.into_inner()).extend(misc);
    }

    fn interpreter<'a>(&'a self, driver: &'a dyn BrowserDriver, page: PageImageSet) -> ActionInterpreter<'a> {
        ActionInterpreter::new(
            Screenshot::new(driver, self.capture.clone()),
            driver,
            &self.sink,
            &self.interpreter,
            self.errors.clone(),
            page,
        )
    }

    fn context(&self) -> ActionContext {
        ActionContext::new(self.references.clone())
    }
}

fn capture_settings(config: &ProjectConfig, environment: &ResolvedEnvironment) -> CaptureSettings {
    CaptureSettings {
        paginated: environment.paginated,
        headers: environment.headers.clone(),
        footers: environment.footers.clone(),
        scroll_padding: environment.scroll_padding,
        headless: config.browser.headless,
        head_padding: config.browser.head_padding(),
        scale_factor: config.browser.scale_factor,
        resize_delay: config.resize_delay().unwrap_or_else(|e| {
            log::warn!("Ignoring the resize delay | {}", e);
            Duration::ZERO
        }),
        content_container_selector: environment.content_container_selector.clone(),
        ..CaptureSettings::default()
    }
}

/// Capture every page of `config` and collect the results
pub async fn run_capture(
    config: &ProjectConfig,
    libraries: HashMap<String, HashMap<String, Vec<Action>>>,
    factory: Arc<dyn DriverFactory>,
    sink: Arc<ImageSink>,
    options: RunOptions,
) -> RunReport {
    let environment = config.resolve_environment(options.mobile);
    let jobs: VecDeque<PageJob> = config
        .site_paths
        .iter()
        .enumerate()
        .map(|(index, path)| PageJob {
            index,
            url: page_url(&config.base_url, path),
            path: path.clone(),
        })
        .collect();
    let slots = jobs
        .iter()
        .map(|job| PageImageSet::new(&job.url, &job.path))
        .collect();
    let worker_count = options.threads.max(1).min(jobs.len());

    let shared = Arc::new(Shared {
        queue: Mutex::new(jobs),
        slots: Mutex::new(slots),
        misc: Mutex::new(Vec::new()),
        errors: ErrorLog::new(),
        capture: capture_settings(config, &environment),
        interpreter: InterpreterSettings {
            project: config.project.clone(),
            base_url: Some(config.base_url.clone()),
            custom_inputs: config.custom_inputs.clone(),
            browser_size: (environment.browser_size.width, environment.browser_size.height),
            ..InterpreterSettings::default()
        },
        tables: config.page_actions(),
        references: Arc::new(ReferenceTables::new(config.reference_actions(), libraries)),
        environment,
        setup_actions: config.setup_actions.clone(),
        base_url: config.base_url.clone(),
        setup_guard: tokio::sync::Mutex::new(()),
        sink: sink.clone(),
        factory,
        mobile: options.mobile,
        page_settle: options.page_settle,
    });

    log::info!(
        "Capturing {} pages of {} with {} workers",
        config.site_paths.len(),
        config.project,
        worker_count
    );

    let mut workers = JoinSet::new();
    for id in 0..worker_count {
        workers.spawn(worker(id, shared.clone()));
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            let message = format!("A capture worker stopped unexpectedly | {}", e);
            log::error!("{}", message);
            shared.errors.push(message);
        }
    }

    let pages = std::mem::take(&mut *shared.slots.lock().unwrap_or_else(|p| p.into_inner()));
    let mut misc = PageImageSet::misc();
    misc.images = std::mem::take(&mut *shared.misc.lock().unwrap_or_else(|p| p.into_inner()));
    let manifest = ImageManifest::new(pages, misc);

    let pdf_manifest = if options.crop_for_pdf {
        match PdfCropper::new(sink.clone()).crop_manifest(&manifest).await {
            Ok(prepared) => Some(prepared),
            Err(e) => {
                let message = format!("Unable to prepare the images for the PDF | {}", e);
                log::error!("{}", message);
                shared.errors.push(message);
                None
            }
        }
    } else {
        None
    };

    let errors = shared.errors.snapshot();
    let passed = errors.is_empty();
    log::info!(
        "Run {} with {} images and {} errors",
        if passed { "passed" } else { "failed" },
        manifest.image_count(),
        errors.len()
    );

    RunReport {
        manifest,
        pdf_manifest,
        errors,
        passed,
    }
}

async fn worker(id: usize, shared: Arc<Shared>) {
    let driver = match shared.factory.create().await {
        Ok(driver) => driver,
        Err(e) => {
            let message = format!("Could not create the browser for worker {} | {}", id, e);
            log::error!("{}", message);
            shared.errors.push(message);
            return;
        }
    };

    if let Err(e) = setup(driver.as_ref(), &shared).await {
        let message = format!("Unable to set up the browser for worker {} | {}", id, e);
        log::warn!("{}", message);
        shared.errors.push(message);
    } else {
        while let Some(job) = shared.next_job() {
            log::info!("Worker {} capturing {}", id, job.url);
            let (page, misc) = visit(driver.as_ref(), &shared, &job).await;
            shared.fill_slot(job.index, page, misc);
        }
    }

    if let Err(e) = driver.quit().await {
        log::debug!("Worker {} could not close its browser: {}", id, e);
    }
}

/// Size the window and run the setup actions under the origin guard
async fn setup(driver: &dyn BrowserDriver, shared: &Shared) -> anyhow::Result<()> {
    let (width, height) = shared.interpreter.browser_size;
    driver
        .resize_window(width, height)
        .await
        .context("Failed to size the browser window")?;

    if shared.setup_actions.is_empty() {
        return Ok(());
    }

    let _guard = shared.setup_guard.lock().await;
    driver
        .load_url(&shared.base_url, true)
        .await
        .with_context(|| format!("Failed to load {}", shared.base_url))?;

    let interpreter = shared.interpreter(driver, PageImageSet::new(&shared.base_url, "setup"));
    let mut ctx = shared.context();
    interpreter.dispatch(&shared.setup_actions, &mut ctx).await?;

    let (_, misc) = interpreter.into_images();
    shared.misc.lock().unwrap_or_else(|p| p.into_inner()).extend(misc);
    Ok(())
}

async fn visit(
    driver: &dyn BrowserDriver,
    shared: &Shared,
    job: &PageJob,
) -> (PageImageSet, Vec<CapturedImage>) {
    let interpreter = shared.interpreter(driver, PageImageSet::new(&job.url, &job.path));

    if let Err(e) = driver.load_url(&job.url, true).await {
        let message = format!(
            "The browser could not load the page at {} while running actions | {}",
            job.url, e
        );
        log::error!("{}", message);
        shared.errors.push(message);
        return interpreter.into_images();
    }
    if !shared.page_settle.is_zero() {
        tokio::time::sleep(shared.page_settle).await;
    }

    if let Some(before) = &shared.environment.before_screenshot {
        if before.applies_to(&job.path) {
            let mut ctx = shared.context();
            if let Err(e) = interpreter.dispatch(&before.actions, &mut ctx).await {
                let message = format!("Unable to perform the before screenshot actions on {} | {}", job.path, e);
                log::warn!("{}", message);
                shared.errors.push(message);
            }
        } else {
            log::info!("Skipping the before screenshot actions on {}", job.path);
        }
    }

    if let Err(e) = run_page_actions(&interpreter, shared, &job.path).await {
        let message = format!("Error while capturing the page at {} | {}", job.url, e);
        log::error!("{}", message);
        shared.errors.push(message);
    }

    interpreter.into_images()
}

async fn run_page_actions(
    interpreter: &ActionInterpreter<'_>,
    shared: &Shared,
    path: &str,
) -> Result<(), ActionDispatchError> {
    match shared.tables.select(path, shared.mobile) {
        Some(lists) => {
            for actions in lists {
                let mut ctx = shared.context();
                interpreter.dispatch(actions, &mut ctx).await?;
            }
            Ok(())
        }
        None => {
            let mut ctx = shared.context();
            interpreter
                .dispatch(&[Action::new(ActionKind::Capture)], &mut ctx)
                .await
        }
    }
}

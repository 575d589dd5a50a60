//! Action Interpreter
//!
//! Walks an action list against a [`BrowserDriver`], producing images through
//! [`Screenshot`] and recording them in the page's [`PageImageSet`] or the
//! misc bucket.
//!
//! Failure policy per action:
//! - a driver failure is logged, recorded in the run's [`ErrorLog`] and the
//!   list carries on with the next action;
//! - anything else (unknown kind, missing or invalid field, empty `for_each`, reference
//!   cycle, capture failure) aborts the list and is returned to the caller.

use super::action::{missing, require, seconds_field, Action, ActionKind, ActionParams};
use super::context::ActionContext;
use crate::browser::{BrowserDriver, ElementAnchor, ElementHandle, ElementScroll, ScriptArg, WindowScroll};
use crate::capture::naming::{image_stem, iteration_suffix, screenshot_name, sequence_suffix};
use crate::capture::{Captured, CapturedImage, ImageSink, PageImageSet, ScrollAxis, Screenshot};
use crate::error::{ActionDispatchError, CaptureError, DispatchResult, DriverError, ErrorLog};
use futures::future::BoxFuture;
use image::RgbaImage;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// Text entered when a `custom_input` key has no configured value
pub const NOT_CONFIGURED: &str = "Not-Configured";
/// `enter_text` input replaced with the project name
pub const BRAND_PLACEHOLDER: &str = "brand";
/// Cookie name placeholder replaced with the current host
pub const DOMAIN_PLACEHOLDER: &str = "<domain>";
/// Window height added around an element for `capture_element`
pub const ELEMENT_WINDOW_ALLOWANCE: u32 = 80;
pub const DEFAULT_WAIT: Duration = Duration::from_secs(15);

/// Per-environment values the interpreter needs besides the capture settings
#[derive(Debug, Clone)]
pub struct InterpreterSettings {
    pub project: String,
    /// Site root used to resolve `load_url` paths when the browser has no page yet
    pub base_url: Option<String>,
    pub custom_inputs: HashMap<String, String>,
    /// Window size restored by `resize_browser` when no size is given
    pub browser_size: (u32, u32),
    pub wait_timeout: Duration,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            project: String::new(),
            base_url: None,
            custom_inputs: HashMap::new(),
            browser_size: (1440, 1000),
            wait_timeout: DEFAULT_WAIT,
        }
    }
}

fn driver_err(kind: ActionKind) -> impl FnOnce(DriverError) -> ActionDispatchError {
    move |source| ActionDispatchError::Driver {
        kind: kind.to_string(),
        source,
    }
}

fn capture_err(kind: ActionKind) -> impl FnOnce(CaptureError) -> ActionDispatchError {
    move |source| ActionDispatchError::Capture {
        kind: kind.to_string(),
        source,
    }
}

fn flag(value: Option<bool>) -> bool {
    value.unwrap_or(false)
}

/// How captured images are named
struct ImageName {
    base: String,
    suffix: Option<String>,
    /// Sequences under an explicit full name count `_001`, `_002`
    zero_padded: bool,
}

pub struct ActionInterpreter<'a> {
    driver: &'a dyn BrowserDriver,
    screenshot: Screenshot<'a>,
    sink: &'a ImageSink,
    settings: &'a InterpreterSettings,
    errors: ErrorLog,
    page: Mutex<PageImageSet>,
    misc: Mutex<Vec<CapturedImage>>,
}

impl<'a> ActionInterpreter<'a> {
    pub fn new(
        screenshot: Screenshot<'a>,
        driver: &'a dyn BrowserDriver,
        sink: &'a ImageSink,
        settings: &'a InterpreterSettings,
        errors: ErrorLog,
        page: PageImageSet,
    ) -> Self {
        Self {
            driver,
            screenshot,
            sink,
            settings,
            errors,
            page: Mutex::new(page),
            misc: Mutex::new(Vec::new()),
        }
    }

    /// Images recorded so far for the page
    pub fn page_images(&self) -> Vec<CapturedImage> {
        self.page.lock().unwrap_or_else(|p| p.into_inner()).images.clone()
    }

    /// The page set and the images bound for the misc bucket
    pub fn into_images(self) -> (PageImageSet, Vec<CapturedImage>) {
        let page = self.page.into_inner().unwrap_or_else(|p| p.into_inner());
        let misc = self.misc.into_inner().unwrap_or_else(|p| p.into_inner());
        (page, misc)
    }

    /// Run `actions` in order.
    ///
    /// Recoverable failures are recorded and skipped; the first unrecoverable
    /// one stops the list and is returned.
    pub fn dispatch<'b>(
        &'b self,
        actions: &'b [Action],
        ctx: &'b mut ActionContext,
    ) -> BoxFuture<'b, DispatchResult<()>> {
        Box::pin(async move {
            for action in actions {
                match self.perform(action, ctx).await {
                    Ok(()) => {}
                    Err(e) if e.is_recoverable() => {
                        log::warn!("{}", e);
                        self.errors.push(format!("{} | {}", self.page_path(), e));
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
    }

    fn page_path(&self) -> String {
        self.page.lock().unwrap_or_else(|p| p.into_inner()).path.clone()
    }

    fn page_url(&self) -> String {
        self.page.lock().unwrap_or_else(|p| p.into_inner()).url.clone()
    }

    async fn perform(&self, action: &Action, ctx: &mut ActionContext) -> DispatchResult<()> {
        let kind = action.kind()?;
        let p = &action.params;
        log::debug!("Performing {} on {}", kind, self.page_path());

        match kind {
            ActionKind::Capture => self.capture(kind, p, ctx).await,
            ActionKind::CaptureScrollingElement => {
                self.capture_scrolling_element(kind, p, ctx, ScrollAxis::Vertical).await
            }
            ActionKind::CaptureHorizontalScrollingElement => {
                self.capture_scrolling_element(kind, p, ctx, ScrollAxis::Horizontal).await
            }
            ActionKind::CaptureElement => self.capture_element(kind, p, ctx).await,
            ActionKind::LoadUrl => self.load_url(kind, p).await,
            ActionKind::Click => {
                let element = self.target(kind, p, ctx).await?;
                self.driver.click(&element).await.map_err(driver_err(kind))
            }
            ActionKind::ClickElementWithOffset => {
                let element = self.target(kind, p, ctx).await?;
                self.driver
                    .click_with_offset(&element, p.x_position.unwrap_or(0), p.y_position.unwrap_or(0))
                    .await
                    .map_err(driver_err(kind))
            }
            ActionKind::Hover => {
                let element = self.target(kind, p, ctx).await?;
                self.driver.hover(&element).await.map_err(driver_err(kind))
            }
            ActionKind::EnterText => {
                let text = self.input_text(kind, p)?;
                let element = self.target(kind, p, ctx).await?;
                self.driver
                    .clear_and_fill(&element, &text)
                    .await
                    .map_err(driver_err(kind))
            }
            ActionKind::ScrollWindowToPosition => {
                let position = if flag(p.position_top) {
                    WindowScroll::Top
                } else if flag(p.position_bottom) {
                    WindowScroll::Bottom
                } else {
                    WindowScroll::To {
                        x: p.x_position.unwrap_or(0),
                        y: p.y_position.unwrap_or(0),
                    }
                };
                self.driver.scroll_window_to(position).await.map_err(driver_err(kind))
            }
            ActionKind::ScrollWindowToElement => {
                let element = self.target(kind, p, ctx).await?;
                let anchor = if flag(p.position_bottom) {
                    ElementAnchor::Bottom
                } else if flag(p.position_middle) {
                    ElementAnchor::Middle
                } else {
                    ElementAnchor::Top
                };
                self.driver
                    .scroll_to_element(&element, anchor, 0)
                    .await
                    .map_err(driver_err(kind))
            }
            ActionKind::ScrollAnElement => {
                let element = self.target(kind, p, ctx).await?;
                let x = p.x_position.unwrap_or(0);
                let y = p.y_position.unwrap_or(0);
                let scroll = if flag(p.position_top) {
                    ElementScroll::Top
                } else if flag(p.position_bottom) {
                    ElementScroll::Bottom
                } else if x != 0 || y != 0 {
                    ElementScroll::To { x, y }
                } else {
                    ElementScroll::PageDown {
                        padding: p.scroll_padding.unwrap_or(0) as i64,
                    }
                };
                self.driver
                    .scroll_element(&element, scroll)
                    .await
                    .map_err(driver_err(kind))
            }
            ActionKind::Refresh => self.driver.refresh().await.map_err(driver_err(kind)),
            ActionKind::Sleep => {
                let seconds = *require(kind, "duration", p.duration.as_ref())?;
                tokio::time::sleep(seconds_field(kind, "duration", seconds)?).await;
                Ok(())
            }
            ActionKind::WaitForElement => {
                let selector = require(kind, "css_selector", p.css_selector.as_deref())?;
                let timeout = match p.duration {
                    Some(seconds) => seconds_field(kind, "duration", seconds)?,
                    None => self.settings.wait_timeout,
                };
                self.driver
                    .wait_for_element(selector, timeout, flag(p.visible))
                    .await
                    .map_err(driver_err(kind))
            }
            ActionKind::SendSpecialKey => {
                let key = require(kind, "key", p.key.as_deref())?;
                self.driver.send_special_key(key).await.map_err(driver_err(kind))
            }
            ActionKind::Reference => {
                let names = require(kind, "ref", p.reference.as_ref())?.names();
                let tables = ctx.references.clone();
                for name in names {
                    match tables.reference(name) {
                        Some(actions) => self.dispatch_named(name.to_string(), actions, ctx).await?,
                        None => log::warn!("No reference actions named {:?}, skipping", name),
                    }
                }
                Ok(())
            }
            ActionKind::External => {
                let library = require(kind, "library", p.library.as_deref())?;
                let names = require(kind, "ref", p.reference.as_ref())?.names();
                let tables = ctx.references.clone();
                for name in names {
                    match tables.external(library, name) {
                        Some(actions) => {
                            self.dispatch_named(format!("{}/{}", library, name), actions, ctx)
                                .await?
                        }
                        None => log::warn!(
                            "No actions named {:?} in the {:?} action library, skipping",
                            name,
                            library
                        ),
                    }
                }
                Ok(())
            }
            ActionKind::ForEach => self.for_each(kind, p, ctx).await,
            ActionKind::ShowElement => {
                let element = self.target(kind, p, ctx).await?;
                self.driver.show_element(&element).await.map_err(driver_err(kind))
            }
            ActionKind::HideElement => {
                let element = self.target(kind, p, ctx).await?;
                self.driver.hide_element(&element).await.map_err(driver_err(kind))
            }
            ActionKind::ExecuteScript => {
                let script = require(kind, "script", p.script.as_deref())?;
                let uses_element = (flag(p.element) && ctx.element.is_some()) || p.css_selector.is_some();
                let args = if uses_element {
                    vec![ScriptArg::from(&self.target(kind, p, ctx).await?)]
                } else {
                    Vec::new()
                };
                self.driver
                    .execute_script(script, &args)
                    .await
                    .map(|_| ())
                    .map_err(driver_err(kind))
            }
            ActionKind::SwitchWindowHandle => match p.index {
                Some(index) => {
                    let handles = self.driver.window_handles().await.map_err(driver_err(kind))?;
                    let handle = handles.get(index).ok_or_else(|| {
                        driver_err(kind)(DriverError::Other(format!(
                            "No window handle at index {} ({} open)",
                            index,
                            handles.len()
                        )))
                    })?;
                    self.driver
                        .switch_window_handle(Some(handle.as_str()))
                        .await
                        .map_err(driver_err(kind))
                }
                None => self
                    .driver
                    .switch_window_handle(None)
                    .await
                    .map_err(driver_err(kind)),
            },
            ActionKind::SwitchToIframe => {
                if flag(p.default_content) {
                    return self.driver.switch_to_frame(None).await.map_err(driver_err(kind));
                }
                let selector = require(kind, "css_selector", p.css_selector.as_deref())?;
                let frame = self.driver.find_element(selector).await.map_err(driver_err(kind))?;
                self.driver
                    .switch_to_frame(Some(&frame))
                    .await
                    .map_err(driver_err(kind))
            }
            ActionKind::AddCookie => {
                let name = self.cookie_name(kind, p).await?;
                let value = require(kind, "value", p.value.as_deref())?;
                self.driver.add_cookie(&name, value).await.map_err(driver_err(kind))
            }
            ActionKind::DeleteCookie => {
                let name = self.cookie_name(kind, p).await?;
                self.driver.delete_cookie(&name).await.map_err(driver_err(kind))
            }
            ActionKind::CloseWindow => self.driver.close_window().await.map_err(driver_err(kind)),
            ActionKind::ResizeBrowser => self.resize_browser(kind, p).await,
            ActionKind::Focus => self.driver.focus_window().await.map_err(driver_err(kind)),
        }
    }

    /// Element an action works on.
    ///
    /// The `for_each` element wins when the action sets `element`; otherwise
    /// the selector is re-resolved, and the bound element is the fallback.
    async fn target(
        &self,
        kind: ActionKind,
        p: &ActionParams,
        ctx: &ActionContext,
    ) -> DispatchResult<ElementHandle> {
        if flag(p.element) {
            if let Some(element) = &ctx.element {
                return Ok(element.clone());
            }
        }
        if let Some(selector) = p.css_selector.as_deref() {
            return self.driver.find_element(selector).await.map_err(driver_err(kind));
        }
        ctx.element.clone().ok_or_else(|| missing(kind, "css_selector"))
    }

    async fn dispatch_named(
        &self,
        name: String,
        actions: &[Action],
        ctx: &mut ActionContext,
    ) -> DispatchResult<()> {
        log::debug!("Dispatching the {:?} action list", name);
        ctx.enter(name)?;
        let result = self.dispatch(actions, ctx).await;
        ctx.leave();
        result
    }

    async fn for_each(&self, kind: ActionKind, p: &ActionParams, ctx: &mut ActionContext) -> DispatchResult<()> {
        let selector = require(kind, "css_selector", p.css_selector.as_deref())?;
        let actions = require(kind, "actions", p.actions.as_ref())?;

        let elements = self.driver.find_elements(selector).await.map_err(driver_err(kind))?;
        if elements.is_empty() {
            if !flag(p.allow_empty) {
                return Err(ActionDispatchError::EmptyForEach {
                    selector: selector.to_string(),
                });
            }
            log::info!("No elements match {:?}, nothing to iterate", selector);
        }

        let outer = ctx.element.take();
        let mut outcome = Ok(());
        for element in elements {
            ctx.element = Some(element);
            if !flag(p.do_not_increment_element_count) {
                ctx.iteration += 1;
            }
            if let Err(e) = self.dispatch(actions, ctx).await {
                outcome = Err(e);
                break;
            }
        }
        ctx.element = outer;

        if !flag(p.child) {
            ctx.iteration = 0;
        }
        outcome
    }

    fn input_text(&self, kind: ActionKind, p: &ActionParams) -> DispatchResult<String> {
        if let Some(input_type) = p.input_type {
            let mut rng = rand::thread_rng();
            return Ok(input_type.generate(&mut rng));
        }
        if let Some(key) = p.custom_input.as_deref() {
            return Ok(match self.settings.custom_inputs.get(key) {
                Some(value) => value.clone(),
                None => {
                    log::warn!("No custom input configured for {:?}", key);
                    NOT_CONFIGURED.to_string()
                }
            });
        }
        match require(kind, "input", p.input.as_deref())? {
            BRAND_PLACEHOLDER => Ok(self.settings.project.clone()),
            text => Ok(text.to_string()),
        }
    }

    async fn load_url(&self, kind: ActionKind, p: &ActionParams) -> DispatchResult<()> {
        let url = match (p.url.as_deref(), p.path.as_deref()) {
            (Some(url), Some(path)) => format!("{}{}", url, path),
            (Some(url), None) => url.to_string(),
            (None, Some(path)) => self.resolve_path(kind, path).await?,
            (None, None) => return Err(missing(kind, "path")),
        };
        log::info!("Loading {}", url);
        self.driver
            .load_url(&url, flag(p.bypass_404))
            .await
            .map_err(driver_err(kind))
    }

    /// `path` against the current origin, or the configured site root
    async fn resolve_path(&self, kind: ActionKind, path: &str) -> DispatchResult<String> {
        if Url::parse(path).is_ok() {
            return Ok(path.to_string());
        }

        let current = self.driver.current_url().await.map_err(driver_err(kind))?;
        let joined = Url::parse(&current)
            .ok()
            .filter(|url| url.has_host())
            .and_then(|url| url.join(path).ok())
            .or_else(|| {
                self.settings
                    .base_url
                    .as_deref()
                    .and_then(|base| Url::parse(base).ok())
                    .and_then(|base| base.join(path).ok())
            });

        joined
            .map(String::from)
            .ok_or_else(|| missing(kind, "url"))
    }

    async fn cookie_name(&self, kind: ActionKind, p: &ActionParams) -> DispatchResult<String> {
        let name = require(kind, "name", p.name.as_deref())?;
        if !name.contains(DOMAIN_PLACEHOLDER) {
            return Ok(name.to_string());
        }
        let current = self.driver.current_url().await.map_err(driver_err(kind))?;
        let host = Url::parse(&current)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_default();
        Ok(name.replace(DOMAIN_PLACEHOLDER, &host))
    }

    async fn resize_browser(&self, kind: ActionKind, p: &ActionParams) -> DispatchResult<()> {
        let (default_width, default_height) = self.settings.browser_size;
        let width = p.width.unwrap_or(default_width);
        let height = if flag(p.content_height) {
            let capture = self.screenshot.settings();
            let selector = p
                .css_selector
                .as_deref()
                .unwrap_or(capture.content_container_selector.as_str());
            let content = self.driver.content_height(selector).await.map_err(driver_err(kind))?;
            content + capture.head_padding
        } else {
            p.height.unwrap_or(default_height)
        };

        self.driver
            .resize_window(width, height)
            .await
            .map_err(driver_err(kind))?;
        self.settle_after_resize().await;
        Ok(())
    }

    async fn settle_after_resize(&self) {
        let delay = self.screenshot.settings().resize_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    // ===== CAPTURE =====

    async fn image_name(
        &self,
        kind: ActionKind,
        p: &ActionParams,
        ctx: &ActionContext,
    ) -> DispatchResult<ImageName> {
        let suffix = iteration_suffix(p.suffix.as_deref(), ctx.iteration);
        if let Some(full_name) = p.full_name.as_deref().filter(|n| !n.is_empty()) {
            return Ok(ImageName {
                base: full_name.to_string(),
                suffix,
                zero_padded: true,
            });
        }
        let base = if flag(p.current_url) {
            let current = self.driver.current_url().await.map_err(driver_err(kind))?;
            screenshot_name(&current)
        } else {
            screenshot_name(&self.page_path())
        };
        Ok(ImageName {
            base,
            suffix,
            zero_padded: false,
        })
    }

    async fn save(
        &self,
        kind: ActionKind,
        image: &RgbaImage,
        base: &str,
        suffix: Option<&str>,
        add_to_misc: bool,
    ) -> DispatchResult<()> {
        let page_url = self.page_url();
        let record = self
            .sink
            .save(image, &image_stem(base, suffix), suffix, &page_url)
            .await
            .map_err(capture_err(kind))?;

        if add_to_misc {
            self.misc.lock().unwrap_or_else(|p| p.into_inner()).push(record);
        } else {
            self.page
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .images
                .push(record);
        }
        Ok(())
    }

    async fn capture(&self, kind: ActionKind, p: &ActionParams, ctx: &ActionContext) -> DispatchResult<()> {
        let captured = self
            .screenshot
            .capture_page(flag(p.viewport_only), p.padding)
            .await
            .map_err(capture_err(kind))?;
        let name = self.image_name(kind, p, ctx).await?;
        let misc = flag(p.add_to_misc);

        match captured {
            Captured::Single(image) => {
                self.save(kind, &image, &name.base, name.suffix.as_deref(), misc).await
            }
            Captured::Sequence(images) => {
                for (index, image) in images.iter().enumerate() {
                    let suffix = sequence_suffix(name.suffix.as_deref(), index, name.zero_padded);
                    self.save(kind, image, &name.base, Some(&suffix), misc).await?;
                }
                Ok(())
            }
        }
    }

    async fn capture_scrolling_element(
        &self,
        kind: ActionKind,
        p: &ActionParams,
        ctx: &ActionContext,
        axis: ScrollAxis,
    ) -> DispatchResult<()> {
        let element = self.target(kind, p, ctx).await?;
        let images = self
            .screenshot
            .capture_scrolling_element(
                &element,
                axis,
                p.viewport_only.unwrap_or(true),
                p.scroll_padding.or(p.padding),
            )
            .await
            .map_err(capture_err(kind))?;

        let name = self.image_name(kind, p, ctx).await?;
        let misc = flag(p.add_to_misc);
        for (index, image) in images.iter().enumerate() {
            let suffix = sequence_suffix(name.suffix.as_deref(), index, false);
            self.save(kind, image, &name.base, Some(&suffix), misc).await?;
        }
        Ok(())
    }

    /// Fit the window to the element, capture the viewport, then restore the window
    async fn capture_element(&self, kind: ActionKind, p: &ActionParams, ctx: &ActionContext) -> DispatchResult<()> {
        let element = self.target(kind, p, ctx).await?;
        let padding = p.padding.unwrap_or(0);
        let (width, height) = self.driver.window_size().await.map_err(driver_err(kind))?;

        let captured = self.capture_fitted(kind, &element, width, padding).await;

        if let Err(e) = self.driver.resize_window(width, height).await {
            log::warn!("Could not restore the window to {}x{}: {}", width, height, e);
        }
        self.settle_after_resize().await;

        let image = captured?;
        let name = self.image_name(kind, p, ctx).await?;
        self.save(kind, &image, &name.base, name.suffix.as_deref(), flag(p.add_to_misc))
            .await
    }

    async fn capture_fitted(
        &self,
        kind: ActionKind,
        element: &ElementHandle,
        width: u32,
        padding: u32,
    ) -> DispatchResult<RgbaImage> {
        let element_height = self.driver.element_height(element).await.map_err(driver_err(kind))?;
        self.driver
            .resize_window(width, element_height + ELEMENT_WINDOW_ALLOWANCE + 2 * padding)
            .await
            .map_err(driver_err(kind))?;
        self.settle_after_resize().await;
        self.driver
            .scroll_to_element(element, ElementAnchor::Top, -(padding as i64))
            .await
            .map_err(driver_err(kind))?;

        let captured = self
            .screenshot
            .capture_page(true, None)
            .await
            .map_err(capture_err(kind))?;
        captured.into_images().into_iter().next().ok_or_else(|| {
            capture_err(kind)(CaptureError::Storage {
                name: element.to_string(),
                reason: "the viewport capture produced no image".to_string(),
            })
        })
    }
}

// spider_chrome re-exports chromiumoxide API
use super::driver::{BrowserDriver, ElementHandle, ScriptArg};
use super::DriverFactory;
use crate::error::{DriverError, DriverResult};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    Bounds, GetWindowBoundsParams, GetWindowForTargetParams, SetWindowBoundsParams, WindowState,
};
use chromiumoxide::cdp::browser_protocol::{input, network, page as page_protocol};
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Launch options for a Chrome session
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub chrome_path: Option<String>,
    pub no_sandbox: bool,
    pub headless: bool,
}

/// Which window and frame subsequent commands address
#[derive(Debug, Default)]
struct SessionState {
    target: Option<String>,
    frame: Option<ElementHandle>,
}

pub struct ChromeDriver {
    browser: tokio::sync::Mutex<Browser>,
    state: Mutex<SessionState>,
    profile_dir: PathBuf,
}

impl ChromeDriver {
    /// Launch a dedicated Chrome process with its own profile directory
    pub async fn launch(options: LaunchOptions) -> DriverResult<Self> {
        // A unique profile directory per instance keeps parallel workers isolated
        let unique_id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let profile_dir = std::env::temp_dir().join(format!("hippo-capture-{}", unique_id));
        std::fs::create_dir_all(&profile_dir).map_err(|e| {
            DriverError::LaunchFailed(format!("Failed to create the profile directory: {}", e))
        })?;

        let mut config = if options.headless {
            BrowserConfig::builder()
        } else {
            BrowserConfig::builder().with_head()
        };
        config = config.user_data_dir(&profile_dir);

        // Linux AppArmor workaround
        if options.no_sandbox {
            config = config.arg("--no-sandbox");
        }
        if let Some(path) = options.chrome_path {
            config = config.chrome_executable(path);
        }

        let config = config.build().map_err(launch_error)?;
        let (browser, mut handler) = Browser::launch(config).await.map_err(launch_error)?;

        tokio::spawn(async move {
            while (handler.next().await).is_some() {
                // Handle browser events
            }
        });

        log::info!("Launched Chrome (headless: {})", options.headless);

        Ok(Self {
            browser: tokio::sync::Mutex::new(browser),
            state: Mutex::new(SessionState::default()),
            profile_dir,
        })
    }

    fn session(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The page addressed by the current window handle, excluding Chrome's new-tab-page
    async fn get_active_page(&self) -> DriverResult<Page> {
        let target = self.session().target.clone();
        let browser = self.browser.lock().await;
        let pages = browser.pages().await?;

        if let Some(target) = target {
            if let Some(page) = pages.iter().find(|p| p.target_id().inner() == &target) {
                return Ok(page.clone());
            }
            log::warn!("Window {} is gone, falling back to the first page", target);
        }

        for page in pages.iter() {
            if let Ok(Some(url)) = page.url().await {
                if !url.starts_with("chrome://") {
                    return Ok(page.clone());
                }
            }
        }

        if let Some(page) = pages.last() {
            return Ok(page.clone());
        }

        browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Other(format!("Failed to create page: {}", e)))
    }

    /// Evaluate `script` with `arguments` bound, scoped to the selected frame when `scoped`
    async fn evaluate(&self, script: &str, args: &[ScriptArg], scoped: bool) -> DriverResult<Value> {
        let frame = if scoped { self.session().frame.clone() } else { None };
        let expression = wrap_script(script, args, frame.as_ref())?;
        let page = self.get_active_page().await?;

        let result = page
            .evaluate(expression)
            .await
            .map_err(|e| DriverError::Script(e.to_string()))?;

        Ok(result.into_value().unwrap_or(Value::Null))
    }

    /// Viewport coordinates of the element's top-left corner plus its size
    async fn element_rect(&self, element: &ElementHandle) -> DriverResult<(f64, f64, f64, f64)> {
        let value = self
            .evaluate(
                "var el = arguments[0]; \
                 if (!el) { return null; } \
                 el.scrollIntoView({block: 'center', inline: 'center'}); \
                 var r = el.getBoundingClientRect(); \
                 return [r.left, r.top, r.width, r.height];",
                &[element.into()],
                true,
            )
            .await?;
        let rect = rect_from(&value).ok_or_else(|| DriverError::ElementNotFound(element.to_string()))?;

        // Offsets inside an iframe are relative to the frame's own viewport
        let frame = self.session().frame.clone();
        match frame {
            Some(frame) => {
                let value = self
                    .evaluate(
                        "var r = arguments[0].getBoundingClientRect(); return [r.left, r.top, r.width, r.height];",
                        &[ScriptArg::Element(frame.clone())],
                        false,
                    )
                    .await?;
                let (fx, fy, _, _) =
                    rect_from(&value).ok_or_else(|| DriverError::ElementNotFound(frame.to_string()))?;
                Ok((rect.0 + fx, rect.1 + fy, rect.2, rect.3))
            }
            None => Ok(rect),
        }
    }

    async fn mouse_event(&self, page: &Page, kind: &str, x: f64, y: f64) -> DriverResult<()> {
        let params: input::DispatchMouseEventParams = serde_json::from_value(json!({
            "type": kind,
            "x": x,
            "y": y,
            "button": "left",
            "clickCount": 1,
        }))
        .map_err(|e| DriverError::Other(format!("Invalid mouse event: {}", e)))?;
        page.execute(params).await?;
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> DriverResult<()> {
        let page = self.get_active_page().await?;
        page.click(Point::new(x, y)).await?;
        Ok(())
    }

    async fn window_id(&self, page: &Page) -> DriverResult<chromiumoxide::cdp::browser_protocol::browser::WindowId> {
        let window = page
            .execute(GetWindowForTargetParams {
                target_id: Some(page.target_id().clone()),
            })
            .await
            .map_err(|e| DriverError::Other(format!("Failed to get window: {}", e)))?;
        Ok(window.window_id)
    }

    async fn status_code(&self) -> DriverResult<Option<i64>> {
        let value = self
            .evaluate(
                "var entry = performance.getEntriesByType('navigation')[0]; \
                 return entry && entry.responseStatus ? entry.responseStatus : null;",
                &[],
                false,
            )
            .await?;
        Ok(value.as_i64())
    }

    async fn cookie_domain(&self) -> DriverResult<Option<String>> {
        let current = self.current_url().await?;
        Ok(url::Url::parse(&current)
            .ok()
            .and_then(|u| u.host_str().map(cookie_domain_for)))
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn load_url(&self, url: &str, bypass_status_check: bool) -> DriverResult<()> {
        let page = self.get_active_page().await?;
        self.session().frame = None;

        log::debug!("Navigating to {}", url);
        let params: page_protocol::NavigateParams = serde_json::from_value(json!({ "url": url }))
            .map_err(|e| DriverError::NavigationFailed(format!("Invalid URL {}: {}", url, e)))?;

        let response = page.execute(params).await.map_err(|e| {
            // "oneshot canceled" means the browser connection is dead
            if e.to_string().contains("oneshot canceled") {
                DriverError::NavigationFailed(
                    "Browser connection lost. The browser may have been closed or crashed.".to_string(),
                )
            } else {
                DriverError::NavigationFailed(format!("Failed to navigate to {}: {}", url, e))
            }
        })?;

        if let Some(error_text) = &response.result.error_text {
            return Err(DriverError::NavigationFailed(format!(
                "Navigation to {} failed: {}",
                url, error_text
            )));
        }

        match tokio::time::timeout(NAVIGATION_TIMEOUT, page.wait_for_navigation()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::warn!("Could not wait for load of {}: {}", url, e),
            Err(_) => {
                return Err(DriverError::Timeout {
                    what: format!("{} to load", url),
                    seconds: NAVIGATION_TIMEOUT.as_secs_f64(),
                })
            }
        }

        if !bypass_status_check {
            if let Some(status) = self.status_code().await? {
                if !(200..300).contains(&status) {
                    return Err(DriverError::NavigationFailed(format!(
                        "The URL: {} has the status code of: {}. You may bypass the status code check if you need to navigate to this URL.",
                        url, status
                    )));
                }
            }
        }

        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        let page = self.get_active_page().await?;
        page.url()
            .await
            .map_err(|e| DriverError::Other(e.to_string()))?
            .ok_or(DriverError::NoPage)
    }

    async fn refresh(&self) -> DriverResult<()> {
        let page = self.get_active_page().await?;
        self.session().frame = None;
        page.reload().await?;
        Ok(())
    }

    async fn find_elements(&self, selector: &str) -> DriverResult<Vec<ElementHandle>> {
        let value = self
            .evaluate(
                "return document.querySelectorAll(arguments[0]).length;",
                &[json!(selector).into()],
                true,
            )
            .await?;
        let count = value.as_u64().unwrap_or(0) as usize;
        Ok((0..count).map(|i| ElementHandle::new(selector, i)).collect())
    }

    async fn wait_for_element(&self, selector: &str, timeout: Duration, visible: bool) -> DriverResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.find_elements(selector).await?.into_iter().next() {
                if !visible || self.element_visible(&element).await? {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    what: format!("element {:?}", selector),
                    seconds: timeout.as_secs_f64(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&self, element: &ElementHandle) -> DriverResult<()> {
        let (x, y, width, height) = self.element_rect(element).await?;
        self.click_at(x + width / 2.0, y + height / 2.0).await
    }

    async fn click_with_offset(&self, element: &ElementHandle, x: i64, y: i64) -> DriverResult<()> {
        let (left, top, _, _) = self.element_rect(element).await?;
        self.click_at(left + x as f64, top + y as f64).await
    }

    async fn hover(&self, element: &ElementHandle) -> DriverResult<()> {
        let (x, y, width, height) = self.element_rect(element).await?;
        let page = self.get_active_page().await?;
        self.mouse_event(&page, "mouseMoved", x + width / 2.0, y + height / 2.0)
            .await
    }

    async fn clear(&self, element: &ElementHandle) -> DriverResult<()> {
        self.evaluate(
            "var el = arguments[0]; \
             el.value = ''; \
             el.dispatchEvent(new Event('input', {bubbles: true})); \
             el.dispatchEvent(new Event('change', {bubbles: true}));",
            &[element.into()],
            true,
        )
        .await?;
        Ok(())
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> DriverResult<()> {
        self.evaluate("arguments[0].focus();", &[element.into()], true)
            .await?;
        let page = self.get_active_page().await?;
        let params: input::InsertTextParams = serde_json::from_value(json!({ "text": text }))
            .map_err(|e| DriverError::Other(format!("Invalid text input: {}", e)))?;
        page.execute(params).await?;
        self.evaluate(
            "arguments[0].dispatchEvent(new Event('change', {bubbles: true}));",
            &[element.into()],
            true,
        )
        .await?;
        Ok(())
    }

    async fn send_special_key(&self, key: &str) -> DriverResult<()> {
        let definition = special_key(key)
            .ok_or_else(|| DriverError::Other(format!("Unable to send the special key {:?}", key)))?;
        let page = self.get_active_page().await?;

        for kind in ["keyDown", "keyUp"] {
            let mut event = json!({
                "type": kind,
                "key": definition.key,
                "code": definition.code,
                "windowsVirtualKeyCode": definition.key_code,
                "nativeVirtualKeyCode": definition.key_code,
            });
            if kind == "keyDown" {
                if let Some(text) = definition.text {
                    event["text"] = json!(text);
                }
            }
            let params: input::DispatchKeyEventParams = serde_json::from_value(event)
                .map_err(|e| DriverError::Other(format!("Invalid key event: {}", e)))?;
            page.execute(params).await?;
        }
        Ok(())
    }

    async fn execute_script(&self, script: &str, args: &[ScriptArg]) -> DriverResult<Value> {
        self.evaluate(script, args, true).await
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        let page = self.get_active_page().await?;
        page.screenshot(ScreenshotParams::builder().build())
            .await
            .map_err(|e| DriverError::Other(format!("Failed to take screenshot: {}", e)))
    }

    async fn screenshot_full_page(&self) -> DriverResult<Vec<u8>> {
        let page = self.get_active_page().await?;
        page.screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(|e| DriverError::Other(format!("Failed to take full page screenshot: {}", e)))
    }

    async fn resize_window(&self, width: u32, height: u32) -> DriverResult<()> {
        let page = self.get_active_page().await?;
        let window_id = self.window_id(&page).await?;

        let bounds = Bounds {
            left: None,
            top: None,
            width: Some(width as i64),
            height: Some(height as i64),
            window_state: Some(WindowState::Normal),
        };

        page.execute(SetWindowBoundsParams { window_id, bounds })
            .await
            .map_err(|e| DriverError::Other(format!("Failed to set window bounds: {}", e)))?;

        log::debug!("Browser window resized to {}x{}", width, height);
        Ok(())
    }

    async fn window_size(&self) -> DriverResult<(u32, u32)> {
        let page = self.get_active_page().await?;
        let window_id = self.window_id(&page).await?;
        let result = page
            .execute(GetWindowBoundsParams { window_id })
            .await
            .map_err(|e| DriverError::Other(format!("Failed to get window bounds: {}", e)))?;
        let bounds = &result.bounds;
        Ok((
            bounds.width.unwrap_or_default().max(0) as u32,
            bounds.height.unwrap_or_default().max(0) as u32,
        ))
    }

    async fn add_cookie(&self, name: &str, value: &str) -> DriverResult<()> {
        let page = self.get_active_page().await?;
        let mut cookie = json!({ "name": name, "value": value, "path": "/" });
        match self.cookie_domain().await? {
            Some(domain) => cookie["domain"] = json!(domain),
            None => cookie["url"] = json!(self.current_url().await?),
        }
        let params: network::SetCookieParams = serde_json::from_value(cookie)
            .map_err(|e| DriverError::Other(format!("Invalid cookie {}: {}", name, e)))?;
        page.execute(params).await?;
        Ok(())
    }

    async fn delete_cookie(&self, name: &str) -> DriverResult<()> {
        let page = self.get_active_page().await?;
        let params: network::DeleteCookiesParams =
            serde_json::from_value(json!({ "name": name, "url": self.current_url().await? }))
                .map_err(|e| DriverError::Other(format!("Invalid cookie {}: {}", name, e)))?;
        page.execute(params).await?;
        Ok(())
    }

    async fn window_handles(&self) -> DriverResult<Vec<String>> {
        let browser = self.browser.lock().await;
        let pages = browser.pages().await?;
        Ok(pages.iter().map(|p| p.target_id().inner().clone()).collect())
    }

    async fn switch_window_handle(&self, handle: Option<&str>) -> DriverResult<()> {
        let handles = self.window_handles().await?;
        let target = match handle {
            Some(handle) => handles
                .into_iter()
                .find(|h| h == handle)
                .ok_or_else(|| DriverError::Other(format!("No window with handle {}", handle)))?,
            None => handles.into_iter().last().ok_or(DriverError::NoPage)?,
        };

        {
            let mut session = self.session();
            session.target = Some(target);
            session.frame = None;
        }

        let page = self.get_active_page().await?;
        page.bring_to_front().await?;
        Ok(())
    }

    async fn switch_to_frame(&self, frame: Option<&ElementHandle>) -> DriverResult<()> {
        if let Some(frame) = frame {
            let value = self
                .evaluate(
                    "var el = arguments[0]; return !!(el && el.contentDocument);",
                    &[frame.into()],
                    true,
                )
                .await?;
            if value.as_bool() != Some(true) {
                return Err(DriverError::ElementNotFound(format!("iframe {}", frame)));
            }
        }
        self.session().frame = frame.cloned();
        Ok(())
    }

    async fn close_window(&self) -> DriverResult<()> {
        let page = self.get_active_page().await?;
        page.close().await?;
        let mut session = self.session();
        session.target = None;
        session.frame = None;
        Ok(())
    }

    async fn quit(&self) -> DriverResult<()> {
        let mut browser = self.browser.lock().await;
        browser
            .close()
            .await
            .map_err(|e| DriverError::Other(e.to_string()))?;
        let _ = browser.wait().await;
        Ok(())
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        if self.profile_dir.exists() {
            let _ = std::fs::remove_dir_all(&self.profile_dir);
        }
    }
}

/// Launches one Chrome per worker
#[derive(Debug, Clone, Default)]
pub struct ChromeDriverFactory {
    pub options: LaunchOptions,
}

impl ChromeDriverFactory {
    pub fn new(options: LaunchOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl DriverFactory for ChromeDriverFactory {
    async fn create(&self) -> DriverResult<Box<dyn BrowserDriver>> {
        let driver = ChromeDriver::launch(self.options.clone()).await?;
        Ok(Box::new(driver))
    }
}

fn launch_error(e: impl std::fmt::Display) -> DriverError {
    DriverError::LaunchFailed(format!(
        "{}. \n\n\
         Chrome not found. You can:\n\
         - Install Chrome: https://www.google.com/chrome/\n\
         - Ubuntu/Debian: sudo apt install chromium-browser\n\
         - Or specify path: --chrome-path /path/to/chrome\n\
         - Linux sandbox issue? Try: --no-sandbox",
        e
    ))
}

fn rect_from(value: &Value) -> Option<(f64, f64, f64, f64)> {
    let parts = value.as_array()?;
    Some((
        parts.first()?.as_f64()?,
        parts.get(1)?.as_f64()?,
        parts.get(2)?.as_f64()?,
        parts.get(3)?.as_f64()?,
    ))
}

/// `www.example.com` -> `.example.com`; hosts without a dot are used as-is
fn cookie_domain_for(host: &str) -> String {
    match host.split_once('.') {
        Some((_, rest)) if rest.contains('.') => format!(".{}", rest),
        _ => host.to_string(),
    }
}

/// Build a self-invoking expression that runs `script` as a function body.
///
/// Element arguments are resolved against the selected frame's document, and
/// `window`/`document` inside the body refer to that frame.
fn wrap_script(script: &str, args: &[ScriptArg], frame: Option<&ElementHandle>) -> DriverResult<String> {
    let encode = |value: &Value| {
        serde_json::to_string(value).map_err(|e| DriverError::Script(format!("Unencodable argument: {}", e)))
    };

    let mut encoded = Vec::with_capacity(args.len());
    for arg in args {
        encoded.push(match arg {
            ScriptArg::Element(handle) => format!(
                "(document.querySelectorAll({})[{}] || null)",
                encode(&json!(handle.selector))?,
                handle.index
            ),
            ScriptArg::Value(value) => encode(value)?,
        });
    }

    let (frame_window, frame_document) = match frame {
        Some(handle) => {
            let frame_el = format!(
                "document.querySelectorAll({})[{}]",
                encode(&json!(handle.selector))?,
                handle.index
            );
            (
                format!("{}.contentWindow", frame_el),
                format!("{}.contentDocument", frame_el),
            )
        }
        None => ("window".to_string(), "document".to_string()),
    };

    Ok(format!(
        "(function(window, document) {{ return (function() {{ {} }}).apply(null, [{}]); }})({}, {})",
        script,
        encoded.join(", "),
        frame_window,
        frame_document
    ))
}

struct KeyDefinition {
    key: &'static str,
    code: &'static str,
    key_code: i64,
    text: Option<&'static str>,
}

/// Named keys, accepting the upper-case names used in action configuration
fn special_key(name: &str) -> Option<KeyDefinition> {
    let def = |key, code, key_code, text| KeyDefinition { key, code, key_code, text };
    Some(match name.to_ascii_uppercase().as_str() {
        "ENTER" | "RETURN" => def("Enter", "Enter", 13, Some("\r")),
        "TAB" => def("Tab", "Tab", 9, None),
        "ESCAPE" | "ESC" => def("Escape", "Escape", 27, None),
        "BACKSPACE" | "BACK_SPACE" => def("Backspace", "Backspace", 8, None),
        "DELETE" => def("Delete", "Delete", 46, None),
        "SPACE" => def(" ", "Space", 32, Some(" ")),
        "ARROW_DOWN" | "DOWN" => def("ArrowDown", "ArrowDown", 40, None),
        "ARROW_UP" | "UP" => def("ArrowUp", "ArrowUp", 38, None),
        "ARROW_LEFT" | "LEFT" => def("ArrowLeft", "ArrowLeft", 37, None),
        "ARROW_RIGHT" | "RIGHT" => def("ArrowRight", "ArrowRight", 39, None),
        "PAGE_DOWN" => def("PageDown", "PageDown", 34, None),
        "PAGE_UP" => def("PageUp", "PageUp", 33, None),
        "HOME" => def("Home", "Home", 36, None),
        "END" => def("End", "End", 35, None),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_domain_drops_first_label() {
        assert_eq!(cookie_domain_for("www.example.com"), ".example.com");
        assert_eq!(cookie_domain_for("shop.brand.co.uk"), ".brand.co.uk");
        assert_eq!(cookie_domain_for("example.com"), "example.com");
        assert_eq!(cookie_domain_for("localhost"), "localhost");
    }

    #[test]
    fn test_wrap_script_resolves_elements_in_frame() {
        let args = vec![
            ScriptArg::Element(ElementHandle::new(".item", 2)),
            ScriptArg::Value(json!(40)),
        ];
        let frame = ElementHandle::first("iframe#content");
        let wrapped = wrap_script("return arguments[1];", &args, Some(&frame)).unwrap();

        assert!(wrapped.contains(r#"(document.querySelectorAll(".item")[2] || null)"#));
        assert!(wrapped.contains(r#"document.querySelectorAll("iframe#content")[0].contentDocument"#));
        assert!(wrapped.contains("[(document.querySelectorAll(\".item\")[2] || null), 40]"));
    }

    #[test]
    fn test_special_keys() {
        assert_eq!(special_key("enter").map(|k| k.key_code), Some(13));
        assert_eq!(special_key("PAGE_DOWN").map(|k| k.code), Some("PageDown"));
        assert!(special_key("NOT_A_KEY").is_none());
    }
}

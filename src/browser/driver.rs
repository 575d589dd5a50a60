//! Browser Driver Capability
//!
//! The interface the capture core consumes. Implementations provide the
//! primitive operations; the geometry and scrolling helpers are provided in
//! terms of [`BrowserDriver::execute_script`] and may be overridden.

use crate::error::{DriverError, DriverResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// A DOM element, addressed as the `index`-th match of `selector`.
///
/// Handles are re-resolved on every use, so they survive page mutations that
/// would invalidate a remote object reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    pub selector: String,
    pub index: usize,
}

impl ElementHandle {
    pub fn new(selector: impl Into<String>, index: usize) -> Self {
        Self {
            selector: selector.into(),
            index,
        }
    }

    /// First match of `selector`
    pub fn first(selector: impl Into<String>) -> Self {
        Self::new(selector, 0)
    }
}

impl std::fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.selector, self.index)
    }
}

/// Argument passed to a page script, available as `arguments[i]`.
#[derive(Debug, Clone)]
pub enum ScriptArg {
    Element(ElementHandle),
    Value(Value),
}

impl From<&ElementHandle> for ScriptArg {
    fn from(element: &ElementHandle) -> Self {
        ScriptArg::Element(element.clone())
    }
}

impl From<Value> for ScriptArg {
    fn from(value: Value) -> Self {
        ScriptArg::Value(value)
    }
}

/// Where to scroll the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowScroll {
    Top,
    Bottom,
    To { x: i64, y: i64 },
}

/// Where to scroll inside a scrollable element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementScroll {
    Top,
    Bottom,
    Left,
    Right,
    To { x: i64, y: i64 },
    /// Forward by the element's height minus `padding`
    PageDown { padding: i64 },
    /// Forward by the element's width minus `padding`
    PageRight { padding: i64 },
}

/// Where the element should end up in the viewport after scrolling to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElementAnchor {
    #[default]
    Top,
    Middle,
    Bottom,
}

fn as_i64(value: &Value, what: &str) -> DriverResult<i64> {
    value
        .as_f64()
        .map(|v| v.round() as i64)
        .ok_or_else(|| DriverError::Script(format!("Expected a number for {}, got {}", what, value)))
}

fn as_bool(value: &Value, what: &str) -> DriverResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| DriverError::Script(format!("Expected a boolean for {}, got {}", what, value)))
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    // ===== NAVIGATION =====

    async fn load_url(&self, url: &str, bypass_status_check: bool) -> DriverResult<()>;

    async fn current_url(&self) -> DriverResult<String>;

    async fn refresh(&self) -> DriverResult<()>;

    // ===== ELEMENTS =====

    async fn find_elements(&self, selector: &str) -> DriverResult<Vec<ElementHandle>>;

    async fn wait_for_element(
        &self,
        selector: &str,
        timeout: Duration,
        visible: bool,
    ) -> DriverResult<()>;

    async fn click(&self, element: &ElementHandle) -> DriverResult<()>;

    /// Click at a pixel offset from the element's top-left corner
    async fn click_with_offset(&self, element: &ElementHandle, x: i64, y: i64) -> DriverResult<()>;

    async fn hover(&self, element: &ElementHandle) -> DriverResult<()>;

    async fn clear(&self, element: &ElementHandle) -> DriverResult<()>;

    async fn fill(&self, element: &ElementHandle, text: &str) -> DriverResult<()>;

    async fn send_special_key(&self, key: &str) -> DriverResult<()>;

    // ===== SCRIPTS & CAPTURE =====

    /// Run `script` as a function body; `arguments[i]` are the given args.
    async fn execute_script(&self, script: &str, args: &[ScriptArg]) -> DriverResult<Value>;

    /// PNG bytes of the current viewport
    async fn screenshot(&self) -> DriverResult<Vec<u8>>;

    /// PNG bytes of the whole document
    async fn screenshot_full_page(&self) -> DriverResult<Vec<u8>>;

    // ===== WINDOW & SESSION =====

    async fn resize_window(&self, width: u32, height: u32) -> DriverResult<()>;

    async fn window_size(&self) -> DriverResult<(u32, u32)>;

    async fn add_cookie(&self, name: &str, value: &str) -> DriverResult<()>;

    async fn delete_cookie(&self, name: &str) -> DriverResult<()>;

    async fn window_handles(&self) -> DriverResult<Vec<String>>;

    /// Switch to `handle`, or to the most recently opened window when `None`
    async fn switch_window_handle(&self, handle: Option<&str>) -> DriverResult<()>;

    /// Scope element lookups to an iframe, or back to the top document when `None`
    async fn switch_to_frame(&self, frame: Option<&ElementHandle>) -> DriverResult<()>;

    async fn close_window(&self) -> DriverResult<()>;

    async fn quit(&self) -> DriverResult<()>;

    // ===== PROVIDED HELPERS =====

    async fn find_element(&self, selector: &str) -> DriverResult<ElementHandle> {
        self.find_elements(selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::ElementNotFound(selector.to_string()))
    }

    async fn element_visible(&self, element: &ElementHandle) -> DriverResult<bool> {
        let value = self
            .execute_script(
                "var el = arguments[0]; \
                 if (!el) { return false; } \
                 var rect = el.getBoundingClientRect(); \
                 var style = window.getComputedStyle(el); \
                 return rect.width > 0 && rect.height > 0 \
                     && style.visibility !== 'hidden' && style.display !== 'none';",
                &[element.into()],
            )
            .await?;
        as_bool(&value, "element visibility")
    }

    async fn ensure_visible(&self, element: &ElementHandle) -> DriverResult<()> {
        if self.element_visible(element).await? {
            Ok(())
        } else {
            Err(DriverError::ElementNotVisible(element.to_string()))
        }
    }

    async fn clear_and_fill(&self, element: &ElementHandle, text: &str) -> DriverResult<()> {
        self.clear(element).await?;
        self.fill(element, text).await
    }

    async fn scroll_window_to(&self, position: WindowScroll) -> DriverResult<()> {
        match position {
            WindowScroll::Top => self.execute_script("window.scrollTo(0, 0);", &[]).await?,
            WindowScroll::Bottom => {
                self.execute_script("window.scrollTo(0, document.body.scrollHeight);", &[])
                    .await?
            }
            WindowScroll::To { x, y } => {
                self.execute_script(
                    "window.scrollTo(arguments[0], arguments[1]);",
                    &[json!(x).into(), json!(y).into()],
                )
                .await?
            }
        };
        Ok(())
    }

    async fn window_scroll_position(&self) -> DriverResult<i64> {
        let value = self.execute_script("return window.scrollY;", &[]).await?;
        as_i64(&value, "window scroll position")
    }

    /// Client (viewport) width and height in CSS pixels
    async fn viewport_size(&self) -> DriverResult<(u32, u32)> {
        let value = self
            .execute_script(
                "return [document.documentElement.clientWidth, document.documentElement.clientHeight];",
                &[],
            )
            .await?;
        let width = as_i64(&value[0], "viewport width")?;
        let height = as_i64(&value[1], "viewport height")?;
        Ok((width.max(0) as u32, height.max(0) as u32))
    }

    /// Rendered height of the element matched by `selector`
    async fn content_height(&self, selector: &str) -> DriverResult<u32> {
        let element = self.find_element(selector).await?;
        self.element_height(&element).await
    }

    async fn element_height(&self, element: &ElementHandle) -> DriverResult<u32> {
        let value = self
            .execute_script(
                "return arguments[0].getBoundingClientRect().height;",
                &[element.into()],
            )
            .await?;
        Ok(as_i64(&value, "element height")?.max(0) as u32)
    }

    /// Document y coordinate of the element's top edge
    async fn element_top(&self, element: &ElementHandle) -> DriverResult<i64> {
        let value = self
            .execute_script(
                "return arguments[0].getBoundingClientRect().top + window.scrollY;",
                &[element.into()],
            )
            .await?;
        as_i64(&value, "element location")
    }

    async fn scroll_to_element(
        &self,
        element: &ElementHandle,
        anchor: ElementAnchor,
        offset: i64,
    ) -> DriverResult<()> {
        self.ensure_visible(element).await?;

        if offset != 0 {
            let top = self.element_top(element).await?;
            return self.scroll_window_to(WindowScroll::To { x: 0, y: top + offset }).await;
        }

        let script = match anchor {
            ElementAnchor::Top => "arguments[0].scrollIntoView(true);",
            ElementAnchor::Bottom => "arguments[0].scrollIntoView(false);",
            ElementAnchor::Middle => {
                "window.scrollTo(0, arguments[0].offsetTop - (window.innerHeight / 2));"
            }
        };
        self.execute_script(script, &[element.into()]).await?;
        Ok(())
    }

    async fn scroll_element(&self, element: &ElementHandle, scroll: ElementScroll) -> DriverResult<()> {
        self.ensure_visible(element).await?;

        let (script, extra) = match scroll {
            ElementScroll::Top => ("arguments[0].scrollTop = 0;", vec![]),
            ElementScroll::Bottom => (
                "arguments[0].scrollTop = arguments[0].scrollHeight - arguments[0].clientHeight;",
                vec![],
            ),
            ElementScroll::Left => ("arguments[0].scrollLeft = 0;", vec![]),
            ElementScroll::Right => (
                "arguments[0].scrollLeft = arguments[0].scrollWidth - arguments[0].clientWidth;",
                vec![],
            ),
            ElementScroll::To { x, y } => (
                "arguments[0].scrollTop = arguments[2]; arguments[0].scrollLeft = arguments[1];",
                vec![json!(x), json!(y)],
            ),
            ElementScroll::PageDown { padding } => (
                "arguments[0].scrollTop += (arguments[0].offsetHeight - arguments[1]);",
                vec![json!(padding)],
            ),
            ElementScroll::PageRight { padding } => (
                "arguments[0].scrollLeft += (arguments[0].offsetWidth - arguments[1]);",
                vec![json!(padding)],
            ),
        };

        let mut args = vec![ScriptArg::from(element)];
        args.extend(extra.into_iter().map(ScriptArg::Value));
        self.execute_script(script, &args).await?;
        Ok(())
    }

    async fn element_at_bottom(&self, element: &ElementHandle) -> DriverResult<bool> {
        let value = self
            .execute_script(
                "var el = arguments[0]; return el.scrollTop >= (el.scrollHeight - el.clientHeight) - 1;",
                &[element.into()],
            )
            .await?;
        as_bool(&value, "element scroll position")
    }

    async fn element_at_right(&self, element: &ElementHandle) -> DriverResult<bool> {
        let value = self
            .execute_script(
                "var el = arguments[0]; return el.scrollLeft >= (el.scrollWidth - el.clientWidth) - 1;",
                &[element.into()],
            )
            .await?;
        as_bool(&value, "element scroll position")
    }

    async fn show_element(&self, element: &ElementHandle) -> DriverResult<()> {
        self.execute_script("arguments[0].style.display = 'block';", &[element.into()])
            .await?;
        Ok(())
    }

    async fn hide_element(&self, element: &ElementHandle) -> DriverResult<()> {
        self.ensure_visible(element).await?;
        self.execute_script("arguments[0].style.display = 'none';", &[element.into()])
            .await?;
        Ok(())
    }

    async fn focus_window(&self) -> DriverResult<()> {
        self.execute_script("window.focus();", &[]).await?;
        Ok(())
    }
}

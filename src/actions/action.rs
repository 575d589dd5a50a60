//! Action Types
//!
//! Defines the JSON structure of per-page action lists.

use crate::error::{ActionDispatchError, DispatchResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::input::InputType;

/// One instruction in a page's action list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action kind, e.g. "capture" or "for_each"
    pub action: String,

    #[serde(flatten)]
    pub params: ActionParams,
}

/// A single name or a list of names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn names(&self) -> Vec<&str> {
        match self {
            OneOrMany::One(name) => vec![name.as_str()],
            OneOrMany::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// Every field an action may carry; which ones matter depends on the kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_selector: Option<String>,

    /// Act on the element bound by the enclosing `for_each`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport_only: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_padding: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_to_misc: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_404: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_position: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_position: Option<i64>,

    #[serde(default, alias = "scroll_top", skip_serializing_if = "Option::is_none")]
    pub position_top: Option<bool>,

    #[serde(default, alias = "scroll_bottom", skip_serializing_if = "Option::is_none")]
    pub position_bottom: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_middle: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<InputType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_input: Option<String>,

    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<OneOrMany>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Action>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_empty: Option<bool>,

    #[serde(
        default,
        alias = "do_not_increment",
        skip_serializing_if = "Option::is_none"
    )]
    pub do_not_increment_element_count: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_content: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_height: Option<bool>,
}

/// The closed set of action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Capture,
    CaptureScrollingElement,
    CaptureHorizontalScrollingElement,
    CaptureElement,
    LoadUrl,
    Click,
    ClickElementWithOffset,
    Hover,
    EnterText,
    ScrollWindowToPosition,
    ScrollWindowToElement,
    ScrollAnElement,
    Refresh,
    Sleep,
    WaitForElement,
    SendSpecialKey,
    Reference,
    External,
    ForEach,
    ShowElement,
    HideElement,
    ExecuteScript,
    SwitchWindowHandle,
    SwitchToIframe,
    AddCookie,
    DeleteCookie,
    CloseWindow,
    ResizeBrowser,
    Focus,
}

impl ActionKind {
    pub const ALL: [ActionKind; 29] = [
        ActionKind::Capture,
        ActionKind::CaptureScrollingElement,
        ActionKind::CaptureHorizontalScrollingElement,
        ActionKind::CaptureElement,
        ActionKind::LoadUrl,
        ActionKind::Click,
        ActionKind::ClickElementWithOffset,
        ActionKind::Hover,
        ActionKind::EnterText,
        ActionKind::ScrollWindowToPosition,
        ActionKind::ScrollWindowToElement,
        ActionKind::ScrollAnElement,
        ActionKind::Refresh,
        ActionKind::Sleep,
        ActionKind::WaitForElement,
        ActionKind::SendSpecialKey,
        ActionKind::Reference,
        ActionKind::External,
        ActionKind::ForEach,
        ActionKind::ShowElement,
        ActionKind::HideElement,
        ActionKind::ExecuteScript,
        ActionKind::SwitchWindowHandle,
        ActionKind::SwitchToIframe,
        ActionKind::AddCookie,
        ActionKind::DeleteCookie,
        ActionKind::CloseWindow,
        ActionKind::ResizeBrowser,
        ActionKind::Focus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Capture => "capture",
            ActionKind::CaptureScrollingElement => "capture_scrolling_element",
            ActionKind::CaptureHorizontalScrollingElement => "capture_horizontal_scrolling_element",
            ActionKind::CaptureElement => "capture_element",
            ActionKind::LoadUrl => "load_url",
            ActionKind::Click => "click",
            ActionKind::ClickElementWithOffset => "click_element_with_offset",
            ActionKind::Hover => "hover",
            ActionKind::EnterText => "enter_text",
            ActionKind::ScrollWindowToPosition => "scroll_window_to_position",
            ActionKind::ScrollWindowToElement => "scroll_window_to_element",
            ActionKind::ScrollAnElement => "scroll_an_element",
            ActionKind::Refresh => "refresh",
            ActionKind::Sleep => "sleep",
            ActionKind::WaitForElement => "wait_for_element",
            ActionKind::SendSpecialKey => "send_special_key",
            ActionKind::Reference => "reference",
            ActionKind::External => "external",
            ActionKind::ForEach => "for_each",
            ActionKind::ShowElement => "show_element",
            ActionKind::HideElement => "hide_element",
            ActionKind::ExecuteScript => "execute_script",
            ActionKind::SwitchWindowHandle => "switch_window_handle",
            ActionKind::SwitchToIframe => "switch_to_iframe",
            ActionKind::AddCookie => "add_cookie",
            ActionKind::DeleteCookie => "delete_cookie",
            ActionKind::CloseWindow => "close_window",
            ActionKind::ResizeBrowser => "resize_browser",
            ActionKind::Focus => "focus",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ActionDispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ActionDispatchError::UnknownKind(s.to_string()))
    }
}

pub(crate) fn missing(kind: ActionKind, field: &'static str) -> ActionDispatchError {
    ActionDispatchError::MissingField {
        kind: kind.to_string(),
        field,
    }
}

/// Convert a seconds value to a [`Duration`], clamping negatives to zero
pub(crate) fn seconds_field(kind: ActionKind, field: &'static str, seconds: f64) -> DispatchResult<Duration> {
    Duration::try_from_secs_f64(seconds.max(0.0)).map_err(|e| ActionDispatchError::InvalidField {
        kind: kind.to_string(),
        field,
        reason: format!("{} seconds: {}", seconds, e),
    })
}

/// Return the field or a missing-field error naming the action kind
pub(crate) fn require<'a, T: ?Sized>(
    kind: ActionKind,
    field: &'static str,
    value: Option<&'a T>,
) -> DispatchResult<&'a T> {
    value.ok_or_else(|| missing(kind, field))
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            action: kind.as_str().to_string(),
            params: ActionParams::default(),
        }
    }

    pub fn kind(&self) -> DispatchResult<ActionKind> {
        self.action.parse()
    }

    /// Load an action list from a JSON file
    pub async fn list_from_file(path: &Path) -> anyhow::Result<Vec<Action>> {
        let content = tokio::fs::read_to_string(path).await?;
        let actions: Vec<Action> = serde_json::from_str(&content)?;
        Ok(actions)
    }

    /// Check that the kind exists and that fields the kind cannot run without are present
    pub fn validate(&self) -> DispatchResult<()> {
        let kind = self.kind()?;
        let p = &self.params;

        match kind {
            ActionKind::LoadUrl => {
                if p.path.is_none() && p.url.is_none() {
                    return Err(missing(kind, "path"));
                }
            }
            ActionKind::EnterText => {
                if p.input.is_none() && p.input_type.is_none() && p.custom_input.is_none() {
                    return Err(missing(kind, "input"));
                }
            }
            ActionKind::Sleep => {
                seconds_field(kind, "duration", *require(kind, "duration", p.duration.as_ref())?)?;
            }
            ActionKind::WaitForElement => {
                require(kind, "css_selector", p.css_selector.as_deref())?;
                if let Some(seconds) = p.duration {
                    seconds_field(kind, "duration", seconds)?;
                }
            }
            ActionKind::SendSpecialKey => {
                require(kind, "key", p.key.as_deref())?;
            }
            ActionKind::Reference => {
                require(kind, "ref", p.reference.as_ref())?;
            }
            ActionKind::External => {
                require(kind, "library", p.library.as_deref())?;
                require(kind, "ref", p.reference.as_ref())?;
            }
            ActionKind::ForEach => {
                require(kind, "css_selector", p.css_selector.as_deref())?;
                for nested in require(kind, "actions", p.actions.as_ref())? {
                    nested.validate()?;
                }
            }
            ActionKind::ExecuteScript => {
                require(kind, "script", p.script.as_deref())?;
            }
            ActionKind::SwitchToIframe => {
                if p.default_content != Some(true) {
                    require(kind, "css_selector", p.css_selector.as_deref())?;
                }
            }
            ActionKind::AddCookie => {
                require(kind, "name", p.name.as_deref())?;
                require(kind, "value", p.value.as_deref())?;
            }
            ActionKind::DeleteCookie => {
                require(kind, "name", p.name.as_deref())?;
            }
            _ => {}
        }

        Ok(())
    }

    pub fn validate_list(actions: &[Action]) -> DispatchResult<()> {
        actions.iter().try_for_each(Action::validate)
    }
}

use thiserror::Error;

/// Failure reported by a [`BrowserDriver`](crate::browser::BrowserDriver).
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Failed to launch Chrome: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element not visible: {0}")]
    ElementNotVisible(String),

    #[error("Timed out after {seconds:.1}s waiting for {what}")]
    Timeout { what: String, seconds: f64 },

    #[error("Script execution failed: {0}")]
    Script(String),

    #[error("No page available")]
    NoPage,

    #[error("CDP error: {0}")]
    CdpError(#[from] chromiumoxide::error::CdpError),

    #[error("Other error: {0}")]
    Other(String),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Failure while acquiring or assembling screenshot images.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("A browser issue arose while {context} | {source}")]
    Driver {
        context: String,
        #[source]
        source: DriverError,
    },

    #[error("Image error while {context} | {source}")]
    Image {
        context: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Gave up {context} after {frames} frames without reaching the end")]
    ScrollLimit { context: String, frames: usize },

    #[error("Failed to store image {name}: {reason}")]
    Storage { name: String, reason: String },
}

impl CaptureError {
    pub(crate) fn driver(context: impl Into<String>) -> impl FnOnce(DriverError) -> Self {
        let context = context.into();
        move |source| CaptureError::Driver { context, source }
    }

    pub(crate) fn image(context: impl Into<String>) -> impl FnOnce(image::ImageError) -> Self {
        let context = context.into();
        move |source| CaptureError::Image { context, source }
    }
}

pub type CaptureResult<T> = std::result::Result<T, CaptureError>;

/// Failure raised while dispatching an action list.
#[derive(Error, Debug)]
pub enum ActionDispatchError {
    #[error("Unknown action kind {0:?}")]
    UnknownKind(String),

    #[error("The {kind:?} action is missing the required field {field:?}")]
    MissingField { kind: String, field: &'static str },

    #[error("The {kind:?} action has an invalid {field:?} value | {reason}")]
    InvalidField {
        kind: String,
        field: &'static str,
        reason: String,
    },

    #[error("There were no elements found using the css selector {selector:?}. Exiting the for_each action")]
    EmptyForEach { selector: String },

    #[error("Reference cycle detected while resolving {name:?} (stack: {stack})")]
    ReferenceCycle { name: String, stack: String },

    #[error("A browser error was caught while performing a {kind:?} action | {source}")]
    Driver {
        kind: String,
        #[source]
        source: DriverError,
    },

    #[error("Screenshot failure while performing a {kind:?} action | {source}")]
    Capture {
        kind: String,
        #[source]
        source: CaptureError,
    },
}

impl ActionDispatchError {
    /// Driver failures are recorded and the surrounding list keeps going.
    /// Everything else aborts the list and surfaces to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ActionDispatchError::Driver { .. })
    }
}

pub type DispatchResult<T> = std::result::Result<T, ActionDispatchError>;

/// Failure while preparing captured images for the PDF.
#[derive(Error, Debug)]
pub enum CropError {
    #[error("Could not open {path} for cropping: {source}")]
    Open {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Could not save crop {path}: {source}")]
    Save {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Could not store crop {name}: {reason}")]
    Storage { name: String, reason: String },
}

/// Run-wide list of user-visible failures, shared by every worker.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    entries: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        // A worker that panicked mid-push leaves the list usable
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, message: impl Into<String>) {
        self.lock().push(message.into());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Entries in arrival order with repeats removed
    pub fn snapshot(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.lock()
            .iter()
            .filter(|entry| seen.insert(entry.as_str()))
            .cloned()
            .collect()
    }
}

/// Failure while loading the project configuration or action libraries.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid action in {location}: {source}")]
    InvalidAction {
        location: String,
        #[source]
        source: ActionDispatchError,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

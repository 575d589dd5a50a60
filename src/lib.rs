pub mod actions;
pub mod browser;
pub mod capture;
pub mod config;
pub mod error;
pub mod pdf;
pub mod run;

//  Re-export commonly used items
pub use actions::{Action, ActionContext, ActionInterpreter, ActionKind, InterpreterSettings, ReferenceTables};
pub use browser::{BrowserDriver, ChromeDriver, ChromeDriverFactory, DriverFactory, ElementHandle, LaunchOptions};
pub use capture::{
    CaptureSettings, Captured, CapturedImage, ImageFormat, ImageManifest, ImageSink, ImageStore,
    LocalOnlyStore, PageImageSet, Screenshot,
};
pub use config::ProjectConfig;
pub use error::{ActionDispatchError, CaptureError, ConfigError, CropError, DriverError, ErrorLog};
pub use pdf::{crop_for_pdf, PdfCropper};
pub use run::{run_capture, RunOptions, RunReport};

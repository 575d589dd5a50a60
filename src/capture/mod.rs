pub mod naming;
pub mod screenshot;
pub mod sink;
pub mod stitch;

pub use naming::screenshot_name;
pub use screenshot::{CaptureSettings, Captured, ScrollAxis, Screenshot};
pub use sink::{
    CapturedImage, ImageFormat, ImageManifest, ImageSink, ImageStore, LocalOnlyStore, PageImageSet,
    MISC_PATH_TEXT,
};

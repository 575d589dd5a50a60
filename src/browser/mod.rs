pub mod chrome;
pub mod driver;

pub use chrome::{ChromeDriver, ChromeDriverFactory, LaunchOptions};
pub use driver::{BrowserDriver, ElementAnchor, ElementHandle, ElementScroll, ScriptArg, WindowScroll};

use crate::error::DriverResult;
use async_trait::async_trait;

/// Opens one exclusive browser session per worker
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn create(&self) -> DriverResult<Box<dyn BrowserDriver>>;
}

//! Project Configuration
//!
//! A project is described by one JSON file: the site, the browser settings
//! and per-environment action lists. Environments merge in order: `common`
//! first, then `desktop` or `mobile` override whatever they set.

use crate::actions::{Action, OneOrMany};
use crate::capture::screenshot::{DEFAULT_SCROLL_PADDING, FIREFOX_HEAD_HEIGHT};
use crate::capture::ImageFormat;
use crate::error::ConfigError;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DESKTOP_BROWSER_SIZE: BrowserSize = BrowserSize {
    width: 1440,
    height: 1000,
};
pub const DEFAULT_MOBILE_BROWSER_SIZE: BrowserSize = BrowserSize {
    width: 320,
    height: 1000,
};
pub const DEFAULT_THREAD_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserSize {
    pub width: u32,
    pub height: u32,
}

/// Actions run on every page right after it loads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeforeScreenshot {
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub paths_to_skip: Vec<String>,
}

impl BeforeScreenshot {
    pub fn applies_to(&self, path: &str) -> bool {
        !self.actions.is_empty() && !self.paths_to_skip.iter().any(|p| p == path)
    }
}

/// Action list for one or more page paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageActions {
    pub path: OneOrMany,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub paginated: Option<bool>,
    #[serde(default)]
    pub headers: Option<Vec<String>>,
    #[serde(default)]
    pub footers: Option<Vec<String>>,
    #[serde(default)]
    pub browser_size: Option<BrowserSize>,
    #[serde(default)]
    pub scroll_padding: Option<u32>,
    #[serde(default)]
    pub before_screenshot: Option<BeforeScreenshot>,
    #[serde(default)]
    pub content_container_selector: Option<String>,
    #[serde(default)]
    pub pages: Vec<PageActions>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environments {
    #[serde(default)]
    pub common: Option<EnvironmentConfig>,
    #[serde(default)]
    pub desktop: Option<EnvironmentConfig>,
    #[serde(default)]
    pub mobile: Option<EnvironmentConfig>,
    /// Named lists for `reference` actions; `path` is the reference name
    #[serde(default)]
    pub reference: Option<EnvironmentConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,
    #[serde(default)]
    pub no_sandbox: bool,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
    /// Account for a Firefox-style toolbar above the viewport
    #[serde(default)]
    pub firefox_head: bool,
}

fn default_true() -> bool {
    true
}

fn default_scale_factor() -> f64 {
    1.0
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            no_sandbox: false,
            scale_factor: 1.0,
            firefox_head: false,
        }
    }
}

impl BrowserConfig {
    pub fn head_padding(&self) -> u32 {
        if self.firefox_head {
            FIREFOX_HEAD_HEIGHT
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project: String,
    pub base_url: String,
    /// Paths to capture, relative to `base_url`
    #[serde(default)]
    pub site_paths: Vec<String>,
    #[serde(default)]
    pub thread_count: Option<usize>,
    #[serde(default)]
    pub mobile: bool,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub file_extension: ImageFormat,
    /// Seconds to wait after each window resize
    #[serde(default)]
    pub resize_delay: f64,
    #[serde(default)]
    pub custom_inputs: HashMap<String, String>,
    #[serde(default)]
    pub crop_images_for_pdf: bool,
    /// Actions run once per worker after the browser opens, e.g. a login
    #[serde(default)]
    pub setup_actions: Vec<Action>,
    #[serde(default)]
    pub environments: Environments,
}

/// Capture settings for the environment a run targets
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEnvironment {
    pub mobile: bool,
    pub paginated: bool,
    pub headers: Vec<String>,
    pub footers: Vec<String>,
    pub browser_size: BrowserSize,
    pub scroll_padding: u32,
    pub before_screenshot: Option<BeforeScreenshot>,
    pub content_container_selector: String,
}

/// Page action lists keyed by path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageActionTables {
    pub common: HashMap<String, Vec<Action>>,
    pub desktop: HashMap<String, Vec<Action>>,
    pub mobile: HashMap<String, Vec<Action>>,
}

impl PageActionTables {
    /// Lists to run for `path`: common first, then the environment's own.
    ///
    /// `None` when neither has an entry, meaning the page gets a plain capture.
    pub fn select(&self, path: &str, mobile: bool) -> Option<Vec<&[Action]>> {
        let environment = if mobile { &self.mobile } else { &self.desktop };
        let lists: Vec<&[Action]> = [self.common.get(path), environment.get(path)]
            .into_iter()
            .flatten()
            .map(Vec::as_slice)
            .collect();
        if lists.is_empty() {
            None
        } else {
            Some(lists)
        }
    }
}

fn by_path(environment: Option<&EnvironmentConfig>) -> HashMap<String, Vec<Action>> {
    let mut table = HashMap::new();
    for page in environment.map(|e| e.pages.as_slice()).unwrap_or_default() {
        for path in page.path.names() {
            table.insert(path.to_string(), page.actions.clone());
        }
    }
    table
}

impl ProjectConfig {
    pub fn from_json(content: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    pub async fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let config = Self::from_json(&content, &path.display().to_string())?;
        config
            .validate()
            .with_context(|| format!("Invalid project configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Check the site URL and every action list
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("base_url {:?}: {}", self.base_url, e)))?;
        if self.thread_count == Some(0) {
            return Err(ConfigError::Invalid("thread_count must be at least 1".to_string()));
        }
        self.resize_delay()?;

        let check = |location: String, actions: &[Action]| {
            Action::validate_list(actions)
                .map_err(|source| ConfigError::InvalidAction { location, source })
        };

        check("setup_actions".to_string(), &self.setup_actions)?;
        let environments = [
            ("common", &self.environments.common),
            ("desktop", &self.environments.desktop),
            ("mobile", &self.environments.mobile),
            ("reference", &self.environments.reference),
        ];
        for (name, environment) in environments {
            let Some(environment) = environment else {
                continue;
            };
            if let Some(before) = &environment.before_screenshot {
                check(format!("{}.before_screenshot", name), &before.actions)?;
            }
            for page in &environment.pages {
                check(format!("{} page {:?}", name, page.path.names()), &page.actions)?;
            }
        }
        Ok(())
    }

    pub fn threads(&self) -> usize {
        self.thread_count.unwrap_or(DEFAULT_THREAD_COUNT).max(1)
    }

    pub fn resize_delay(&self) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(self.resize_delay.max(0.0))
            .map_err(|e| ConfigError::Invalid(format!("resize_delay {}: {}", self.resize_delay, e)))
    }

    /// Merge `common` with `desktop` or `mobile`
    pub fn resolve_environment(&self, mobile: bool) -> ResolvedEnvironment {
        let specific = if mobile {
            self.environments.mobile.as_ref()
        } else {
            self.environments.desktop.as_ref()
        };
        if self.environments.desktop.is_none() && self.environments.mobile.is_none() {
            log::warn!("The configuration for {} has no desktop or mobile environment", self.project);
        }

        let layers: Vec<&EnvironmentConfig> = [self.environments.common.as_ref(), specific]
            .into_iter()
            .flatten()
            .collect();
        let default_size = if mobile {
            DEFAULT_MOBILE_BROWSER_SIZE
        } else {
            DEFAULT_DESKTOP_BROWSER_SIZE
        };

        ResolvedEnvironment {
            mobile,
            paginated: layers.iter().rev().find_map(|l| l.paginated).unwrap_or(false),
            headers: layers.iter().rev().find_map(|l| l.headers.clone()).unwrap_or_default(),
            footers: layers.iter().rev().find_map(|l| l.footers.clone()).unwrap_or_default(),
            browser_size: layers.iter().rev().find_map(|l| l.browser_size).unwrap_or(default_size),
            scroll_padding: layers
                .iter()
                .rev()
                .find_map(|l| l.scroll_padding)
                .unwrap_or(DEFAULT_SCROLL_PADDING),
            before_screenshot: layers.iter().rev().find_map(|l| l.before_screenshot.clone()),
            content_container_selector: layers
                .iter()
                .rev()
                .find_map(|l| l.content_container_selector.clone())
                .unwrap_or_else(|| "html".to_string()),
        }
    }

    pub fn page_actions(&self) -> PageActionTables {
        PageActionTables {
            common: by_path(self.environments.common.as_ref()),
            desktop: by_path(self.environments.desktop.as_ref()),
            mobile: by_path(self.environments.mobile.as_ref()),
        }
    }

    pub fn reference_actions(&self) -> HashMap<String, Vec<Action>> {
        by_path(self.environments.reference.as_ref())
    }
}

/// Load every `<library>.json` in `dir`; each file maps list names to action lists
pub async fn load_action_libraries(dir: &Path) -> anyhow::Result<HashMap<String, HashMap<String, Vec<Action>>>> {
    let mut libraries = HashMap::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read the action library directory {}", dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read action library {}", path.display()))?;
        let lists: HashMap<String, Vec<Action>> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse action library {}", path.display()))?;
        for (list, actions) in &lists {
            Action::validate_list(actions).map_err(|source| ConfigError::InvalidAction {
                location: format!("{}/{}", name, list),
                source,
            })?;
        }

        log::debug!("Loaded action library {:?} with {} lists", name, lists.len());
        libraries.insert(name, lists);
    }

    Ok(libraries)
}

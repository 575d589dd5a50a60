//! Captured image persistence
//!
//! [`ImageSink`] encodes captures, writes the local copy a PDF builder reads
//! by path, and forwards the bytes to an [`ImageStore`].

use crate::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const BASE_CAPTURE_SUFFIX: &str = "base_capture";
pub const MISC_PATH_TEXT: &str = "Miscellaneous Images";

/// Remote persistence for captured images
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Store `bytes` under `name`, returning the remote location if there is one
    async fn store(&self, name: &str, bytes: &[u8]) -> anyhow::Result<Option<String>>;
}

/// Keeps images on local disk only
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnlyStore;

#[async_trait]
impl ImageStore for LocalOnlyStore {
    async fn store(&self, _name: &str, _bytes: &[u8]) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
    Bmp,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Bmp => "bmp",
        }
    }

    fn codec(self) -> image::ImageFormat {
        match self {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Bmp => image::ImageFormat::Bmp,
        }
    }

    /// Encode `image`; formats without alpha get an RGB copy
    pub fn encode(self, image: &RgbaImage) -> image::ImageResult<Vec<u8>> {
        let mut bytes = Cursor::new(Vec::new());
        match self {
            ImageFormat::Png => image.write_to(&mut bytes, self.codec())?,
            ImageFormat::Jpeg | ImageFormat::Bmp => DynamicImage::ImageRgba8(image.clone())
                .into_rgb8()
                .write_to(&mut bytes, self.codec())?,
        }
        Ok(bytes.into_inner())
    }
}

/// One stored screenshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedImage {
    pub filename: String,
    pub suffix: String,
    /// Page the image was captured for
    pub url: String,
    pub local_path: PathBuf,
    #[serde(default)]
    pub remote_location: Option<String>,
    pub width: u32,
    pub height: u32,
    pub sha256: String,
}

/// All images captured for one page, in capture order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageImageSet {
    pub url: String,
    pub path: String,
    #[serde(rename = "image_data")]
    pub images: Vec<CapturedImage>,
}

impl PageImageSet {
    pub fn new(url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            images: Vec::new(),
        }
    }

    /// The synthetic bucket for images not tied to a crawled page
    pub fn misc() -> Self {
        Self::new(MISC_PATH_TEXT, MISC_PATH_TEXT)
    }

    pub fn is_misc(&self) -> bool {
        self.path == MISC_PATH_TEXT
    }
}

/// Ordered page sets; the last entry is the misc bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub pages: Vec<PageImageSet>,
}

impl ImageManifest {
    pub fn new(pages: Vec<PageImageSet>, misc: PageImageSet) -> Self {
        let mut pages = pages;
        pages.push(misc);
        Self { pages }
    }

    pub fn misc(&self) -> Option<&PageImageSet> {
        self.pages.last().filter(|p| p.is_misc())
    }

    pub fn images(&self) -> impl Iterator<Item = &CapturedImage> {
        self.pages.iter().flat_map(|p| p.images.iter())
    }

    pub fn image_count(&self) -> usize {
        self.pages.iter().map(|p| p.images.len()).sum()
    }
}

pub struct ImageSink {
    output_dir: PathBuf,
    format: ImageFormat,
    store: Arc<dyn ImageStore>,
    taken: Mutex<HashSet<String>>,
}

impl ImageSink {
    pub fn new(output_dir: impl Into<PathBuf>, format: ImageFormat, store: Arc<dyn ImageStore>) -> Self {
        Self {
            output_dir: output_dir.into(),
            format,
            store,
            taken: Mutex::new(HashSet::new()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn store(&self) -> &Arc<dyn ImageStore> {
        &self.store
    }

    fn reserve_filename(&self, stem: &str) -> String {
        self.reserve(stem, self.format.extension())
    }

    /// Claim `stem.extension`, or the first free `stem-N.extension` when already used this run
    pub fn reserve(&self, stem: &str, extension: &str) -> String {
        let mut taken = self.taken.lock().unwrap_or_else(|p| p.into_inner());

        let mut filename = format!("{}.{}", stem, extension);
        let mut n = 2;
        while !taken.insert(filename.clone()) {
            filename = format!("{}-{}.{}", stem, n, extension);
            n += 1;
        }
        filename
    }

    /// Encode, write and store one capture
    pub async fn save(
        &self,
        image: &RgbaImage,
        stem: &str,
        suffix: Option<&str>,
        page_url: &str,
    ) -> CaptureResult<CapturedImage> {
        let filename = self.reserve_filename(stem);
        let bytes = self
            .format
            .encode(image)
            .map_err(CaptureError::image(format!("encoding {}", filename)))?;

        let local_path = self.output_dir.join(&filename);
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| storage_error(&filename, e))?;
        tokio::fs::write(&local_path, &bytes)
            .await
            .map_err(|e| storage_error(&filename, e))?;

        let remote_location = self
            .store
            .store(&filename, &bytes)
            .await
            .map_err(|e| storage_error(&filename, e))?;

        log::info!("Saved {} ({}x{})", filename, image.width(), image.height());

        Ok(CapturedImage {
            suffix: suffix
                .filter(|s| !s.is_empty())
                .unwrap_or(BASE_CAPTURE_SUFFIX)
                .to_string(),
            url: page_url.to_string(),
            local_path,
            remote_location,
            width: image.width(),
            height: image.height(),
            sha256: format!("{:x}", Sha256::digest(&bytes)),
            filename,
        })
    }
}

fn storage_error(name: &str, reason: impl std::fmt::Display) -> CaptureError {
    CaptureError::Storage {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

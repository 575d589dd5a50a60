//! PDF Preparation
//!
//! PDF viewers refuse very tall pages, so before the manifest is handed to a
//! PDF builder every image taller than [`PDF_MAX_PAGE_HEIGHT`] is cut into
//! overlapping slices saved beside the original. Slice names are claimed
//! from the run's [`ImageSink`] so they never replace another capture.

use crate::capture::{CapturedImage, ImageManifest, ImageSink};
use crate::error::CropError;
use image::{imageops, DynamicImage, RgbaImage};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const PDF_MAX_PAGE_HEIGHT: u32 = 19200;
/// Rows repeated at the top of each slice after the first
pub const PDF_CROP_PADDING: u32 = 40;

/// Cut `image` into slices no taller than `max_height`, each overlapping the
/// previous one by `padding` rows.
///
/// Returns an empty list when the image already fits. Slice `i` spans
/// `i·(max_height − padding)` to `min(that + max_height, height)`; there are
/// `ceil(height / max_height)` slices, plus more when the overlap would leave
/// the bottom of the image uncovered.
pub fn crop_for_pdf(image: &RgbaImage, max_height: u32, padding: u32) -> Vec<RgbaImage> {
    let (width, height) = image.dimensions();
    if max_height == 0 || height <= max_height {
        return Vec::new();
    }

    let step = max_height - padding.min(max_height - 1);
    let count = height.div_ceil(max_height);

    let mut slices = Vec::new();
    let mut index = 0;
    loop {
        let top = index * step;
        let bottom = (top + max_height).min(height);
        slices.push(imageops::crop_imm(image, 0, top, width, bottom - top).to_image());

        index += 1;
        if index >= count && bottom >= height {
            return slices;
        }
    }
}

fn save_slice(slice: &RgbaImage, path: &Path) -> image::ImageResult<()> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") | Some("bmp") => {
            DynamicImage::ImageRgba8(slice.clone()).into_rgb8().save(path)
        }
        _ => slice.save(path),
    }
}

pub struct PdfCropper {
    max_height: u32,
    padding: u32,
    sink: Arc<ImageSink>,
}

impl PdfCropper {
    pub fn new(sink: Arc<ImageSink>) -> Self {
        Self::with_limits(sink, PDF_MAX_PAGE_HEIGHT, PDF_CROP_PADDING)
    }

    pub fn with_limits(sink: Arc<ImageSink>, max_height: u32, padding: u32) -> Self {
        Self {
            max_height,
            padding,
            sink,
        }
    }

    /// Copy of `manifest` with every oversized image replaced by its slices.
    ///
    /// Page order and image order within a page are preserved. The first
    /// failure aborts the whole preparation.
    pub async fn crop_manifest(&self, manifest: &ImageManifest) -> Result<ImageManifest, CropError> {
        let mut prepared = manifest.clone();

        for page in prepared.pages.iter_mut() {
            if page.images.is_empty() && !page.is_misc() {
                log::warn!(
                    "No images were captured for {}. Check the log above for errors on this page",
                    page.url
                );
                continue;
            }

            let mut images = Vec::with_capacity(page.images.len());
            for record in page.images.drain(..) {
                let crops = self.crop_image(&record).await?;
                if crops.is_empty() {
                    images.push(record);
                } else {
                    log::info!("Cropped {} into {} images for the PDF", record.filename, crops.len());
                    images.extend(crops);
                }
            }
            page.images = images;
        }

        Ok(prepared)
    }

    async fn crop_image(&self, record: &CapturedImage) -> Result<Vec<CapturedImage>, CropError> {
        let image = image::open(&record.local_path)
            .map_err(|source| CropError::Open {
                path: record.local_path.display().to_string(),
                source,
            })?
            .to_rgba8();

        let slices = crop_for_pdf(&image, self.max_height, self.padding);
        let stem = Path::new(&record.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&record.filename);
        let extension = Path::new(&record.filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png");

        let mut crops = Vec::with_capacity(slices.len());
        for (index, slice) in slices.iter().enumerate() {
            let number = index + 1;
            let filename = self.sink.reserve(&format!("{}_00{}", stem, number), extension);
            let local_path: PathBuf = record.local_path.with_file_name(&filename);

            save_slice(slice, &local_path).map_err(|source| CropError::Save {
                path: local_path.display().to_string(),
                source,
            })?;

            let bytes = tokio::fs::read(&local_path)
                .await
                .map_err(|e| storage_error(&filename, e))?;
            let remote_location = self
                .sink
                .store()
                .store(&filename, &bytes)
                .await
                .map_err(|e| storage_error(&filename, e))?;

            crops.push(CapturedImage {
                suffix: format!("{}_00{}", record.suffix, number),
                url: record.url.clone(),
                local_path,
                remote_location,
                width: slice.width(),
                height: slice.height(),
                sha256: format!("{:x}", Sha256::digest(&bytes)),
                filename,
            });
        }
        Ok(crops)
    }
}

fn storage_error(name: &str, reason: impl std::fmt::Display) -> CropError {
    CropError::Storage {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

//! Screenshot Capture
//!
//! Drives a [`BrowserDriver`] to produce page images: a single viewport,
//! a full page with sticky header/footer suppression, a paginated sequence,
//! or a tall page sliced to the platform's maximum image height.

use super::stitch;
use crate::browser::{BrowserDriver, ElementHandle, ElementScroll, WindowScroll};
use crate::error::{CaptureError, CaptureResult};
use image::RgbaImage;
use std::time::Duration;

pub const DEFAULT_SCROLL_PADDING: u32 = 100;
pub const DEFAULT_PIXEL_MATCH_OFFSET: u32 = 100;
/// Browser chrome above the viewport in Firefox-style windows
pub const FIREFOX_HEAD_HEIGHT: u32 = 75;
pub const MAX_IMAGE_HEIGHT: f64 = 32768.0;
/// Upper bound on frames taken by any scroll-and-capture loop
pub const MAX_SCROLL_FRAMES: usize = 200;

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub paginated: bool,
    pub headers: Vec<String>,
    pub footers: Vec<String>,
    pub scroll_padding: u32,
    pub pixel_match_offset: u32,
    pub headless: bool,
    pub head_padding: u32,
    pub scale_factor: f64,
    pub resize_delay: Duration,
    /// Wait after each paginated scroll
    pub scroll_settle: Duration,
    /// Wait after scrolling past sticky elements
    pub sticky_settle: Duration,
    pub content_container_selector: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            paginated: false,
            headers: Vec::new(),
            footers: Vec::new(),
            scroll_padding: DEFAULT_SCROLL_PADDING,
            pixel_match_offset: DEFAULT_PIXEL_MATCH_OFFSET,
            headless: false,
            head_padding: 0,
            scale_factor: 1.0,
            resize_delay: Duration::ZERO,
            scroll_settle: Duration::from_millis(250),
            sticky_settle: Duration::from_millis(500),
            content_container_selector: "html".to_string(),
        }
    }
}

impl CaptureSettings {
    /// Tallest single screenshot, in CSS pixels
    pub fn max_height(&self) -> u32 {
        (MAX_IMAGE_HEIGHT / self.scale_factor.max(f64::EPSILON)).floor() as u32
    }
}

/// Result of a page capture
#[derive(Debug, Clone)]
pub enum Captured {
    Single(RgbaImage),
    Sequence(Vec<RgbaImage>),
}

impl Captured {
    pub fn into_images(self) -> Vec<RgbaImage> {
        match self {
            Captured::Single(image) => vec![image],
            Captured::Sequence(images) => images,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Captured::Single(_) => 1,
            Captured::Sequence(images) => images.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Axis of a scrolling element capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAxis {
    Vertical,
    Horizontal,
}

pub struct Screenshot<'a> {
    driver: &'a dyn BrowserDriver,
    settings: CaptureSettings,
}

impl<'a> Screenshot<'a> {
    pub fn new(driver: &'a dyn BrowserDriver, settings: CaptureSettings) -> Self {
        Self { driver, settings }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Capture the page the way the settings call for
    pub async fn capture_page(&self, viewport_only: bool, padding: Option<u32>) -> CaptureResult<Captured> {
        if self.settings.headless {
            self.capture_headless_page(viewport_only, padding).await
        } else if viewport_only {
            Ok(Captured::Single(self.viewport_image().await?))
        } else if self.settings.paginated {
            Ok(Captured::Sequence(self.capture_paginated(padding, false).await?))
        } else {
            Ok(Captured::Single(self.capture_full_page().await?))
        }
    }

    /// Scroll `element` from its start to its end, capturing each position
    pub async fn capture_scrolling_element(
        &self,
        element: &ElementHandle,
        axis: ScrollAxis,
        viewport_only: bool,
        padding: Option<u32>,
    ) -> CaptureResult<Vec<RgbaImage>> {
        let padding = padding.unwrap_or(self.settings.scroll_padding) as i64;
        let context = format!("capturing the scrolling element {}", element);
        let (start, step) = match axis {
            ScrollAxis::Vertical => (ElementScroll::Top, ElementScroll::PageDown { padding }),
            ScrollAxis::Horizontal => (ElementScroll::Left, ElementScroll::PageRight { padding }),
        };

        self.driver
            .scroll_element(element, start)
            .await
            .map_err(CaptureError::driver(&context))?;

        let mut images = Vec::new();
        while images.len() < MAX_SCROLL_FRAMES {
            let frame = if self.settings.headless && axis == ScrollAxis::Vertical {
                self.capture_headless_page(viewport_only, None)
                    .await?
                    .into_images()
            } else if viewport_only {
                vec![self.viewport_image().await?]
            } else {
                vec![self.capture_full_page().await?]
            };
            images.extend(frame);

            let at_end = match axis {
                ScrollAxis::Vertical => self.driver.element_at_bottom(element).await,
                ScrollAxis::Horizontal => self.driver.element_at_right(element).await,
            }
            .map_err(CaptureError::driver(&context))?;
            if at_end {
                return Ok(images);
            }

            self.driver
                .scroll_element(element, step)
                .await
                .map_err(CaptureError::driver(&context))?;
        }

        Err(CaptureError::ScrollLimit {
            context,
            frames: MAX_SCROLL_FRAMES,
        })
    }

    fn decode(&self, bytes: Vec<u8>) -> CaptureResult<RgbaImage> {
        Ok(image::load_from_memory(&bytes)
            .map_err(CaptureError::image("decoding a screenshot"))?
            .to_rgba8())
    }

    /// Viewport dimensions in device pixels
    async fn device_viewport(&self) -> CaptureResult<(u32, u32)> {
        let (width, height) = self
            .driver
            .viewport_size()
            .await
            .map_err(CaptureError::driver("reading the viewport size"))?;
        let scale = self.settings.scale_factor;
        Ok(((width as f64 * scale).round() as u32, (height as f64 * scale).round() as u32))
    }

    /// The visible area only
    async fn viewport_image(&self) -> CaptureResult<RgbaImage> {
        let bytes = self
            .driver
            .screenshot()
            .await
            .map_err(CaptureError::driver("taking a viewport screenshot"))?;
        let image = self.decode(bytes)?;
        let (width, height) = self.device_viewport().await?;
        Ok(stitch::crop_to(&image, width, height))
    }

    /// The whole document, trimmed to the viewport width
    async fn document_image(&self) -> CaptureResult<RgbaImage> {
        let bytes = self
            .driver
            .screenshot_full_page()
            .await
            .map_err(CaptureError::driver("taking a full page screenshot"))?;
        let image = self.decode(bytes)?;
        let (width, _) = self.device_viewport().await?;
        Ok(stitch::crop_to(&image, width, image.height()))
    }

    async fn scroll_window(&self, position: WindowScroll, context: &str) -> CaptureResult<()> {
        self.driver
            .scroll_window_to(position)
            .await
            .map_err(CaptureError::driver(context))
    }

    /// Full page capture with sticky elements shown only where they belong
    async fn capture_full_page(&self) -> CaptureResult<RgbaImage> {
        let headers = &self.settings.headers;
        let footers = &self.settings.footers;

        match (headers.is_empty(), footers.is_empty()) {
            (false, false) => {
                self.scroll_window(WindowScroll::Top, "scrolling to the top for the header capture")
                    .await?;
                self.set_visibility(footers, false).await;
                let header_image = self.viewport_image().await?;
                self.set_visibility(footers, true).await;

                self.scroll_window(WindowScroll::Bottom, "scrolling to the bottom for the footer capture")
                    .await?;
                self.set_visibility(headers, false).await;
                let footer_image = self.document_image().await;
                self.set_visibility(headers, true).await;

                Ok(stitch::crop_and_stitch(
                    &header_image,
                    &footer_image?,
                    self.settings.pixel_match_offset,
                ))
            }
            (false, true) => {
                // Headers stay at the top, so they cover nothing there
                self.scroll_window(WindowScroll::Top, "scrolling past the sticky headers")
                    .await?;
                tokio::time::sleep(self.settings.sticky_settle).await;
                self.document_image().await
            }
            (true, false) => {
                self.scroll_window(WindowScroll::Bottom, "scrolling past the sticky footers")
                    .await?;
                tokio::time::sleep(self.settings.sticky_settle).await;
                self.document_image().await
            }
            (true, true) => self.document_image().await,
        }
    }

    /// Show or hide every element in `selectors`; missing ones are skipped
    async fn set_visibility(&self, selectors: &[String], visible: bool) {
        for selector in selectors {
            let result = match self.driver.find_element(selector).await {
                Ok(element) if visible => self.driver.show_element(&element).await,
                Ok(element) => self.driver.hide_element(&element).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                log::debug!("Skipping sticky element {}: {}", selector, e);
            }
        }
    }

    /// Viewport by viewport, each frame overlapping the last by `padding`
    async fn capture_paginated(&self, padding: Option<u32>, raw: bool) -> CaptureResult<Vec<RgbaImage>> {
        let context = "capturing a paginated page";
        let padding = padding.unwrap_or(self.settings.scroll_padding) as i64;

        self.scroll_window(WindowScroll::Top, context).await?;
        let (_, viewport_height) = self
            .driver
            .viewport_size()
            .await
            .map_err(CaptureError::driver(context))?;

        let mut images = Vec::new();
        let mut position = 0i64;
        while images.len() < MAX_SCROLL_FRAMES {
            let image = if raw {
                let bytes = self
                    .driver
                    .screenshot()
                    .await
                    .map_err(CaptureError::driver(context))?;
                self.decode(bytes)?
            } else {
                self.viewport_image().await?
            };
            images.push(image);

            let target = position + viewport_height as i64 - padding;
            self.scroll_window(WindowScroll::To { x: 0, y: target }, context)
                .await?;
            tokio::time::sleep(self.settings.scroll_settle).await;

            let new_position = self
                .driver
                .window_scroll_position()
                .await
                .map_err(CaptureError::driver(context))?;
            if new_position == position {
                return Ok(images);
            }
            position = new_position;
        }

        Err(CaptureError::ScrollLimit {
            context: context.to_string(),
            frames: MAX_SCROLL_FRAMES,
        })
    }

    /// Grow the window to the content and capture it, slicing past the maximum height
    async fn capture_headless_page(&self, viewport_only: bool, padding: Option<u32>) -> CaptureResult<Captured> {
        if viewport_only {
            let bytes = self
                .driver
                .screenshot()
                .await
                .map_err(CaptureError::driver("taking a headless screenshot"))?;
            return Ok(Captured::Single(self.decode(bytes)?));
        }
        if self.settings.paginated {
            return Ok(Captured::Sequence(self.capture_paginated(padding, true).await?));
        }

        let context = "capturing a headless full page";
        let (width, height) = self
            .driver
            .window_size()
            .await
            .map_err(CaptureError::driver(context))?;
        let scroll_position = self
            .driver
            .window_scroll_position()
            .await
            .map_err(CaptureError::driver(context))?;

        let image = self.capture_tall_page(width, height).await;

        // Put the window back regardless of how the capture went
        let restored = self.restore_window(width, height, scroll_position).await;
        let image = image?;
        restored?;
        Ok(Captured::Single(image))
    }

    async fn capture_tall_page(&self, width: u32, height: u32) -> CaptureResult<RgbaImage> {
        let context = "capturing a headless full page";
        let max_height = self.settings.max_height();
        let head_padding = self.settings.head_padding;

        let content_height = self
            .driver
            .content_height(&self.settings.content_container_selector)
            .await
            .map_err(CaptureError::driver(context))?;

        let target_height = if content_height > max_height {
            Some(max_height)
        } else if height < content_height {
            Some(content_height)
        } else {
            None
        };
        if let Some(target) = target_height {
            self.driver
                .resize_window(width, target + head_padding)
                .await
                .map_err(CaptureError::driver(context))?;
            tokio::time::sleep(self.settings.resize_delay).await;
        }

        if content_height <= max_height {
            let bytes = self
                .driver
                .screenshot()
                .await
                .map_err(CaptureError::driver(context))?;
            return self.decode(bytes);
        }

        self.scroll_window(WindowScroll::Top, context).await?;
        tokio::time::sleep(self.settings.resize_delay).await;

        let slices = content_height.div_ceil(max_height);
        log::debug!(
            "Content is {}px tall, capturing {} slices of {}px",
            content_height,
            slices,
            max_height
        );

        let mut images = Vec::with_capacity(slices as usize);
        for i in 1..=slices {
            let bytes = self
                .driver
                .screenshot()
                .await
                .map_err(CaptureError::driver(context))?;
            images.push(self.decode(bytes)?);
            self.scroll_window(
                WindowScroll::To {
                    x: 0,
                    y: (max_height as i64) * i as i64,
                },
                context,
            )
            .await?;
        }

        let content_pixels = (content_height as f64 * self.settings.scale_factor).round() as u32;
        Ok(stitch::combine_vertical(images, content_pixels))
    }

    async fn restore_window(&self, width: u32, height: u32, scroll_position: i64) -> CaptureResult<()> {
        let context = "restoring the window after a headless capture";
        self.driver
            .resize_window(width, height)
            .await
            .map_err(CaptureError::driver(context))?;
        self.scroll_window(WindowScroll::To { x: 0, y: scroll_position }, context)
            .await?;
        tokio::time::sleep(self.settings.resize_delay).await;
        Ok(())
    }
}

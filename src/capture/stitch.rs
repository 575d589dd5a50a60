//! Pixel-level image assembly
//!
//! Seam detection between a header and a footer capture, and vertical
//! concatenation of oversized page slices.

use image::{imageops, Rgba, RgbaImage};

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

fn row(image: &RgbaImage, y: u32) -> &[u8] {
    let stride = image.width() as usize * 4;
    let start = y as usize * stride;
    &image.as_raw()[start..start + stride]
}

/// Find the footer row where fresh content starts.
///
/// The bottom `offset` rows of `header` must appear as a contiguous band in
/// `footer`. The first footer row that starts a complete band wins; a
/// candidate whose band breaks off does not end the scan. Returns the row
/// just below the band, or `None` when no band is found.
pub fn find_seam(header: &RgbaImage, footer: &RgbaImage, offset: u32) -> Option<u32> {
    if header.width() != footer.width() || header.height() == 0 {
        return None;
    }

    let offset = offset.min(header.height());
    if offset == 0 || offset > footer.height() {
        return None;
    }

    let band_start = header.height() - offset;
    let first_band_row = row(header, band_start);

    (0..=footer.height() - offset).find_map(|candidate| {
        if row(footer, candidate) != first_band_row {
            return None;
        }
        let complete = (1..offset).all(|y| row(footer, candidate + y) == row(header, band_start + y));
        complete.then_some(candidate + offset)
    })
}

/// Join a header capture and a footer capture into one image.
///
/// The footer is cropped above the seam (or at the header's height when no
/// seam exists) and pasted directly below the header.
pub fn crop_and_stitch(header: &RgbaImage, footer: &RgbaImage, pixel_match_offset: u32) -> RgbaImage {
    let crop_row = find_seam(header, footer, pixel_match_offset)
        .unwrap_or_else(|| header.height())
        .min(footer.height());

    log::debug!(
        "Stitching {}px header onto footer cropped at row {}",
        header.height(),
        crop_row
    );

    let cropped_footer =
        imageops::crop_imm(footer, 0, crop_row, footer.width(), footer.height() - crop_row).to_image();

    let mut stitched = RgbaImage::from_pixel(
        footer.width(),
        header.height() + cropped_footer.height(),
        BACKGROUND,
    );
    imageops::replace(&mut stitched, header, 0, 0);
    imageops::replace(&mut stitched, &cropped_footer, 0, header.height() as i64);
    stitched
}

/// Stack slices top to bottom.
///
/// Every slice but the last is used whole. The last is cut down to its
/// bottom `content_height - sum(prior heights)` rows so overlapping content
/// from the final scroll is not repeated.
pub fn combine_vertical(mut images: Vec<RgbaImage>, content_height: u32) -> RgbaImage {
    let Some(last) = images.pop() else {
        return RgbaImage::new(0, 0);
    };

    let full_height: u32 = images.iter().map(|i| i.height()).sum();
    let remaining = content_height.saturating_sub(full_height).min(last.height());
    if remaining > 0 {
        let top = last.height() - remaining;
        images.push(imageops::crop_imm(&last, 0, top, last.width(), remaining).to_image());
    }

    let width = images.iter().map(|i| i.width()).max().unwrap_or(0);
    let height = images.iter().map(|i| i.height()).sum();
    let mut combined = RgbaImage::from_pixel(width, height, BACKGROUND);

    let mut y = 0i64;
    for image in &images {
        imageops::replace(&mut combined, image, 0, y);
        y += image.height() as i64;
    }
    combined
}

/// Crop to the top-left `width` x `height` region, clamped to the image.
pub fn crop_to(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let width = width.min(image.width());
    let height = height.min(image.height());
    if width == image.width() && height == image.height() {
        return image.clone();
    }
    imageops::crop_imm(image, 0, 0, width, height).to_image()
}

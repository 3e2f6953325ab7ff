//! Pixel effects applied in place to one box of an image.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use shroud_models::{BoundingBox, RedactionMode};

use crate::config::RedactionConfig;
use crate::error::{MediaError, MediaResult};

/// Apply `mode` to `bbox`. Pixels outside the box are never touched.
pub fn apply(image: &mut RgbImage, bbox: BoundingBox, mode: RedactionMode, config: &RedactionConfig) -> MediaResult<()> {
    check_bounds(image, bbox)?;
    if bbox.is_degenerate() {
        return Ok(());
    }

    match mode {
        RedactionMode::BlackBox => black_box(image, bbox),
        RedactionMode::Blur => blur(image, bbox, config.blur_kernel_size),
        RedactionMode::Pixelate => pixelate(image, bbox, config.pixelate_block_size),
    }
}

fn check_bounds(image: &RgbImage, bbox: BoundingBox) -> MediaResult<()> {
    let (width, height) = image.dimensions();
    if bbox.is_within(width, height) {
        Ok(())
    } else {
        Err(MediaError::redaction(format!(
            "region ({}, {}, {}, {}) exceeds {width}x{height} image",
            bbox.x1, bbox.y1, bbox.x2, bbox.y2
        )))
    }
}

pub fn black_box(image: &mut RgbImage, bbox: BoundingBox) -> MediaResult<()> {
    for y in bbox.y1..bbox.y2 {
        for x in bbox.x1..bbox.x2 {
            image.put_pixel(x, y, Rgb([0, 0, 0]));
        }
    }
    Ok(())
}

/// Gaussian sigma for an odd kernel size when none is given explicitly.
pub fn sigma_for_kernel(kernel_size: u32) -> f32 {
    0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Sigma passed to `imageops::blur` for a `kernel_size` kernel.
///
/// `imageops::blur` samples within `2 * sigma` of each pixel, so sigma is
/// raised to half the kernel radius when the kernel-size convention alone
/// would reach fewer than `(kernel_size - 1) / 2` pixels.
pub fn blur_sigma(kernel_size: u32) -> f32 {
    let radius = (kernel_size.saturating_sub(1) / 2) as f32;
    sigma_for_kernel(kernel_size).max(radius / 2.0)
}

pub fn blur(image: &mut RgbImage, bbox: BoundingBox, kernel_size: u32) -> MediaResult<()> {
    if kernel_size < 3 || kernel_size % 2 == 0 {
        return Err(MediaError::redaction(format!(
            "blur kernel size must be odd and at least 3, got {kernel_size}"
        )));
    }

    let crop = imageops::crop_imm(&*image, bbox.x1, bbox.y1, bbox.width(), bbox.height()).to_image();
    let blurred = imageops::blur(&crop, blur_sigma(kernel_size));
    imageops::replace(image, &blurred, bbox.x1 as i64, bbox.y1 as i64);
    Ok(())
}

pub fn pixelate(image: &mut RgbImage, bbox: BoundingBox, block_size: u32) -> MediaResult<()> {
    if block_size == 0 {
        return Err(MediaError::redaction("pixelate block size must be positive"));
    }

    let (width, height) = (bbox.width(), bbox.height());
    let crop = imageops::crop_imm(&*image, bbox.x1, bbox.y1, width, height).to_image();
    let small = imageops::resize(
        &crop,
        (width / block_size).max(1),
        (height / block_size).max(1),
        FilterType::Triangle,
    );
    let blocks = imageops::resize(&small, width, height, FilterType::Nearest);
    imageops::replace(image, &blocks, bbox.x1 as i64, bbox.y1 as i64);
    Ok(())
}

//! Utility functions for tensor conversion

use crate::error::{Result, SegmentError};
use image::RgbaImage;

/// Convert RGBA pixels to a planar RGB `[3, H, W]` buffer scaled to `[0, 1]`.
/// Alpha is dropped.
pub fn rgba_to_chw(image: &RgbaImage) -> Result<Vec<f32>> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(SegmentError::Input("Invalid image dimensions".to_string()));
    }

    // Check for potential overflow
    let plane = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| SegmentError::Input("Image too large, would overflow".to_string()))?;
    let total = plane
        .checked_mul(3)
        .ok_or_else(|| SegmentError::Input("Image too large, would overflow".to_string()))?;

    let mut chw = vec![0.0f32; total];
    for (x, y, pixel) in image.enumerate_pixels() {
        let idx = y as usize * width as usize + x as usize;
        chw[idx] = pixel[0] as f32 / 255.0;
        chw[plane + idx] = pixel[1] as f32 / 255.0;
        chw[2 * plane + idx] = pixel[2] as f32 / 255.0;
    }

    Ok(chw)
}

/// Byte level of a mask value: any positive finite value maps to at least 1
pub fn mask_level(value: f32) -> u8 {
    if value.is_finite() && value > 0.0 {
        (value.min(1.0) * 255.0).ceil().max(1.0) as u8
    } else if value == f32::INFINITY {
        255
    } else {
        0
    }
}

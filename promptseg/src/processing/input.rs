//! Source image binding and encoder input preparation

use crate::error::{Result, SegmentError};
use crate::models::sam::{MODEL_HEIGHT, MODEL_WIDTH};
use crate::tensor::Tensor;
use crate::utils::rgba_to_chw;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use std::path::Path;

/// Image handed over by the display side. It may be bound before its
/// pixels are decoded.
#[derive(Debug, Clone, Default)]
pub struct SourceImage {
    pixels: Option<RgbaImage>,
}

impl SourceImage {
    /// Bound but not yet decoded
    pub fn pending() -> Self {
        Self { pixels: None }
    }

    pub fn decoded(pixels: RgbaImage) -> Self {
        Self {
            pixels: Some(pixels),
        }
    }

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self::decoded(image.to_rgba8())
    }

    /// Decode an image file off the async executor
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let image = tokio::task::spawn_blocking(move || image::open(path))
            .await
            .map_err(|e| SegmentError::Input(format!("Image decode task failed: {}", e)))??;
        Ok(Self::from_dynamic(image))
    }

    pub fn is_complete(&self) -> bool {
        self.pixels.is_some()
    }

    pub fn pixels(&self) -> Option<&RgbaImage> {
        self.pixels.as_ref()
    }

    pub fn into_pixels(self) -> Option<RgbaImage> {
        self.pixels
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.pixels.as_ref().map(|p| p.dimensions())
    }
}

/// Resizes a decoded image into the encoder's fixed `[1, 3, H, W]` input.
/// The whole image is stretched, never cropped, whatever its aspect ratio.
#[derive(Debug, Clone, Copy)]
pub struct InputPreparer {
    width: u32,
    height: u32,
}

impl Default for InputPreparer {
    fn default() -> Self {
        Self::new(MODEL_WIDTH, MODEL_HEIGHT)
    }
}

impl InputPreparer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn prepare(&self, image: &SourceImage) -> Result<Tensor> {
        let pixels = image
            .pixels()
            .ok_or_else(|| SegmentError::Input("Image is not decoded yet".to_string()))?;
        self.prepare_pixels(pixels)
    }

    pub fn prepare_pixels(&self, pixels: &RgbaImage) -> Result<Tensor> {
        let (w, h) = pixels.dimensions();
        if w == 0 || h == 0 {
            return Err(SegmentError::Input(format!(
                "Image has zero extent ({}x{})",
                w, h
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(SegmentError::Config(
                "Encoder input dimensions cannot be zero".to_string(),
            ));
        }

        let chw = if (w, h) == (self.width, self.height) {
            rgba_to_chw(pixels)?
        } else {
            let resized = imageops::resize(pixels, self.width, self.height, FilterType::Triangle);
            rgba_to_chw(&resized)?
        };

        Tensor::new(
            vec![1, 3, self.height as usize, self.width as usize],
            chw,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_prepare_fixed_shape_for_any_aspect() {
        let preparer = InputPreparer::new(64, 48);
        for (w, h) in [(800, 600), (10, 300), (300, 10), (64, 48), (1, 1)] {
            let image = SourceImage::decoded(RgbaImage::new(w, h));
            let tensor = preparer.prepare(&image).unwrap();
            assert_eq!(tensor.shape(), &[1, 3, 48, 64]);
        }
    }

    #[test]
    fn test_prepare_values_in_unit_range() {
        let preparer = InputPreparer::new(16, 16);
        let image = SourceImage::decoded(RgbaImage::from_pixel(5, 7, Rgba([255, 128, 0, 10])));
        let tensor = preparer.prepare(&image).unwrap();
        assert!(tensor.data().iter().all(|&v| (0.0..=1.0).contains(&v)));
        // Uniform color survives resizing, alpha is dropped
        let plane = 16 * 16;
        assert!((tensor.data()[0] - 1.0).abs() < 1e-6);
        assert!((tensor.data()[plane] - 128.0 / 255.0).abs() < 1e-6);
        assert!(tensor.data()[2 * plane].abs() < 1e-6);
    }

    #[test]
    fn test_prepare_rejects_pending_image() {
        let err = InputPreparer::default().prepare(&SourceImage::pending()).unwrap_err();
        assert!(matches!(err, SegmentError::Input(_)));
    }

    #[test]
    fn test_prepare_rejects_empty_image() {
        let err = InputPreparer::default()
            .prepare(&SourceImage::decoded(RgbaImage::new(0, 10)))
            .unwrap_err();
        assert!(matches!(err, SegmentError::Input(_)));
    }

    #[test]
    fn test_default_is_model_size() {
        assert_eq!(InputPreparer::default().input_size(), (1024, 1024));
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        assert!(SourceImage::open("/nonexistent/image.png").await.is_err());
    }

    #[tokio::test]
    async fn test_open_decodes_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("img.png");
        RgbaImage::from_pixel(4, 3, Rgba([1, 2, 3, 255])).save(&path).unwrap();

        let image = SourceImage::open(&path).await.unwrap();
        assert!(image.is_complete());
        assert_eq!(image.dimensions(), Some((4, 3)));
    }
}

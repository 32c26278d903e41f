//! Mask rasterization and cut-out compositing

use crate::error::{Result, SegmentError};
use crate::tensor::Tensor;
use crate::utils::mask_level;
use image::{Rgba, RgbaImage};

/// Decoder mask output, `[..., H, W]`. Only the first `H x W` plane is used.
#[derive(Debug, Clone)]
pub struct Mask {
    tensor: Tensor,
    width: u32,
    height: u32,
}

impl Mask {
    pub fn new(tensor: Tensor) -> Result<Self> {
        let shape = tensor.shape();
        if shape.len() < 2 {
            return Err(SegmentError::InferenceRuntime(format!(
                "Mask tensor needs at least 2 dimensions, got {:?}",
                shape
            )));
        }
        let height = shape[shape.len() - 2];
        let width = shape[shape.len() - 1];
        let height = u32::try_from(height)
            .map_err(|_| SegmentError::InferenceRuntime("Mask height overflows u32".to_string()))?;
        let width = u32::try_from(width)
            .map_err(|_| SegmentError::InferenceRuntime("Mask width overflows u32".to_string()))?;
        Ok(Self {
            tensor,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    pub fn into_tensor(self) -> Tensor {
        self.tensor
    }

    /// Grayscale raster of the first plane; positive values have a non-zero red channel
    pub fn rasterize(&self) -> RgbaImage {
        let plane = &self.tensor.data()[..(self.width as usize * self.height as usize)];
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let level = mask_level(plane[y as usize * self.width as usize + x as usize]);
            Rgba([level, level, level, 255])
        })
    }
}

/// How the mask raster is laid over the original image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskFit {
    /// Unscaled, anchored at the top-left corner; uncovered pixels are empty
    #[default]
    Anchor,
    /// Nearest-neighbour resample to the image size
    Stretch,
}

/// Cuts the masked region out of the original image
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskCompositor {
    fit: MaskFit,
}

impl MaskCompositor {
    pub fn new(fit: MaskFit) -> Self {
        Self { fit }
    }

    pub fn fit(&self) -> MaskFit {
        self.fit
    }

    /// Same-size output holding the original pixel wherever the mask's red
    /// channel is `> 0` and a transparent pixel elsewhere
    pub fn composite(&self, mask: &Mask, original: &RgbaImage) -> RgbaImage {
        let raster = mask.rasterize();
        let (w, h) = original.dimensions();
        let (mw, mh) = raster.dimensions();

        let mut out = RgbaImage::new(w, h);
        if mw == 0 || mh == 0 {
            return out;
        }

        for (x, y, pixel) in out.enumerate_pixels_mut() {
            let (mx, my) = match self.fit {
                MaskFit::Anchor => (x, y),
                MaskFit::Stretch => (
                    (x as u64 * mw as u64 / w as u64) as u32,
                    (y as u64 * mh as u64 / h as u64) as u32,
                ),
            };
            if mx >= mw || my >= mh {
                continue;
            }
            if raster.get_pixel(mx, my)[0] > 0 {
                *pixel = *original.get_pixel(x, y);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_filled(h: usize, w: usize, value: f32) -> Mask {
        Mask::new(Tensor::new(vec![1, 1, h, w], vec![value; h * w]).unwrap()).unwrap()
    }

    fn gradient(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([x as u8, y as u8, (x ^ y) as u8, 200]))
    }

    #[test]
    fn test_all_zero_mask_is_empty() {
        let original = gradient(40, 30);
        let out = MaskCompositor::default().composite(&mask_filled(64, 64, 0.0), &original);
        assert_eq!(out.dimensions(), (40, 30));
        assert!(out.pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn test_all_positive_mask_is_identity() {
        let original = gradient(40, 30);
        for fit in [MaskFit::Anchor, MaskFit::Stretch] {
            let out = MaskCompositor::new(fit).composite(&mask_filled(64, 64, 3.0), &original);
            assert_eq!(out, original);
        }
    }

    #[test]
    fn test_negative_logits_are_empty() {
        let original = gradient(8, 8);
        let out = MaskCompositor::default().composite(&mask_filled(8, 8, -0.1), &original);
        assert!(out.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_anchor_leaves_uncovered_area_empty() {
        let original = gradient(20, 10);
        let out = MaskCompositor::new(MaskFit::Anchor).composite(&mask_filled(5, 10, 1.0), &original);
        assert_eq!(out.get_pixel(9, 4), original.get_pixel(9, 4));
        assert_eq!(out.get_pixel(10, 4).0, [0, 0, 0, 0]);
        assert_eq!(out.get_pixel(0, 5).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_stretch_covers_whole_image() {
        let original = gradient(20, 10);
        let out = MaskCompositor::new(MaskFit::Stretch).composite(&mask_filled(5, 10, 1.0), &original);
        assert_eq!(out, original);
    }

    #[test]
    fn test_partial_mask() {
        // Left half positive
        let mut data = vec![-1.0; 4 * 4];
        for y in 0..4 {
            for x in 0..2 {
                data[y * 4 + x] = 1.0;
            }
        }
        let mask = Mask::new(Tensor::new(vec![1, 1, 4, 4], data).unwrap()).unwrap();
        let original = gradient(4, 4);
        let out = MaskCompositor::default().composite(&mask, &original);
        assert_eq!(out.get_pixel(1, 3), original.get_pixel(1, 3));
        assert_eq!(out.get_pixel(2, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_rasterize() {
        let mask = Mask::new(Tensor::new(vec![1, 2], vec![0.0, 0.5]).unwrap()).unwrap();
        assert_eq!((mask.width(), mask.height()), (2, 1));
        let raster = mask.rasterize();
        assert_eq!(raster.get_pixel(0, 0)[0], 0);
        assert_eq!(raster.get_pixel(1, 0)[0], 128);
    }

    #[test]
    fn test_mask_needs_two_dims() {
        assert!(Mask::new(Tensor::new(vec![4], vec![0.0; 4]).unwrap()).is_err());
    }
}

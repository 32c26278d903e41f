//! Decoder feed construction for single-point prompts

use crate::error::{Result, SegmentError};
use crate::models::sam::{
    HAS_MASK_INPUT, IMAGE_EMBEDDINGS, MASK_INPUT, MASK_INPUT_SIZE, MODEL_HEIGHT, MODEL_WIDTH,
    ORIG_IM_SIZE, POINT_COORDS, POINT_LABELS,
};
use crate::pipeline::EncoderOutput;
use crate::tensor::{Tensor, TensorMap};

/// Label of a positive (foreground) point
pub const FOREGROUND_LABEL: f32 = 1.0;

/// Single foreground point in displayed-image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prompt {
    pub x: f32,
    pub y: f32,
}

impl Prompt {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Point from a pointer event, relative to the displayed image's top-left corner
    pub fn from_pointer(client_x: f32, client_y: f32, bounds_left: f32, bounds_top: f32) -> Self {
        Self::new(client_x - bounds_left, client_y - bounds_top)
    }
}

/// Complete decoder input for one prompt. Every buffer is owned by the feed.
#[derive(Debug, Clone)]
pub struct DecoderFeed {
    pub image_embeddings: Tensor,
    pub point_coords: Tensor,
    pub point_labels: Tensor,
    pub mask_input: Tensor,
    pub has_mask_input: Tensor,
    pub orig_im_size: Tensor,
}

impl DecoderFeed {
    pub fn into_tensor_map(self) -> TensorMap {
        let mut feed = TensorMap::with_capacity(6);
        feed.insert(IMAGE_EMBEDDINGS.to_string(), self.image_embeddings);
        feed.insert(POINT_COORDS.to_string(), self.point_coords);
        feed.insert(POINT_LABELS.to_string(), self.point_labels);
        feed.insert(MASK_INPUT.to_string(), self.mask_input);
        feed.insert(HAS_MASK_INPUT.to_string(), self.has_mask_input);
        feed.insert(ORIG_IM_SIZE.to_string(), self.orig_im_size);
        feed
    }
}

/// Builds decoder feeds from a shared encoder output.
///
/// The embedding is copied into a fresh buffer on every call: the runtime
/// owns whatever it is fed, and the encoder output is read by every prompt
/// for the same image.
#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder {
    model_width: u32,
    model_height: u32,
    remap_coordinates: bool,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(MODEL_WIDTH, MODEL_HEIGHT, false)
    }
}

impl PromptBuilder {
    /// With `remap_coordinates` off, points are passed in display space unchanged
    pub fn new(model_width: u32, model_height: u32, remap_coordinates: bool) -> Self {
        Self {
            model_width,
            model_height,
            remap_coordinates,
        }
    }

    pub fn remaps_coordinates(&self) -> bool {
        self.remap_coordinates
    }

    pub fn build(&self, encoder_output: &EncoderOutput, prompt: Prompt) -> Result<DecoderFeed> {
        if !prompt.x.is_finite() || !prompt.y.is_finite() {
            return Err(SegmentError::Input(format!(
                "Prompt coordinates must be finite, got ({}, {})",
                prompt.x, prompt.y
            )));
        }

        let embeddings = encoder_output.embeddings().ok_or_else(|| {
            SegmentError::InferenceRuntime(format!(
                "Encoder output has no '{}' tensor",
                IMAGE_EMBEDDINGS
            ))
        })?;

        let (x, y) = self.model_point(encoder_output.source_size(), prompt);

        Ok(DecoderFeed {
            image_embeddings: embeddings.deep_copy(),
            point_coords: Tensor::new(vec![1, 1, 2], vec![x, y])?,
            point_labels: Tensor::new(vec![1, 1], vec![FOREGROUND_LABEL])?,
            mask_input: Tensor::zeros(vec![1, 1, MASK_INPUT_SIZE, MASK_INPUT_SIZE])?,
            has_mask_input: Tensor::new(vec![1], vec![0.0])?,
            orig_im_size: Tensor::new(
                vec![2],
                vec![self.model_height as f32, self.model_width as f32],
            )?,
        })
    }

    fn model_point(&self, source_size: (u32, u32), prompt: Prompt) -> (f32, f32) {
        let (w, h) = source_size;
        if !self.remap_coordinates || w == 0 || h == 0 {
            return (prompt.x, prompt.y);
        }
        (
            prompt.x * self.model_width as f32 / w as f32,
            prompt.y * self.model_height as f32 / h as f32,
        )
    }
}

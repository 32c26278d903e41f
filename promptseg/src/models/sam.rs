//! SAM (Segment Anything Model) ViT-B encoder/decoder contract

use super::catalog::{ModelDescriptor, ModelPair, ModelTier, ModelVariantSet, DEFAULT_INPUT_SIZE};

/// Fixed encoder input width
pub const MODEL_WIDTH: u32 = DEFAULT_INPUT_SIZE.0;
/// Fixed encoder input height
pub const MODEL_HEIGHT: u32 = DEFAULT_INPUT_SIZE.1;
/// Side of the low-resolution mask prompt
pub const MASK_INPUT_SIZE: usize = 256;

pub const INPUT_IMAGE: &str = "input_image";
pub const IMAGE_EMBEDDINGS: &str = "image_embeddings";
pub const POINT_COORDS: &str = "point_coords";
pub const POINT_LABELS: &str = "point_labels";
pub const MASK_INPUT: &str = "mask_input";
pub const HAS_MASK_INPUT: &str = "has_mask_input";
pub const ORIG_IM_SIZE: &str = "orig_im_size";
pub const MASKS: &str = "masks";

const SAM_B_ENCODER_FP16_URL: &str =
    "https://huggingface.co/schmuell/sam-b-fp16/resolve/main/sam_vit_b_01ec64.encoder-fp16.onnx";
const SAM_B_DECODER_URL: &str =
    "https://huggingface.co/schmuell/sam-b-fp16/resolve/main/sam_vit_b_01ec64.decoder.onnx";
const SAM_B_ENCODER_INT8_URL: &str =
    "https://huggingface.co/schmuell/sam-b-fp16/resolve/main/sam_vit_b-encoder-int8.onnx";
const SAM_B_DECODER_INT8_URL: &str =
    "https://huggingface.co/schmuell/sam-b-fp16/resolve/main/sam_vit_b-decoder-int8.onnx";

/// Built-in SAM ViT-B tiers: fp16 for fp16-capable accelerators, int8 otherwise
pub fn sam_vit_b() -> ModelVariantSet {
    ModelVariantSet::new()
        .with_input_size(MODEL_WIDTH, MODEL_HEIGHT)
        .with_tier(
            ModelTier::HighPrecision,
            ModelPair {
                encoder: ModelDescriptor::new("sam-b-encoder", SAM_B_ENCODER_FP16_URL, 180),
                decoder: ModelDescriptor::new("sam-b-decoder", SAM_B_DECODER_URL, 17),
            },
        )
        .with_tier(
            ModelTier::Fallback,
            ModelPair {
                encoder: ModelDescriptor::new("sam-b-encoder-int8", SAM_B_ENCODER_INT8_URL, 108),
                decoder: ModelDescriptor::new("sam-b-decoder-int8", SAM_B_DECODER_INT8_URL, 5),
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sam_vit_b_tiers() {
        let set = sam_vit_b();
        let high = set.get(ModelTier::HighPrecision).unwrap();
        let low = set.get(ModelTier::Fallback).unwrap();
        assert_eq!(high.encoder.size_mb, 180);
        assert_eq!(low.decoder.size_mb, 5);
        assert_eq!(set.input_size(), (MODEL_WIDTH, MODEL_HEIGHT));
        for desc in [&high.encoder, &high.decoder, &low.encoder, &low.decoder] {
            assert!(desc.url.starts_with("https://"));
            assert!(desc.url.ends_with(".onnx"));
        }
    }
}

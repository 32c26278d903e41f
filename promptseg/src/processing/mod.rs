//! Pre- and post-processing around the two model runs

pub mod compositor;
pub mod input;
pub mod prompt;

pub use compositor::{Mask, MaskCompositor, MaskFit};
pub use input::{InputPreparer, SourceImage};
pub use prompt::{DecoderFeed, Prompt, PromptBuilder};

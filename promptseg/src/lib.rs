//! promptseg: prompt-driven image segmentation
//!
//! Runs a heavyweight image encoder once per image and a light mask decoder
//! once per point prompt, then cuts the selected region out of the source
//! image. Model weights are fetched from remote URLs and cached on disk;
//! sessions are created on the first backend that initializes from an
//! ordered preference list.

pub mod cache;
pub mod config;
pub mod error;
pub mod fallback;
pub mod models;
pub mod pipeline;
pub mod probe;
pub mod processing;
pub mod runtime;
pub mod tensor;
mod utils;

pub use cache::ModelCache;
pub use config::PipelineConfig;
pub use error::{Result, SegmentError};
pub use models::{ModelDescriptor, ModelPair, ModelTier, ModelVariantSet};
pub use pipeline::{EncoderOutput, InferencePipeline, PipelineBuilder, PipelineState, Timings};
pub use probe::CapabilityProbe;
pub use processing::{Mask, MaskCompositor, MaskFit, Prompt, SourceImage};
pub use runtime::{BackendId, SessionManager};
pub use tensor::Tensor;

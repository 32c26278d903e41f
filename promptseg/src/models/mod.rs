//! Model catalogue

pub mod catalog;
pub mod sam;

pub use catalog::{ModelDescriptor, ModelPair, ModelTier, ModelVariantSet};

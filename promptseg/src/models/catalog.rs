//! Model descriptors and capability tiers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One downloadable model blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub url: String,
    /// Declared size in megabytes
    pub size_mb: u64,
    /// Hex-encoded sha256 of the blob, when published
    #[serde(default)]
    pub sha256: Option<String>,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>, size_mb: u64) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            size_mb,
            sha256: None,
        }
    }

    pub fn with_sha256(mut self, checksum: impl Into<String>) -> Self {
        self.sha256 = Some(checksum.into());
        self
    }

    /// Declared size in bytes
    pub fn expected_bytes(&self) -> u64 {
        self.size_mb.saturating_mul(1024 * 1024)
    }
}

/// Capability tier a pipeline instance commits to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelTier {
    /// Half-precision models, needs accelerator fp16 support
    HighPrecision,
    /// Quantized models that run anywhere
    Fallback,
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelTier::HighPrecision => write!(f, "high-precision"),
            ModelTier::Fallback => write!(f, "fallback"),
        }
    }
}

/// Encoder and decoder descriptors for one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPair {
    pub encoder: ModelDescriptor,
    pub decoder: ModelDescriptor,
}

/// Encoder input size used when a variant set does not declare one
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (1024, 1024);

fn default_input_size() -> (u32, u32) {
    DEFAULT_INPUT_SIZE
}

/// Tier to model pair mapping. Every tier of a set shares one encoder
/// input size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVariantSet {
    tiers: HashMap<ModelTier, ModelPair>,
    /// Encoder input width and height
    #[serde(default = "default_input_size")]
    input_size: (u32, u32),
}

impl Default for ModelVariantSet {
    fn default() -> Self {
        Self {
            tiers: HashMap::new(),
            input_size: DEFAULT_INPUT_SIZE,
        }
    }
}

impl ModelVariantSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
        self.input_size = (width, height);
        self
    }

    pub fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    pub fn with_tier(mut self, tier: ModelTier, pair: ModelPair) -> Self {
        self.tiers.insert(tier, pair);
        self
    }

    pub fn get(&self, tier: ModelTier) -> Option<&ModelPair> {
        self.tiers.get(&tier)
    }

    /// Choose the tier for a probe outcome.
    ///
    /// A missing high-precision entry degrades to the fallback tier; `None`
    /// only when the fallback tier is missing as well.
    pub fn select(&self, high_precision: bool) -> Option<(ModelTier, &ModelPair)> {
        if high_precision {
            if let Some(pair) = self.tiers.get(&ModelTier::HighPrecision) {
                return Some((ModelTier::HighPrecision, pair));
            }
        }
        self.tiers
            .get(&ModelTier::Fallback)
            .map(|pair| (ModelTier::Fallback, pair))
    }
}

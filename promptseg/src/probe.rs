//! Accelerator capability probing used to pick a model tier

use crate::error::{Result, SegmentError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Host accelerator feature query
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AcceleratorQuery: Send + Sync {
    /// Names of the optional features the accelerator exposes
    async fn features(&self) -> Result<Vec<String>>;
}

/// Accelerator with a fixed, known feature list
#[derive(Debug, Clone, Default)]
pub struct StaticAccelerator {
    features: Vec<String>,
}

impl StaticAccelerator {
    pub fn new<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            features: features.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl AcceleratorQuery for StaticAccelerator {
    async fn features(&self) -> Result<Vec<String>> {
        Ok(self.features.clone())
    }
}

/// Host without any accelerator
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAccelerator;

#[async_trait]
impl AcceleratorQuery for NoAccelerator {
    async fn features(&self) -> Result<Vec<String>> {
        Err(SegmentError::CapabilityProbe("No accelerator available".to_string()))
    }
}

/// Queries the default wgpu adapter
#[cfg(feature = "wgpu")]
#[derive(Debug, Clone, Copy, Default)]
pub struct WgpuAccelerator;

#[cfg(feature = "wgpu")]
#[async_trait]
impl AcceleratorQuery for WgpuAccelerator {
    async fn features(&self) -> Result<Vec<String>> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .ok_or_else(|| SegmentError::CapabilityProbe("No GPU adapter found".to_string()))?;

        // SHADER_F16 -> "shader-f16", matching the WebGPU feature names
        Ok(adapter
            .features()
            .iter_names()
            .map(|(name, _)| name.to_lowercase().replace('_', "-"))
            .collect())
    }
}

/// Single-shot probe for one accelerator feature.
///
/// Any failure (no device, unsupported query, timeout) reads as "feature
/// absent" so the caller falls back to the compatible tier. The outcome is
/// computed once per probe instance and reused by later calls.
pub struct CapabilityProbe {
    query: Arc<dyn AcceleratorQuery>,
    feature: String,
    timeout: Duration,
    outcome: OnceCell<bool>,
}

impl CapabilityProbe {
    pub fn new(query: Arc<dyn AcceleratorQuery>, feature: impl Into<String>, timeout: Duration) -> Self {
        Self {
            query,
            feature: feature.into(),
            timeout,
            outcome: OnceCell::new(),
        }
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub async fn probe(&self) -> bool {
        *self.outcome.get_or_init(|| self.probe_once()).await
    }

    async fn probe_once(&self) -> bool {
        match self.try_probe().await {
            Ok(found) => {
                info!("Accelerator feature '{}' present: {}", self.feature, found);
                found
            }
            Err(e) => {
                warn!("Capability probe failed, assuming compatible tier: {}", e);
                false
            }
        }
    }

    async fn try_probe(&self) -> Result<bool> {
        let features = tokio::time::timeout(self.timeout, self.query.features())
            .await
            .map_err(|_| {
                SegmentError::CapabilityProbe(format!(
                    "Feature query timed out after {:?}",
                    self.timeout
                ))
            })??;

        for feature in &features {
            debug!("Accelerator feature: {}", feature);
        }

        Ok(features.iter().any(|f| f == &self.feature))
    }
}

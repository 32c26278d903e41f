//! Error types for promptseg

use crate::pipeline::PipelineState;
use crate::runtime::BackendId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("Capability probe error: {0}")]
    CapabilityProbe(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Session initialization failed on every backend: {}", format_attempts(.attempts))]
    Initialization { attempts: Vec<(BackendId, String)> },

    #[error("Input error: {0}")]
    Input(String),

    #[error("Operation '{operation}' not allowed in state {state:?}")]
    NotReady {
        operation: &'static str,
        state: PipelineState,
    },

    #[error("Inference runtime error: {0}")]
    InferenceRuntime(String),

    #[error("Result for generation {captured} superseded by generation {current}")]
    Superseded { captured: u64, current: u64 },

    #[error("Model error: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SegmentError {
    /// Best-effort failures that are absorbed at their component boundary.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SegmentError::CapabilityProbe(_) | SegmentError::CacheUnavailable(_)
        )
    }
}

impl From<ort::Error> for SegmentError {
    fn from(err: ort::Error) -> Self {
        SegmentError::InferenceRuntime(err.to_string())
    }
}

fn format_attempts(attempts: &[(BackendId, String)]) -> String {
    if attempts.is_empty() {
        return "no backends attempted".to_string();
    }
    attempts
        .iter()
        .map(|(backend, reason)| format!("{}: {}", backend, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, SegmentError>;

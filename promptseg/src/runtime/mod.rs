//! Inference runtime seam and session management

pub mod onnx;

pub use onnx::OrtRuntime;

use crate::config::PipelineConfig;
use crate::error::{Result, SegmentError};
use crate::tensor::TensorMap;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Execution target for a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    Cuda,
    TensorRt,
    DirectMl,
    CoreMl,
    /// Software backend, available everywhere
    Cpu,
}

impl BackendId {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::Cuda => "cuda",
            BackendId::TensorRt => "tensorrt",
            BackendId::DirectMl => "directml",
            BackendId::CoreMl => "coreml",
            BackendId::Cpu => "cpu",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendId {
    type Err = SegmentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cuda" => Ok(BackendId::Cuda),
            "tensorrt" => Ok(BackendId::TensorRt),
            "directml" => Ok(BackendId::DirectMl),
            "coreml" => Ok(BackendId::CoreMl),
            "cpu" => Ok(BackendId::Cpu),
            other => Err(SegmentError::Config(format!("Unknown backend '{}'", other))),
        }
    }
}

/// A model compiled for one backend
#[async_trait]
pub trait InferenceSession: Send + Sync {
    fn backend(&self) -> BackendId;

    fn input_names(&self) -> Vec<String>;

    fn output_names(&self) -> Vec<String>;

    /// Run the model. The feed is moved into the runtime.
    async fn run(&self, feed: TensorMap) -> Result<TensorMap>;
}

/// Turns model bytes into sessions.
///
/// Implementations try `backends` in order and commit to the first one that
/// initializes; `SegmentError::Initialization` lists every failed attempt.
#[async_trait]
pub trait InferenceRuntime: Send + Sync {
    async fn create_session(&self, model: Bytes, backends: &[BackendId]) -> Result<Box<dyn InferenceSession>>;
}

/// Which half of the model pair a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    Encoder,
    Decoder,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Encoder => write!(f, "encoder"),
            SessionRole::Decoder => write!(f, "decoder"),
        }
    }
}

/// Ready-to-run session tagged with its role and selected backend
pub struct ModelSession {
    role: SessionRole,
    inner: Box<dyn InferenceSession>,
}

impl ModelSession {
    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn backend(&self) -> BackendId {
        self.inner.backend()
    }

    pub fn input_names(&self) -> Vec<String> {
        self.inner.input_names()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.inner.output_names()
    }

    pub async fn run(&self, feed: TensorMap) -> Result<TensorMap> {
        let start = Instant::now();
        let results = self.inner.run(feed).await?;
        debug!(
            "{} run on {} took {} ms",
            self.role,
            self.backend(),
            start.elapsed().as_millis()
        );
        Ok(results)
    }
}

impl fmt::Debug for ModelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSession")
            .field("role", &self.role)
            .field("backend", &self.backend())
            .finish()
    }
}

/// Owns the backend preference policy and builds sessions through the runtime
pub struct SessionManager {
    runtime: Arc<dyn InferenceRuntime>,
    candidates: Vec<BackendId>,
}

impl SessionManager {
    pub fn new(runtime: Arc<dyn InferenceRuntime>, candidates: Vec<BackendId>) -> Self {
        Self { runtime, candidates }
    }

    /// Policy from configuration, with the software backend as terminal candidate
    pub fn from_config(runtime: Arc<dyn InferenceRuntime>, config: &PipelineConfig) -> Self {
        Self::new(runtime, config.backend_candidates())
    }

    pub fn candidates(&self) -> &[BackendId] {
        &self.candidates
    }

    /// Create a session using the manager's backend policy
    pub async fn create(&self, role: SessionRole, model: Bytes) -> Result<ModelSession> {
        self.create_session(role, model, &self.candidates).await
    }

    /// Create a session trying `candidates` in order
    pub async fn create_session(
        &self,
        role: SessionRole,
        model: Bytes,
        candidates: &[BackendId],
    ) -> Result<ModelSession> {
        if candidates.is_empty() {
            return Err(SegmentError::Initialization { attempts: vec![] });
        }

        debug!("Creating {} session, candidates {:?}", role, candidates);
        let inner = self.runtime.create_session(model, candidates).await?;
        info!("{} session initialized on backend {}", role, inner.backend());

        Ok(ModelSession { role, inner })
    }
}

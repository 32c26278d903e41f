//! ONNX Runtime backed inference sessions

use super::{BackendId, InferenceRuntime, InferenceSession};
use crate::error::{Result, SegmentError};
use crate::fallback::first_success;
use crate::tensor::{Tensor, TensorMap};
use async_trait::async_trait;
use bytes::Bytes;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
    DirectMLExecutionProvider, ExecutionProviderDispatch, TensorRTExecutionProvider,
};
use ort::session::Session;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// ONNX Runtime. Each candidate backend is registered with error-on-failure
/// so a missing provider moves on to the next candidate instead of silently
/// running on the CPU.
#[derive(Debug, Clone)]
pub struct OrtRuntime {
    intra_threads: usize,
}

impl OrtRuntime {
    pub fn new(intra_threads: usize) -> Self {
        Self {
            intra_threads: intra_threads.max(1),
        }
    }
}

impl Default for OrtRuntime {
    fn default() -> Self {
        Self::new(1)
    }
}

fn execution_provider(backend: BackendId) -> ExecutionProviderDispatch {
    match backend {
        BackendId::Cuda => CUDAExecutionProvider::default().build().error_on_failure(),
        BackendId::TensorRt => TensorRTExecutionProvider::default().build().error_on_failure(),
        BackendId::DirectMl => DirectMLExecutionProvider::default().build().error_on_failure(),
        BackendId::CoreMl => CoreMLExecutionProvider::default().build().error_on_failure(),
        BackendId::Cpu => CPUExecutionProvider::default().build().error_on_failure(),
    }
}

fn build_session(model: &[u8], backend: BackendId, intra_threads: usize) -> std::result::Result<Session, String> {
    Session::builder()
        .map_err(|e| e.to_string())?
        .with_intra_threads(intra_threads)
        .map_err(|e| e.to_string())?
        .with_execution_providers([execution_provider(backend)])
        .map_err(|e| e.to_string())?
        .commit_from_memory(model)
        .map_err(|e| e.to_string())
}

#[async_trait]
impl InferenceRuntime for OrtRuntime {
    async fn create_session(&self, model: Bytes, backends: &[BackendId]) -> Result<Box<dyn InferenceSession>> {
        let intra_threads = self.intra_threads;

        let outcome = first_success(backends.iter().copied(), |backend| {
            let model = model.clone();
            async move {
                let built = tokio::task::spawn_blocking(move || build_session(&model, backend, intra_threads))
                    .await
                    .map_err(|e| format!("Session build task failed: {}", e))
                    .and_then(|r| r);
                if let Err(e) = &built {
                    warn!("Backend {} failed to initialize: {}", backend, e);
                }
                built
            }
        })
        .await;

        match outcome {
            Ok((backend, session)) => Ok(Box::new(OrtSession::new(session, backend))),
            Err(attempts) => Err(SegmentError::Initialization { attempts }),
        }
    }
}

struct OrtSession {
    session: Arc<Mutex<Session>>,
    backend: BackendId,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl OrtSession {
    fn new(session: Session, backend: BackendId) -> Self {
        let inputs = session.inputs.iter().map(|i| i.name.clone()).collect();
        let outputs = session.outputs.iter().map(|o| o.name.clone()).collect();
        Self {
            session: Arc::new(Mutex::new(session)),
            backend,
            inputs,
            outputs,
        }
    }
}

fn run_blocking(session: &Mutex<Session>, feed: TensorMap) -> Result<TensorMap> {
    let mut inputs: Vec<(String, ort::value::Tensor<f32>)> = Vec::with_capacity(feed.len());
    for (name, tensor) in feed {
        let shape: Vec<i64> = tensor.shape().iter().map(|&d| d as i64).collect();
        let value = ort::value::Tensor::from_array((shape, tensor.into_data()))?;
        inputs.push((name, value));
    }

    let mut session = session.lock();
    let names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
    let outputs = session.run(inputs)?;

    let mut results = TensorMap::new();
    for name in names {
        let (shape, data) = outputs[name.as_str()].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        results.insert(name, Tensor::new(dims, data.to_vec())?);
    }
    Ok(results)
}

#[async_trait]
impl InferenceSession for OrtSession {
    fn backend(&self) -> BackendId {
        self.backend
    }

    fn input_names(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn output_names(&self) -> Vec<String> {
        self.outputs.clone()
    }

    async fn run(&self, feed: TensorMap) -> Result<TensorMap> {
        for name in feed.keys() {
            if !self.inputs.iter().any(|i| i == name) {
                debug!("Feed carries '{}' which the model does not declare", name);
            }
        }

        let session = self.session.clone();
        tokio::task::spawn_blocking(move || run_blocking(&session, feed))
            .await
            .map_err(|e| SegmentError::InferenceRuntime(format!("Inference task failed: {}", e)))?
    }
}

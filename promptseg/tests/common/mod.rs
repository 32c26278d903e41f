//! Shared stubs for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use promptseg::cache::{Fetcher, MemoryCacheStore};
use promptseg::fallback::first_success;
use promptseg::models::sam::{
    HAS_MASK_INPUT, IMAGE_EMBEDDINGS, INPUT_IMAGE, MASKS, MASK_INPUT, ORIG_IM_SIZE, POINT_COORDS,
    POINT_LABELS,
};
use promptseg::models::{ModelDescriptor, ModelPair, ModelTier, ModelVariantSet};
use promptseg::probe::StaticAccelerator;
use promptseg::runtime::{InferenceRuntime, InferenceSession};
use promptseg::tensor::{Tensor, TensorMap};
use promptseg::{BackendId, InferencePipeline, PipelineConfig, Result, SegmentError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub const EMBEDDING_VALUE: f32 = 0.25;
/// Columns left of this are inside the stub decoder's mask
pub const MASK_SPLIT_X: usize = 400;

/// Returns the URL as the body and counts calls per URL
#[derive(Default)]
pub struct CountingFetcher {
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl CountingFetcher {
    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        *self.calls.lock().entry(url.to_string()).or_insert(0) += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(url.to_string()))
    }
}

/// Pauses a session run until released
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Gate {
    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

/// Runtime serving a SAM-shaped encoder/decoder pair
#[derive(Default)]
pub struct StubRuntime {
    /// Backends that refuse to initialize
    pub failing: Vec<BackendId>,
    /// Every backend tried, in order
    pub attempts: Mutex<Vec<BackendId>>,
    pub encoder_gate: Option<Gate>,
    pub decoder_gate: Option<Gate>,
    /// Scribble over the embedding buffer handed to the decoder
    pub mutate_feed: bool,
    pub encoder_runs: Arc<AtomicUsize>,
    pub decoder_runs: Arc<AtomicUsize>,
}

#[async_trait]
impl InferenceRuntime for StubRuntime {
    async fn create_session(&self, _model: Bytes, backends: &[BackendId]) -> Result<Box<dyn InferenceSession>> {
        let selected = first_success(backends.iter().copied(), |backend| {
            self.attempts.lock().push(backend);
            let ok = !self.failing.contains(&backend);
            async move {
                if ok {
                    Ok(backend)
                } else {
                    Err(format!("{} unavailable", backend))
                }
            }
        })
        .await
        .map_err(|attempts| SegmentError::Initialization { attempts })?;

        Ok(Box::new(StubSession {
            backend: selected.0,
            encoder_gate: self.encoder_gate.clone(),
            decoder_gate: self.decoder_gate.clone(),
            mutate_feed: self.mutate_feed,
            encoder_runs: self.encoder_runs.clone(),
            decoder_runs: self.decoder_runs.clone(),
        }))
    }
}

struct StubSession {
    backend: BackendId,
    encoder_gate: Option<Gate>,
    decoder_gate: Option<Gate>,
    mutate_feed: bool,
    encoder_runs: Arc<AtomicUsize>,
    decoder_runs: Arc<AtomicUsize>,
}

fn expect_shape(feed: &TensorMap, name: &str, shape: &[usize]) -> Result<()> {
    let tensor = feed
        .get(name)
        .ok_or_else(|| SegmentError::InferenceRuntime(format!("missing input {}", name)))?;
    if tensor.shape() != shape {
        return Err(SegmentError::InferenceRuntime(format!(
            "{} has shape {:?}, expected {:?}",
            name,
            tensor.shape(),
            shape
        )));
    }
    Ok(())
}

impl StubSession {
    async fn encode(&self, feed: TensorMap) -> Result<TensorMap> {
        expect_shape(&feed, INPUT_IMAGE, &[1, 3, 1024, 1024])?;
        self.encoder_runs.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.encoder_gate {
            gate.pass().await;
        }
        let mut out = TensorMap::new();
        out.insert(
            IMAGE_EMBEDDINGS.to_string(),
            Tensor::new(vec![1, 256, 64, 64], vec![EMBEDDING_VALUE; 256 * 64 * 64])?,
        );
        Ok(out)
    }

    async fn decode(&self, mut feed: TensorMap) -> Result<TensorMap> {
        expect_shape(&feed, IMAGE_EMBEDDINGS, &[1, 256, 64, 64])?;
        expect_shape(&feed, POINT_COORDS, &[1, 1, 2])?;
        expect_shape(&feed, POINT_LABELS, &[1, 1])?;
        expect_shape(&feed, MASK_INPUT, &[1, 1, 256, 256])?;
        expect_shape(&feed, HAS_MASK_INPUT, &[1])?;
        expect_shape(&feed, ORIG_IM_SIZE, &[2])?;
        self.decoder_runs.fetch_add(1, Ordering::SeqCst);

        let embeddings = feed
            .remove(IMAGE_EMBEDDINGS)
            .ok_or_else(|| SegmentError::InferenceRuntime("missing embeddings".to_string()))?;
        if embeddings.data().iter().any(|&v| v != EMBEDDING_VALUE) {
            return Err(SegmentError::InferenceRuntime(
                "embedding buffer was modified by an earlier run".to_string(),
            ));
        }
        if feed[MASK_INPUT].data().iter().any(|&v| v != 0.0) || feed[HAS_MASK_INPUT].data() != [0.0] {
            return Err(SegmentError::InferenceRuntime("unexpected mask prompt".to_string()));
        }
        if self.mutate_feed {
            let mut scratch = embeddings.into_data();
            scratch.iter_mut().for_each(|v| *v = -1.0);
            drop(scratch);
        }

        if let Some(gate) = &self.decoder_gate {
            gate.pass().await;
        }

        let side = 1024;
        let mut mask = vec![-1.0f32; side * side];
        for row in mask.chunks_mut(side) {
            row[..MASK_SPLIT_X].iter_mut().for_each(|v| *v = 2.0);
        }
        let mut out = TensorMap::new();
        out.insert(MASKS.to_string(), Tensor::new(vec![1, 1, side, side], mask)?);
        Ok(out)
    }
}

#[async_trait]
impl InferenceSession for StubSession {
    fn backend(&self) -> BackendId {
        self.backend
    }

    fn input_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn output_names(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run(&self, feed: TensorMap) -> Result<TensorMap> {
        if feed.contains_key(INPUT_IMAGE) {
            self.encode(feed).await
        } else {
            self.decode(feed).await
        }
    }
}

pub fn encoder_url(tier: &str) -> String {
    format!("https://models.test/{}/encoder.onnx", tier)
}

pub fn decoder_url(tier: &str) -> String {
    format!("https://models.test/{}/decoder.onnx", tier)
}

pub fn test_variants() -> ModelVariantSet {
    let pair = |tier: &str| ModelPair {
        encoder: ModelDescriptor::new(format!("{}-encoder", tier), encoder_url(tier), 0),
        decoder: ModelDescriptor::new(format!("{}-decoder", tier), decoder_url(tier), 0),
    };
    ModelVariantSet::new()
        .with_tier(ModelTier::HighPrecision, pair("fp16"))
        .with_tier(ModelTier::Fallback, pair("int8"))
}

pub struct Harness {
    pub pipeline: Arc<InferencePipeline>,
    pub fetcher: Arc<CountingFetcher>,
    pub runtime: Arc<StubRuntime>,
    pub store: Arc<MemoryCacheStore>,
}

pub fn harness(config: PipelineConfig, runtime: StubRuntime, features: &[&str]) -> Harness {
    harness_with_store(config, runtime, features, Arc::new(MemoryCacheStore::new()))
}

pub fn harness_with_store(
    config: PipelineConfig,
    runtime: StubRuntime,
    features: &[&str],
    store: Arc<MemoryCacheStore>,
) -> Harness {
    let fetcher = Arc::new(CountingFetcher::default());
    let runtime = Arc::new(runtime);
    let pipeline = InferencePipeline::builder(config)
        .accelerator(Arc::new(StaticAccelerator::new(features.iter().copied())))
        .cache_store(store.clone())
        .fetcher(fetcher.clone())
        .runtime(runtime.clone())
        .variants(test_variants())
        .build()
        .unwrap();
    Harness {
        pipeline: Arc::new(pipeline),
        fetcher,
        runtime,
        store,
    }
}

//! Prompt-driven segmentation pipeline
//!
//! The pipeline walks a fixed lifecycle:
//!
//! ```text
//! Uninitialized -> ModelsLoading -> ModelsReady -> ImageLoading -> ImageReady
//!     -> EncoderRunning -> EncoderReady <-> DecoderRunning
//! ```
//!
//! Binding a new image is allowed from any state after the models are
//! loaded and bumps the pipeline generation. Encoder and decoder results are
//! tagged with the generation they were started under and are rejected with
//! [`SegmentError::Superseded`] if a newer image was bound in the meantime.

use crate::cache::{DiskCacheStore, Fetcher, HttpFetcher, CacheStore, ModelCache};
use crate::config::PipelineConfig;
use crate::error::{Result, SegmentError};
use crate::models::sam::{self, IMAGE_EMBEDDINGS, INPUT_IMAGE, MASKS};
use crate::models::{ModelTier, ModelVariantSet};
use crate::probe::{AcceleratorQuery, CapabilityProbe};
use crate::processing::{
    InputPreparer, Mask, MaskCompositor, MaskFit, Prompt, PromptBuilder, SourceImage,
};
use crate::runtime::{BackendId, InferenceRuntime, ModelSession, OrtRuntime, SessionManager, SessionRole};
use crate::tensor::{Tensor, TensorMap};
use image::RgbaImage;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle state of an [`InferencePipeline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Uninitialized,
    ModelsLoading,
    ModelsReady,
    ImageLoading,
    ImageReady,
    EncoderRunning,
    EncoderReady,
    DecoderRunning,
}

impl PipelineState {
    fn has_models(self) -> bool {
        !matches!(self, PipelineState::Uninitialized | PipelineState::ModelsLoading)
    }
}

/// Encoder results for one bound image
#[derive(Debug)]
pub struct EncoderOutput {
    generation: u64,
    source_size: (u32, u32),
    tensors: TensorMap,
}

impl EncoderOutput {
    pub fn new(generation: u64, source_size: (u32, u32), tensors: TensorMap) -> Self {
        Self {
            generation,
            source_size,
            tensors,
        }
    }

    /// Generation of the image this output was computed for
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Width and height of the source image
    pub fn source_size(&self) -> (u32, u32) {
        self.source_size
    }

    pub fn embeddings(&self) -> Option<&Tensor> {
        self.tensors.get(IMAGE_EMBEDDINGS)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn tensors(&self) -> &TensorMap {
        &self.tensors
    }
}

/// Durations of the most recent pipeline steps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timings {
    pub load: Option<Duration>,
    pub encoder: Option<Duration>,
    pub decoder: Option<Duration>,
}

struct LoadedModels {
    tier: ModelTier,
    encoder: Arc<ModelSession>,
    decoder: Arc<ModelSession>,
}

struct BoundImage {
    pixels: Arc<RgbaImage>,
    input: Tensor,
}

struct PipelineInner {
    state: PipelineState,
    generation: u64,
    models: Option<Arc<LoadedModels>>,
    image: Option<BoundImage>,
    encoder_output: Option<Arc<EncoderOutput>>,
    inflight_decodes: usize,
    timings: Timings,
}

impl PipelineInner {
    fn not_ready(&self, operation: &'static str) -> SegmentError {
        SegmentError::NotReady {
            operation,
            state: self.state,
        }
    }

    fn superseded(&self, captured: u64) -> SegmentError {
        SegmentError::Superseded {
            captured,
            current: self.generation,
        }
    }
}

/// Builder wiring the pipeline's collaborators. Anything not supplied
/// falls back to the production implementation derived from the config.
pub struct PipelineBuilder {
    config: PipelineConfig,
    accelerator: Option<Arc<dyn AcceleratorQuery>>,
    store: Option<Arc<dyn CacheStore>>,
    disable_cache: bool,
    fetcher: Option<Arc<dyn Fetcher>>,
    runtime: Option<Arc<dyn InferenceRuntime>>,
    variants: Option<ModelVariantSet>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            accelerator: None,
            store: None,
            disable_cache: false,
            fetcher: None,
            runtime: None,
            variants: None,
        }
    }

    pub fn accelerator(mut self, accelerator: Arc<dyn AcceleratorQuery>) -> Self {
        self.accelerator = Some(accelerator);
        self
    }

    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self.disable_cache = false;
        self
    }

    /// Fetch every model straight from the network
    pub fn without_cache(mut self) -> Self {
        self.store = None;
        self.disable_cache = true;
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn InferenceRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn variants(mut self, variants: ModelVariantSet) -> Self {
        self.variants = Some(variants);
        self
    }

    pub fn build(self) -> Result<InferencePipeline> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let accelerator = self.accelerator.unwrap_or_else(default_accelerator);
        let probe = CapabilityProbe::new(
            accelerator,
            config.capability_feature.clone(),
            Duration::from_millis(config.probe_timeout_ms),
        );

        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(
                Duration::from_secs(config.download_timeout_secs),
                config.max_model_bytes,
            )?),
        };
        let cache = if self.disable_cache {
            ModelCache::uncached(fetcher)
        } else {
            let store: Arc<dyn CacheStore> = match self.store {
                Some(store) => store,
                None => Arc::new(DiskCacheStore::new(config.cache_dir.clone())),
            };
            ModelCache::new(store, fetcher, config.cache_namespace.clone())
        };

        let runtime: Arc<dyn InferenceRuntime> = match self.runtime {
            Some(runtime) => runtime,
            None => Arc::new(OrtRuntime::new(config.intra_threads)),
        };
        let sessions = SessionManager::from_config(runtime, &config);

        let fit = if config.remap_coordinates {
            MaskFit::Stretch
        } else {
            MaskFit::Anchor
        };

        let variants = self.variants.unwrap_or_else(sam::sam_vit_b);
        let (width, height) = variants.input_size();

        Ok(InferencePipeline {
            probe,
            cache,
            sessions,
            variants,
            preparer: InputPreparer::new(width, height),
            prompts: PromptBuilder::new(width, height, config.remap_coordinates),
            compositor: MaskCompositor::new(fit),
            config,
            inner: RwLock::new(PipelineInner {
                state: PipelineState::Uninitialized,
                generation: 0,
                models: None,
                image: None,
                encoder_output: None,
                inflight_decodes: 0,
                timings: Timings::default(),
            }),
        })
    }
}

#[cfg(feature = "wgpu")]
fn default_accelerator() -> Arc<dyn AcceleratorQuery> {
    Arc::new(crate::probe::WgpuAccelerator)
}

#[cfg(not(feature = "wgpu"))]
fn default_accelerator() -> Arc<dyn AcceleratorQuery> {
    Arc::new(crate::probe::NoAccelerator)
}

/// Encoder/decoder segmentation pipeline.
///
/// All methods take `&self`; the pipeline can be shared behind an `Arc`.
/// Locks are never held across an inference call.
pub struct InferencePipeline {
    config: Arc<PipelineConfig>,
    probe: CapabilityProbe,
    cache: ModelCache,
    sessions: SessionManager,
    variants: ModelVariantSet,
    preparer: InputPreparer,
    prompts: PromptBuilder,
    compositor: MaskCompositor,
    inner: RwLock<PipelineInner>,
}

impl InferencePipeline {
    /// Create a pipeline with production collaborators
    pub fn new(config: PipelineConfig) -> Result<Self> {
        PipelineBuilder::new(config).build()
    }

    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.inner.read().state
    }

    /// Number of images bound so far
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Tier committed to by `load_models`
    pub fn tier(&self) -> Option<ModelTier> {
        self.inner.read().models.as_ref().map(|m| m.tier)
    }

    /// Backends selected for the encoder and decoder sessions
    pub fn backends(&self) -> Option<(BackendId, BackendId)> {
        self.inner
            .read()
            .models
            .as_ref()
            .map(|m| (m.encoder.backend(), m.decoder.backend()))
    }

    pub fn last_timings(&self) -> Timings {
        self.inner.read().timings
    }

    pub fn encoder_output(&self) -> Option<Arc<EncoderOutput>> {
        self.inner.read().encoder_output.clone()
    }

    /// Probe the accelerator, fetch the model pair for the selected tier and
    /// create both sessions.
    ///
    /// Only valid once, from `Uninitialized`. On failure the pipeline returns
    /// to `Uninitialized` and the call may be repeated.
    pub async fn load_models(&self) -> Result<()> {
        {
            let mut inner = self.inner.write();
            if inner.state != PipelineState::Uninitialized {
                return Err(inner.not_ready("load_models"));
            }
            inner.state = PipelineState::ModelsLoading;
        }

        let start = Instant::now();
        let result = self.load_sessions().await;

        let mut inner = self.inner.write();
        match result {
            Ok(models) => {
                let elapsed = start.elapsed();
                info!(
                    "Models ready: tier {}, encoder on {}, decoder on {} ({} ms)",
                    models.tier,
                    models.encoder.backend(),
                    models.decoder.backend(),
                    elapsed.as_millis()
                );
                inner.models = Some(Arc::new(models));
                inner.timings.load = Some(elapsed);
                inner.state = PipelineState::ModelsReady;
                Ok(())
            }
            Err(e) => {
                warn!("Model loading failed: {}", e);
                inner.state = PipelineState::Uninitialized;
                Err(e)
            }
        }
    }

    async fn load_sessions(&self) -> Result<LoadedModels> {
        let high_precision = self.probe.probe().await;
        let (tier, pair) = self.variants.select(high_precision).ok_or_else(|| {
            SegmentError::Model("No model variant available for this host".to_string())
        })?;
        info!("Selected model tier: {}", tier);

        let (encoder_bytes, decoder_bytes) = tokio::try_join!(
            self.cache.fetch_model(&pair.encoder),
            self.cache.fetch_model(&pair.decoder)
        )?;

        let encoder = self.sessions.create(SessionRole::Encoder, encoder_bytes).await?;
        let decoder = self.sessions.create(SessionRole::Decoder, decoder_bytes).await?;

        Ok(LoadedModels {
            tier,
            encoder: Arc::new(encoder),
            decoder: Arc::new(decoder),
        })
    }

    /// Bind a new source image, discarding any previous encoder output.
    ///
    /// A decoded image is prepared right away and the pipeline moves to
    /// `ImageReady`; a pending one leaves it in `ImageLoading` until
    /// [`image_loaded`](Self::image_loaded) delivers the pixels.
    pub fn bind_image(&self, image: SourceImage) -> Result<()> {
        let generation = {
            let mut inner = self.inner.write();
            if !inner.state.has_models() {
                return Err(inner.not_ready("bind_image"));
            }
            inner.generation += 1;
            inner.image = None;
            inner.encoder_output = None;
            inner.inflight_decodes = 0;
            inner.state = PipelineState::ImageLoading;
            inner.generation
        };
        debug!("Bound image generation {}", generation);

        match image.into_pixels() {
            Some(pixels) => self.complete_image(generation, pixels),
            None => Ok(()),
        }
    }

    /// Decode-complete event for the image bound while pending
    pub fn image_loaded(&self, pixels: RgbaImage) -> Result<()> {
        let generation = {
            let inner = self.inner.read();
            if inner.state != PipelineState::ImageLoading {
                return Err(inner.not_ready("image_loaded"));
            }
            inner.generation
        };
        self.complete_image(generation, pixels)
    }

    fn complete_image(&self, generation: u64, pixels: RgbaImage) -> Result<()> {
        let prepared = self.preparer.prepare_pixels(&pixels);

        let mut inner = self.inner.write();
        if inner.generation != generation || inner.state != PipelineState::ImageLoading {
            return Err(inner.superseded(generation));
        }

        match prepared {
            Ok(input) => {
                let (w, h) = pixels.dimensions();
                debug!("Image generation {} ready ({}x{})", generation, w, h);
                inner.image = Some(BoundImage {
                    pixels: Arc::new(pixels),
                    input,
                });
                inner.state = PipelineState::ImageReady;
                Ok(())
            }
            Err(e) => {
                inner.state = PipelineState::ModelsReady;
                Err(e)
            }
        }
    }

    /// Run the encoder on the bound image
    pub async fn run_encoder(&self) -> Result<()> {
        let (encoder, feed, generation, source_size) = {
            let mut inner = self.inner.write();
            if !matches!(
                inner.state,
                PipelineState::ImageReady | PipelineState::EncoderReady
            ) {
                return Err(inner.not_ready("run_encoder"));
            }
            let (image, models) = match (&inner.image, &inner.models) {
                (Some(image), Some(models)) => (image, models),
                _ => return Err(inner.not_ready("run_encoder")),
            };

            let mut feed = TensorMap::with_capacity(1);
            feed.insert(INPUT_IMAGE.to_string(), image.input.deep_copy());
            let snapshot = (
                models.encoder.clone(),
                feed,
                inner.generation,
                image.pixels.dimensions(),
            );

            inner.state = PipelineState::EncoderRunning;
            snapshot
        };

        let start = Instant::now();
        let result = encoder.run(feed).await;
        let elapsed = start.elapsed();

        let mut inner = self.inner.write();
        if inner.generation != generation {
            warn!("Dropping encoder output for stale generation {}", generation);
            return Err(inner.superseded(generation));
        }

        let outputs = match result.and_then(|outputs| {
            if outputs.contains_key(IMAGE_EMBEDDINGS) {
                Ok(outputs)
            } else {
                Err(SegmentError::InferenceRuntime(format!(
                    "Encoder produced no '{}' output",
                    IMAGE_EMBEDDINGS
                )))
            }
        }) {
            Ok(outputs) => outputs,
            Err(e) => {
                // A failed re-run keeps the previous output for this image
                inner.state = match &inner.encoder_output {
                    Some(output) if output.generation() == generation => PipelineState::EncoderReady,
                    _ => PipelineState::ImageReady,
                };
                return Err(e);
            }
        };

        info!("Encoder took {} ms", elapsed.as_millis());
        inner.encoder_output = Some(Arc::new(EncoderOutput::new(generation, source_size, outputs)));
        inner.timings.encoder = Some(elapsed);
        inner.state = PipelineState::EncoderReady;
        Ok(())
    }

    /// Decode a mask for one point against the current encoder output
    pub async fn on_prompt(&self, prompt: Prompt) -> Result<Mask> {
        self.decode(prompt).await.map(|(mask, _)| mask)
    }

    /// Decode a mask and cut the selected region out of the bound image
    pub async fn segment(&self, prompt: Prompt) -> Result<RgbaImage> {
        let (mask, original) = self.decode(prompt).await?;
        Ok(self.compositor.composite(&mask, &original))
    }

    async fn decode(&self, prompt: Prompt) -> Result<(Mask, Arc<RgbaImage>)> {
        let (output, decoder, original) = {
            let inner = self.inner.read();
            if !matches!(
                inner.state,
                PipelineState::EncoderReady | PipelineState::DecoderRunning
            ) {
                return Err(inner.not_ready("on_prompt"));
            }
            match (&inner.encoder_output, &inner.models, &inner.image) {
                (Some(output), Some(models), Some(image)) => (
                    output.clone(),
                    models.decoder.clone(),
                    image.pixels.clone(),
                ),
                _ => return Err(inner.not_ready("on_prompt")),
            }
        };
        let generation = output.generation();

        let feed = self.prompts.build(&output, prompt)?;

        {
            let mut inner = self.inner.write();
            if inner.generation != generation {
                return Err(inner.superseded(generation));
            }
            if !matches!(
                inner.state,
                PipelineState::EncoderReady | PipelineState::DecoderRunning
            ) {
                return Err(inner.not_ready("on_prompt"));
            }
            inner.inflight_decodes += 1;
            inner.state = PipelineState::DecoderRunning;
        }

        let start = Instant::now();
        let result = decoder.run(feed.into_tensor_map()).await;
        let elapsed = start.elapsed();

        let mut outputs = {
            let mut inner = self.inner.write();
            if inner.generation != generation {
                warn!("Dropping decoder output for stale generation {}", generation);
                return Err(inner.superseded(generation));
            }
            inner.inflight_decodes = inner.inflight_decodes.saturating_sub(1);
            if inner.inflight_decodes == 0 && inner.state == PipelineState::DecoderRunning {
                inner.state = PipelineState::EncoderReady;
            }
            let outputs = result?;
            inner.timings.decoder = Some(elapsed);
            outputs
        };

        info!(
            "Decoder took {} ms for point ({}, {})",
            elapsed.as_millis(),
            prompt.x,
            prompt.y
        );

        let masks = outputs.remove(MASKS).ok_or_else(|| {
            SegmentError::InferenceRuntime(format!("Decoder produced no '{}' output", MASKS))
        })?;
        Ok((Mask::new(masks)?, original))
    }
}

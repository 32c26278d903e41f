//! Configuration for promptseg

use crate::error::{Result, SegmentError};
use crate::runtime::BackendId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Pipeline configuration, handed to the pipeline once at construction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the persistent model cache
    pub cache_dir: PathBuf,
    /// Cache namespace model blobs are stored under
    pub cache_namespace: String,
    /// Ordered backend preference for both sessions
    pub backends: Vec<BackendId>,
    /// Intra-op threads given to the inference runtime
    pub intra_threads: usize,
    /// Log verbosity used by hosts that install a subscriber
    pub log_level: String,
    /// Accelerator feature that unlocks the high-precision tier
    pub capability_feature: String,
    /// Upper bound on the capability probe
    pub probe_timeout_ms: u64,
    /// Upper bound on a single model download
    pub download_timeout_secs: u64,
    /// Largest model blob accepted from the network
    pub max_model_bytes: u64,
    /// Rescale display coordinates into model space before decoding
    pub remap_coordinates: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let cache_dir = dirs::home_dir()
            .map(|mut p| {
                p.push(".promptseg");
                p.push("models");
                p
            })
            .unwrap_or_else(|| PathBuf::from("./models"));

        Self {
            cache_dir,
            cache_namespace: "onnx".to_string(),
            backends: vec![
                BackendId::Cuda,
                BackendId::DirectMl,
                BackendId::CoreMl,
                BackendId::Cpu,
            ],
            intra_threads: 1,
            log_level: "info".to_string(),
            capability_feature: "shader-f16".to_string(),
            probe_timeout_ms: 2_000,
            download_timeout_secs: 3_600,
            max_model_bytes: 2_000_000_000,
            remap_coordinates: false,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON or TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a JSON or TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let trimmed = content.trim_start();
        let config: PipelineConfig = if trimmed.starts_with('{') {
            serde_json::from_str(content)?
        } else {
            toml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `PROMPTSEG_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("PROMPTSEG_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }

        if let Ok(level) = std::env::var("PROMPTSEG_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(threads) = std::env::var("PROMPTSEG_THREADS") {
            if let Ok(n) = threads.parse::<usize>() {
                config.intra_threads = n;
            }
        }

        if let Ok(list) = std::env::var("PROMPTSEG_BACKENDS") {
            let parsed: Vec<BackendId> = list
                .split(',')
                .filter_map(|name| name.trim().parse().ok())
                .collect();
            if !parsed.is_empty() {
                config.backends = parsed;
            }
        }

        config
    }

    /// Backend list with the software backend guaranteed as terminal candidate
    pub fn backend_candidates(&self) -> Vec<BackendId> {
        let mut candidates: Vec<BackendId> = Vec::with_capacity(self.backends.len() + 1);
        for backend in &self.backends {
            if *backend != BackendId::Cpu && !candidates.contains(backend) {
                candidates.push(*backend);
            }
        }
        candidates.push(BackendId::Cpu);
        candidates
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(SegmentError::Config("Backend list must not be empty".to_string()));
        }

        if self.intra_threads == 0 || self.intra_threads > 256 {
            return Err(SegmentError::Config(
                "intra_threads must be between 1 and 256".to_string(),
            ));
        }

        if self.cache_namespace.is_empty()
            || self.cache_namespace.contains("..")
            || self.cache_namespace.contains('/')
            || self.cache_namespace.contains('\\')
        {
            return Err(SegmentError::Config("Invalid cache namespace".to_string()));
        }

        if self.probe_timeout_ms == 0 {
            return Err(SegmentError::Config("probe_timeout_ms must be > 0".to_string()));
        }

        if self.download_timeout_secs == 0 {
            return Err(SegmentError::Config(
                "download_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.max_model_bytes == 0 {
            return Err(SegmentError::Config("max_model_bytes must be > 0".to_string()));
        }

        if self.capability_feature.is_empty() {
            return Err(SegmentError::Config(
                "capability_feature must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.cache_namespace, "onnx");
        assert_eq!(config.intra_threads, 1);
        assert_eq!(config.capability_feature, "shader-f16");
        assert_eq!(config.backends.last(), Some(&BackendId::Cpu));
        assert!(!config.remap_coordinates);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_backends() {
        let mut config = PipelineConfig::default();
        config.backends.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_threads() {
        let mut config = PipelineConfig::default();
        config.intra_threads = 0;
        assert!(config.validate().is_err());

        config.intra_threads = 257;
        assert!(config.validate().is_err());

        config.intra_threads = 256;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_namespace() {
        let mut config = PipelineConfig::default();
        config.cache_namespace = "../evil".to_string();
        assert!(config.validate().is_err());

        config.cache_namespace = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_limits() {
        let mut config = PipelineConfig::default();
        config.probe_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.max_model_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_candidates_end_with_cpu() {
        let mut config = PipelineConfig::default();
        config.backends = vec![BackendId::Cpu, BackendId::Cuda, BackendId::Cuda];
        assert_eq!(
            config.backend_candidates(),
            vec![BackendId::Cuda, BackendId::Cpu]
        );
    }

    #[test]
    fn test_from_str_toml() {
        let config = PipelineConfig::from_str(
            r#"
            cache_namespace = "models"
            backends = ["cuda", "cpu"]
            intra_threads = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.cache_namespace, "models");
        assert_eq!(config.backends, vec![BackendId::Cuda, BackendId::Cpu]);
        assert_eq!(config.intra_threads, 4);
        assert_eq!(config.capability_feature, "shader-f16");
    }

    #[test]
    fn test_from_str_json() {
        let config =
            PipelineConfig::from_str(r#"{"remap_coordinates": true, "log_level": "debug"}"#)
                .unwrap();
        assert!(config.remap_coordinates);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_from_str_rejects_invalid() {
        assert!(PipelineConfig::from_str(r#"{"intra_threads": 0}"#).is_err());
        assert!(PipelineConfig::from_str("not = [valid").is_err());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("promptseg.toml");
        std::fs::write(&path, "probe_timeout_ms = 500\nbackends = [\"coreml\"]\n").unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.probe_timeout_ms, 500);
        assert_eq!(
            config.backend_candidates(),
            vec![BackendId::CoreMl, BackendId::Cpu]
        );

        assert!(PipelineConfig::from_file(&temp_dir.path().join("missing.toml")).is_err());
    }
}

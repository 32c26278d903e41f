//! Persistent blob stores keyed by URL

use crate::error::{Result, SegmentError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Opens named cache buckets
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn open(&self, namespace: &str) -> Result<Arc<dyn CacheBucket>>;
}

/// One cache namespace. Keys are compared by exact string equality.
#[async_trait]
pub trait CacheBucket: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Option<Bytes>>;
    async fn put(&self, key: &str, blob: Bytes) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<bool>;
}

/// Filesystem store: `<root>/<namespace>/<sha256(key)>`
#[derive(Debug, Clone)]
pub struct DiskCacheStore {
    root: PathBuf,
}

impl DiskCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CacheStore for DiskCacheStore {
    async fn open(&self, namespace: &str) -> Result<Arc<dyn CacheBucket>> {
        validate_namespace(namespace)?;
        let dir = self.root.join(namespace);

        if !dir.starts_with(&self.root) {
            return Err(SegmentError::CacheUnavailable("Path traversal detected".to_string()));
        }

        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            SegmentError::CacheUnavailable(format!(
                "Failed to create cache directory {:?}: {}",
                dir, e
            ))
        })?;
        debug!("Opened disk cache namespace {:?}", dir);

        Ok(Arc::new(DiskBucket { dir }))
    }
}

struct DiskBucket {
    dir: PathBuf,
}

impl DiskBucket {
    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.dir.join(hex::encode(hasher.finalize()))
    }
}

#[async_trait]
impl CacheBucket for DiskBucket {
    async fn lookup(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.entry_path(key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SegmentError::CacheUnavailable(format!(
                "Failed to read cache entry {:?}: {}",
                path, e
            ))),
        }
    }

    async fn put(&self, key: &str, blob: Bytes) -> Result<()> {
        let path = self.entry_path(key);
        let dir = self.dir.clone();
        let body = blob.clone();
        let target = path.clone();

        // Unique temp file per writer, then rename into place
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| {
                SegmentError::CacheUnavailable(format!("Failed to create temp file: {}", e))
            })?;
            temp.write_all(&body).map_err(|e| {
                SegmentError::CacheUnavailable(format!("Failed to write cache entry: {}", e))
            })?;
            temp.persist(&target).map_err(|e| {
                SegmentError::CacheUnavailable(format!("Failed to commit cache entry: {}", e.error))
            })?;
            Ok(())
        })
        .await
        .map_err(|e| SegmentError::CacheUnavailable(format!("Cache write task failed: {}", e)))??;

        info!("Cached {} bytes at {:?}", blob.len(), path);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SegmentError::CacheUnavailable(format!(
                "Failed to remove cache entry: {}",
                e
            ))),
        }
    }
}

/// In-process store with an optional byte quota per namespace
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    buckets: Arc<RwLock<HashMap<String, Arc<MemoryBucket>>>>,
    quota_bytes: Option<usize>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            quota_bytes: Some(quota_bytes),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, namespace: &str) -> Result<Arc<dyn CacheBucket>> {
        validate_namespace(namespace)?;
        let bucket: Arc<MemoryBucket> = self
            .buckets
            .write()
            .entry(namespace.to_string())
            .or_insert_with(|| {
                Arc::new(MemoryBucket {
                    entries: RwLock::new(HashMap::new()),
                    quota_bytes: self.quota_bytes,
                })
            })
            .clone();
        let bucket: Arc<dyn CacheBucket> = bucket;
        Ok(bucket)
    }
}

#[derive(Debug)]
struct MemoryBucket {
    entries: RwLock<HashMap<String, Bytes>>,
    quota_bytes: Option<usize>,
}

#[async_trait]
impl CacheBucket for MemoryBucket {
    async fn lookup(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, blob: Bytes) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(quota) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            if used.saturating_add(blob.len()) > quota {
                return Err(SegmentError::CacheUnavailable(format!(
                    "Quota exceeded: {} + {} > {} bytes",
                    used,
                    blob.len(),
                    quota
                )));
            }
        }
        entries.insert(key.to_string(), blob);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }
}

fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty()
        || namespace.len() > 255
        || namespace.contains("..")
        || namespace.contains('/')
        || namespace.contains('\\')
    {
        return Err(SegmentError::CacheUnavailable(format!(
            "Invalid cache namespace '{}'",
            namespace
        )));
    }
    Ok(())
}

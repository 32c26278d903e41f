//! URL-keyed model blob cache
//!
//! Entries are addressed by the exact URL string and never expire. Publishing
//! an updated model therefore needs a new URL, or an explicit
//! [`ModelCache::invalidate`] of the old one.
//!
//! Two concurrent fetches of the same URL are not deduplicated; both may hit
//! the network and the last `put` wins.

pub mod fetch;
pub mod store;

pub use fetch::{Fetcher, HttpFetcher};
pub use store::{CacheBucket, CacheStore, DiskCacheStore, MemoryCacheStore};

use crate::error::{Result, SegmentError};
use crate::models::ModelDescriptor;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cache-then-network model fetcher.
///
/// Failures of the cache store are logged and absorbed: the caller always
/// gets the blob from the network instead.
pub struct ModelCache {
    store: Option<Arc<dyn CacheStore>>,
    fetcher: Arc<dyn Fetcher>,
    namespace: String,
}

impl ModelCache {
    pub fn new(store: Arc<dyn CacheStore>, fetcher: Arc<dyn Fetcher>, namespace: impl Into<String>) -> Self {
        Self {
            store: Some(store),
            fetcher,
            namespace: namespace.into(),
        }
    }

    /// Cache with storage disabled; every fetch goes to the network
    pub fn uncached(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            store: None,
            fetcher,
            namespace: String::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Fetch the blob stored under `url`, populating the cache on a miss
    pub async fn fetch(&self, url: &str) -> Result<Bytes> {
        let mut bucket = self.open_bucket().await;

        if let Some(b) = &bucket {
            match b.lookup(url).await {
                Ok(Some(blob)) => {
                    debug!("Cache hit for {} ({} bytes)", url, blob.len());
                    return Ok(blob);
                }
                Ok(None) => debug!("Cache miss for {}", url),
                Err(e) => {
                    warn!("Cache lookup failed for {}, fetching directly: {}", url, e);
                    bucket = None;
                }
            }
        }

        let body = self.fetcher.fetch(url).await?;

        if let Some(b) = bucket {
            match Self::store_and_reread(b.as_ref(), url, body.clone()).await {
                Ok(stored) => return Ok(stored),
                Err(e) => warn!("Could not cache {}, using uncached body: {}", url, e),
            }
        }

        Ok(body)
    }

    /// Fetch a described model and check it against its declared integrity data
    pub async fn fetch_model(&self, model: &ModelDescriptor) -> Result<Bytes> {
        let blob = self.fetch(&model.url).await?;

        if let Some(expected) = &model.sha256 {
            let mut hasher = Sha256::new();
            hasher.update(&blob);
            let computed = hex::encode(hasher.finalize());

            if !computed.eq_ignore_ascii_case(expected) {
                if let Err(e) = self.invalidate(&model.url).await {
                    warn!("Failed to evict corrupt entry for {}: {}", model.name, e);
                }
                return Err(SegmentError::Model(format!(
                    "Checksum mismatch for model {}: expected {}, got {}",
                    model.name, expected, computed
                )));
            }
            debug!("Verified checksum for model {}", model.name);
        }

        let expected_bytes = model.expected_bytes();
        let actual = blob.len() as u64;
        if expected_bytes > 0 && actual.abs_diff(expected_bytes) > expected_bytes / 10 {
            warn!(
                "Model {} is {} bytes, declared about {} MB",
                model.name, actual, model.size_mb
            );
        }

        info!("Model {} ready ({} bytes)", model.name, actual);
        Ok(blob)
    }

    /// Remove the entry stored under `url`. Returns whether one existed.
    pub async fn invalidate(&self, url: &str) -> Result<bool> {
        let store = match &self.store {
            Some(store) => store,
            None => return Ok(false),
        };
        let bucket = store.open(&self.namespace).await?;
        let removed = bucket.remove(url).await?;
        if removed {
            info!("Invalidated cache entry for {}", url);
        }
        Ok(removed)
    }

    async fn open_bucket(&self) -> Option<Arc<dyn CacheBucket>> {
        let store = self.store.as_ref()?;
        match store.open(&self.namespace).await {
            Ok(bucket) => Some(bucket),
            Err(e) => {
                warn!("Model cache unavailable, fetching directly: {}", e);
                None
            }
        }
    }

    async fn store_and_reread(bucket: &dyn CacheBucket, url: &str, body: Bytes) -> Result<Bytes> {
        bucket.put(url, body).await?;
        bucket.lookup(url).await?.ok_or_else(|| {
            SegmentError::CacheUnavailable(format!("Entry for {} missing after store", url))
        })
    }
}

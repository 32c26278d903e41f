//! Direct network fetch of model blobs

use crate::error::{Result, SegmentError};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::info;

/// Uncached blob source
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

/// HTTPS fetcher with a size cap and a per-request timeout
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, max_bytes })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        validate_url(url)?;

        info!("Downloading {}", url);
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(SegmentError::Model(format!(
                "Failed to download {}: HTTP {}",
                url,
                response.status()
            )));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_bytes {
                return Err(SegmentError::Model(format!(
                    "Model too large: {} bytes (max {} bytes)",
                    content_length, self.max_bytes
                )));
            }
        }

        let bytes = response.bytes().await?;

        if bytes.len() as u64 > self.max_bytes {
            return Err(SegmentError::Model(format!(
                "Downloaded model too large: {} bytes (max {} bytes)",
                bytes.len(),
                self.max_bytes
            )));
        }

        if bytes.is_empty() {
            return Err(SegmentError::Model(format!("Empty response body from {}", url)));
        }

        info!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes)
    }
}

/// Only absolute HTTPS URLs of sane length are fetched
pub fn validate_url(url: &str) -> Result<()> {
    if url.is_empty() || url.len() > 2048 {
        return Err(SegmentError::Model("Invalid URL".to_string()));
    }

    if !url.starts_with("https://") {
        return Err(SegmentError::Model(
            "Only HTTPS URLs are allowed for model downloads".to_string(),
        ));
    }

    Ok(())
}

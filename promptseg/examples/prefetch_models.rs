//! Download the built-in model pairs into the local cache
//!
//! Usage: prefetch_models [high-precision|fallback|all]

use promptseg::cache::{DiskCacheStore, HttpFetcher, ModelCache};
use promptseg::models::sam::sam_vit_b;
use promptseg::{ModelTier, PipelineConfig};
use std::env;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let which = env::args().nth(1).unwrap_or_else(|| "all".to_string());
    let tiers = match which.as_str() {
        "high-precision" => vec![ModelTier::HighPrecision],
        "fallback" => vec![ModelTier::Fallback],
        "all" => vec![ModelTier::HighPrecision, ModelTier::Fallback],
        other => {
            eprintln!("Unknown tier: {}", other);
            eprintln!("Available tiers: high-precision, fallback, all");
            std::process::exit(1);
        }
    };

    let config = PipelineConfig::from_env();
    let fetcher = HttpFetcher::new(
        Duration::from_secs(config.download_timeout_secs),
        config.max_model_bytes,
    )?;
    let cache = ModelCache::new(
        Arc::new(DiskCacheStore::new(config.cache_dir.clone())),
        Arc::new(fetcher),
        config.cache_namespace.clone(),
    );

    let variants = sam_vit_b();
    for tier in tiers {
        let Some(pair) = variants.get(tier) else {
            continue;
        };
        for model in [&pair.encoder, &pair.decoder] {
            println!("Fetching {} ({} tier)...", model.name, tier);
            let blob = cache.fetch_model(model).await?;
            println!("{}: {} bytes", model.name, blob.len());
        }
    }

    println!("Models cached under {:?}", config.cache_dir);
    Ok(())
}

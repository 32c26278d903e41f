//! Segment the object under a point of an image file
//!
//! Usage: segment_file <image> <x> <y> [output.png]

use promptseg::{InferencePipeline, PipelineConfig, Prompt, SourceImage};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: segment_file <image> <x> <y> [output.png]");
        std::process::exit(1);
    }

    let config = PipelineConfig::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_level))
        .init();

    let x: f32 = args[2].parse()?;
    let y: f32 = args[3].parse()?;
    let output = args.get(4).cloned().unwrap_or_else(|| "cutout.png".to_string());

    let pipeline = InferencePipeline::new(config)?;
    pipeline.load_models().await?;
    println!(
        "Models loaded: tier {:?}, backends {:?}",
        pipeline.tier(),
        pipeline.backends()
    );

    let image = SourceImage::open(&args[1]).await?;
    pipeline.bind_image(image)?;
    pipeline.run_encoder().await?;

    let cutout = pipeline.segment(Prompt::new(x, y)).await?;
    cutout.save(&output)?;

    let timings = pipeline.last_timings();
    println!(
        "Saved {} (encoder {:?}, decoder {:?})",
        output, timings.encoder, timings.decoder
    );
    Ok(())
}

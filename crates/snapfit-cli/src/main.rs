use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use snapfit_capture::{spawn_session, CameraStream, FakeSource, StreamTrack};
use snapfit_core::{compute_contain, Compressor};
use snapfit_flow::{FlowConfig, JobApi, JobApiError, JobRecord, JobStatus, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "snapfit", about = "Snapfit capture pipeline CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress an image file to a size budget
    Compress {
        /// Input image (JPEG, PNG, or WebP)
        input: PathBuf,
        /// Output path for the compressed JPEG
        output: PathBuf,
        /// Size budget in megabytes
        #[arg(long, default_value_t = 5.0)]
        max_size_mb: f64,
        /// Pin the starting JPEG quality (0..=1) instead of deriving it
        #[arg(long)]
        quality: Option<f32>,
    },
    /// Show the contain-fit transform for an image and a destination size
    Info {
        /// Input image
        input: PathBuf,
        /// Destination width in pixels
        #[arg(long, default_value_t = 500)]
        dst_width: u32,
        /// Destination height in pixels
        #[arg(long, default_value_t = 500)]
        dst_height: u32,
    },
    /// Run the capture and readiness pipeline against in-memory fakes
    Selftest,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compress {
            input,
            output,
            max_size_mb,
            quality,
        } => compress(input, output, max_size_mb, quality)?,
        Commands::Info {
            input,
            dst_width,
            dst_height,
        } => info(input, dst_width, dst_height)?,
        Commands::Selftest => selftest().await?,
    }

    Ok(())
}

fn compress(input: PathBuf, output: PathBuf, max_size_mb: f64, quality: Option<f32>) -> Result<()> {
    let bytes = std::fs::read(&input).with_context(|| format!("reading {}", input.display()))?;

    let mut compressor = Compressor::new().max_size_mb(max_size_mb);
    if let Some(q) = quality {
        compressor = compressor.initial_quality(q);
    }

    let outcome = compressor.compress(&bytes)?;
    std::fs::write(&output, &outcome.data)
        .with_context(|| format!("writing {}", output.display()))?;

    println!(
        "{} -> {} ({:.2} MB, quality {:.2}, {} attempt(s){})",
        input.display(),
        output.display(),
        outcome.size_mb,
        outcome.quality,
        outcome.attempts,
        if outcome.reached_budget {
            ""
        } else {
            ", budget NOT reached"
        }
    );
    Ok(())
}

fn info(input: PathBuf, dst_width: u32, dst_height: u32) -> Result<()> {
    let bytes = std::fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
    let img = image::load_from_memory(&bytes).context("decoding image")?;

    let transform = compute_contain(
        img.width() as f32,
        img.height() as f32,
        dst_width as f32,
        dst_height as f32,
    )?;
    println!("{}", serde_json::to_string_pretty(&transform)?);
    Ok(())
}

/// In-memory backend for the selftest path.
struct LocalApi;

#[async_trait]
impl JobApi for LocalApi {
    async fn create_job(&self, payload: &[u8]) -> Result<JobRecord, JobApiError> {
        tracing::info!(bytes = payload.len(), "selftest payload accepted");
        Ok(JobRecord::new("selftest-job"))
    }

    async fn verify(&self, _job_id: &str) -> Result<JobStatus, JobApiError> {
        Ok(JobStatus::Verified)
    }
}

async fn selftest() -> Result<()> {
    // Fast tick so the readiness loop finishes in well under a second.
    let config = FlowConfig {
        tick_interval: std::time::Duration::from_millis(20),
        ..FlowConfig::from_env()
    };

    let stream = CameraStream::new(
        "fake://selftest",
        vec![StreamTrack::new("video"), StreamTrack::new("meta")],
    );
    let monitor = stream.monitor();

    let session = spawn_session(
        Box::new(FakeSource::new(1920, 1080, [120, 130, 140])),
        stream,
        None,
        500,
        500,
        Compressor::new().max_size_mb(config.max_size_mb),
    )?;

    let photo = session.take_photo(false).await?;
    println!(
        "capture: {:.2} MB at quality {:.2}",
        photo.size_mb, photo.quality
    );
    session.close();
    anyhow::ensure!(monitor.all_ended(), "stream tracks still live after close");

    let ready = Orchestrator::new(Arc::new(LocalApi), config)
        .run(photo.jpeg)
        .await;
    println!(
        "ready: job {} (degraded: {})",
        ready.job_id, ready.degraded
    );
    Ok(())
}

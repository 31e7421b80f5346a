//! Video processing worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vproc_media::{FfmpegTranscoder, FfprobeProber, MediaConfig};
use vproc_queue::{QueueConfig, RedisJobStore};
use vproc_worker::{PgVideoRepository, PipelineOptions, WorkerConfig, WorkerPool};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for rediss:// URLs)
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing()?;

    info!("Starting vproc-worker");

    let options = PipelineOptions::from_env();
    let config = WorkerConfig::from_env();
    let media = MediaConfig::from_env();
    info!("Pipeline options: {:?}", options);
    info!("Worker config: {:?}", config);

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr.parse().context("invalid METRICS_ADDR")?;
        vproc_worker::metrics::init_metrics(addr).context("failed to start metrics exporter")?;
        info!("Serving metrics on {}", addr);
    }

    let queue_config = QueueConfig {
        max_active: options.max_concurrent,
        max_attempts: options.max_attempts,
        ..QueueConfig::from_env()
    };
    let store = RedisJobStore::new(queue_config).context("failed to create job store")?;
    store.ping().await.context("Redis is unreachable")?;

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let videos = PgVideoRepository::connect(&database_url, 5)
        .await
        .context("failed to connect to the video database")?;

    let pool = WorkerPool::new(
        Arc::new(store),
        Arc::new(FfprobeProber::new(&media)),
        Arc::new(FfmpegTranscoder::new(&media)),
        Arc::new(videos),
        options,
        config,
    );
    let handle = pool.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    if let Err(e) = handle.shutdown().await {
        warn!("Shutdown finished with error: {}", e);
    }

    info!("Worker shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vproc_worker=info,vproc_media=info,vproc_queue=info"))
        .add_directive("sqlx=warn".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

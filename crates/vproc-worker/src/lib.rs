//! Post-upload video processing worker.
//!
//! This crate provides:
//! - The worker pool that drains the job store with bounded concurrency
//! - The per-job pipeline (probe, thumbnail, fast-start remux)
//! - Retry, timeout and stalled-job handling
//! - Best-effort mirroring of `processing_status` onto video records
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod repository;
pub mod retry;

pub use config::{PipelineOptions, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::{PoolHandle, WorkerPool};
pub use logging::JobLogger;
pub use pipeline::{PipelineOutput, VideoPipeline};
pub use repository::{
    mirror_status, InMemoryVideoRepository, PgVideoRepository, RepositoryError, RepositoryResult,
    VideoRepository,
};

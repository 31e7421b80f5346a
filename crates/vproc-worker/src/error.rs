//! Worker error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::repository::RepositoryError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Source file missing: {0}")]
    SourceMissing(PathBuf),

    #[error("Job timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Job task panicked")]
    Panicked,

    #[error("Job task was cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Probe error: {0}")]
    Probe(#[from] vproc_media::ProbeError),

    #[error("Transcode error: {0}")]
    Transcode(#[from] vproc_media::TranscodeError),

    #[error("Video repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Queue error: {0}")]
    Queue(#[from] vproc_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if another attempt could succeed.
    ///
    /// A source file missing at dequeue or a missing video record will still
    /// be missing on the next attempt, so those fail the job straight away.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            WorkerError::SourceMissing(_)
                | WorkerError::ConfigError(_)
                | WorkerError::Repository(RepositoryError::VideoNotFound(_))
        )
    }

    /// Short description safe to show to clients.
    ///
    /// Never contains filesystem paths or raw tool output.
    pub fn summary(&self) -> String {
        match self {
            WorkerError::SourceMissing(_) => "source file is missing".to_string(),
            WorkerError::Timeout(d) => format!("processing timed out after {}s", d.as_secs()),
            WorkerError::Panicked => "processing crashed unexpectedly".to_string(),
            WorkerError::Cancelled => "processing was cancelled".to_string(),
            WorkerError::ConfigError(_) => "worker is misconfigured".to_string(),
            WorkerError::Probe(e) => e.summary(),
            WorkerError::Transcode(e) => e.summary(),
            WorkerError::Repository(RepositoryError::VideoNotFound(_)) => {
                "video record does not exist".to_string()
            }
            WorkerError::Repository(_) => "video record update failed".to_string(),
            WorkerError::Queue(_) => "job store unavailable".to_string(),
            WorkerError::Io(_) => "file system error".to_string(),
        }
    }
}

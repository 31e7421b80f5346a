//! Queue error types.

use thiserror::Error;

use vproc_models::JobState;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {job_id} is {state}, expected {expected}")]
    InvalidState {
        job_id: String,
        state: JobState,
        expected: JobState,
    },

    #[error("Queue is closed")]
    Closed,

    #[error("Job {0} kept changing during an update")]
    Conflict(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn job_not_found(job_id: impl std::fmt::Display) -> Self {
        Self::JobNotFound(job_id.to_string())
    }

    /// Whether the same call may succeed if repeated. A job in the wrong
    /// state or a corrupt record will not fix itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueueError::ConnectionFailed(_) | QueueError::Conflict(_) | QueueError::Redis(_)
        )
    }
}

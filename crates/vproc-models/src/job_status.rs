//! Status views for polling clients.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Job, JobState};

/// Snapshot of a job as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobStatus {
    /// Queue state
    pub state: JobState,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Position in the waiting queue (0-based), only while waiting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u64>,
    /// Execution attempts so far
    pub attempts: u32,
    /// Last failure summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl JobStatus {
    /// Build from a job record and its queue position.
    pub fn from_job(job: &Job, queue_position: Option<u64>) -> Self {
        Self {
            state: job.state,
            progress: job.progress_percent,
            queue_position: if job.state == JobState::Waiting {
                queue_position
            } else {
                None
            },
            attempts: job.attempts,
            last_error: job.last_error.clone(),
        }
    }
}

/// Status kind reported by the status query, including `not_found`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Waiting,
    Active,
    Completed,
    Failed,
    NotFound,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Waiting => "waiting",
            StatusKind::Active => "active",
            StatusKind::Completed => "completed",
            StatusKind::Failed => "failed",
            StatusKind::NotFound => "not_found",
        }
    }
}

impl From<JobState> for StatusKind {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Waiting => StatusKind::Waiting,
            JobState::Active => StatusKind::Active,
            JobState::Completed => StatusKind::Completed,
            JobState::Failed => StatusKind::Failed,
        }
    }
}

/// Response of the processing status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingStatusResponse {
    pub status: StatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Sanitized failure summary, only for failed jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingStatusResponse {
    /// Response for a video that never went through the queue.
    pub fn not_found() -> Self {
        Self {
            status: StatusKind::NotFound,
            progress: None,
            queue_position: None,
            attempts: None,
            error: None,
        }
    }
}

impl From<JobStatus> for ProcessingStatusResponse {
    fn from(status: JobStatus) -> Self {
        let error = if status.state == JobState::Failed {
            status.last_error
        } else {
            None
        };
        Self {
            status: status.state.into(),
            progress: Some(status.progress),
            queue_position: status.queue_position,
            attempts: Some(status.attempts),
            error,
        }
    }
}

/// Job counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QueueStats {
    /// Ready to run
    pub waiting: u64,
    /// Waiting for a retry delay to elapse
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    /// Jobs still in flight (waiting, delayed, or active).
    pub fn total(&self) -> u64 {
        self.waiting + self.delayed + self.active
    }
}

//! Job definitions for queue processing.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::VideoId;

/// Unique identifier for a job.
///
/// Jobs are keyed by the video they process, so the id is derived rather
/// than generated. Enqueueing the same video twice lands on the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Derive the job id for a video.
    pub fn for_video(video_id: &VideoId) -> Self {
        Self(format!("video-{}", video_id))
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Job state in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is waiting in queue (possibly for a retry delay to elapse)
    #[default]
    Waiting,
    /// Job is held by a worker
    Active,
    /// Job completed successfully
    Completed,
    /// Job failed after exhausting its attempts
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scheduling priority. Lower values are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const HIGH: Priority = Priority(1);
    pub const LOW: Priority = Priority(10);
}

impl Default for Priority {
    fn default() -> Self {
        Self::HIGH
    }
}

/// A processing job for one uploaded video.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Job ID (derived from the video ID)
    pub id: JobId,

    /// Video this job processes
    pub video_id: VideoId,

    /// Absolute path of the uploaded file
    pub video_path: PathBuf,

    /// Queue state
    #[serde(default)]
    pub state: JobState,

    /// Scheduling priority
    #[serde(default)]
    pub priority: Priority,

    /// Progress percentage (0-100)
    #[serde(default)]
    pub progress_percent: u8,

    /// Execution attempts so far
    #[serde(default)]
    pub attempts: u32,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Start of the most recent attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Time the job reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Last failure summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Earliest time a waiting retry may run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,

    /// Worker holding the job while active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl Job {
    /// Create a new waiting job.
    pub fn new(video_id: VideoId, video_path: impl Into<PathBuf>) -> Self {
        Self {
            id: JobId::for_video(&video_id),
            video_id,
            video_path: video_path.into(),
            state: JobState::Waiting,
            priority: Priority::default(),
            progress_percent: 0,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            last_error: None,
            retry_at: None,
            worker_id: None,
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to active for a new attempt.
    pub fn activate(&mut self, worker_id: impl Into<String>) {
        self.state = JobState::Active;
        self.attempts += 1;
        self.started_at = Some(Utc::now());
        self.retry_at = None;
        self.worker_id = Some(worker_id.into());
    }

    /// Record progress. Never moves backwards.
    pub fn set_progress(&mut self, percent: u8) {
        self.progress_percent = self.progress_percent.max(percent.min(100));
    }

    /// Mark job as completed.
    pub fn complete(&mut self) {
        self.state = JobState::Completed;
        self.progress_percent = 100;
        self.finished_at = Some(Utc::now());
        self.worker_id = None;
    }

    /// Put the job back in the queue after a failed attempt. Progress is
    /// kept; pollers never see it go backwards.
    pub fn schedule_retry(&mut self, error: impl Into<String>, retry_at: DateTime<Utc>) {
        self.state = JobState::Waiting;
        self.last_error = Some(error.into());
        self.retry_at = Some(retry_at);
        self.worker_id = None;
    }

    /// Mark job as failed for good.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = JobState::Failed;
        self.last_error = Some(error.into());
        self.finished_at = Some(Utc::now());
        self.retry_at = None;
        self.worker_id = None;
    }

    /// Return a stalled active job to the queue.
    pub fn requeue_stalled(&mut self) {
        self.state = JobState::Waiting;
        self.worker_id = None;
    }
}

/// Handle returned by enqueue.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobHandle {
    /// Job ID
    pub job_id: JobId,
    /// State at the time of the call
    pub state: JobState,
    /// Position in the waiting queue (0-based), if waiting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u64>,
    /// False when an existing job was returned instead of a new one
    pub created: bool,
}

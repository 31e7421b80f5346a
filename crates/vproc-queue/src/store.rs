//! The job store contract.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vproc_models::{Job, JobHandle, JobId, JobStatus, Priority, QueueStats, VideoId};

use crate::error::QueueResult;

/// Request to process an uploaded video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub video_id: VideoId,
    /// Absolute path of the uploaded file
    pub video_path: PathBuf,
    #[serde(default)]
    pub priority: Priority,
}

impl EnqueueRequest {
    pub fn new(video_id: impl Into<VideoId>, video_path: impl Into<PathBuf>) -> Self {
        Self {
            video_id: video_id.into(),
            video_path: video_path.into(),
            priority: Priority::default(),
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// The job record this request creates.
    pub fn into_job(self) -> Job {
        Job::new(self.video_id, self.video_path).with_priority(self.priority)
    }
}

/// Jobs removed by a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub completed_removed: u64,
    pub failed_removed: u64,
}

/// Outcome of a stalled-job recovery pass.
#[derive(Debug, Clone, Default)]
pub struct StalledReport {
    /// Jobs returned to the waiting queue
    pub requeued: Vec<JobId>,
    /// Jobs that stalled on their final attempt and were failed
    pub failed: Vec<Job>,
}

impl StalledReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

/// `last_error` recorded on jobs that stall on their final attempt.
pub const STALLED_FINAL_ATTEMPT_ERROR: &str = "processing stalled on its final attempt";

/// Durable queue of processing jobs, shared by all workers.
///
/// Only the worker pool mutates jobs after enqueue. Every mutating call
/// other than `enqueue` expects the job to be `active`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Add a job for a video. Idempotent by video id: an existing job is
    /// returned as-is with `created == false`.
    async fn enqueue(&self, request: EnqueueRequest) -> QueueResult<JobHandle>;

    /// Claim the next ready job for `worker_id`.
    ///
    /// Returns `None` when nothing is ready or when `max_active` jobs are
    /// already active. The claimed job is held for `lease`; an expired lease
    /// makes it eligible for stalled recovery.
    async fn dequeue(&self, worker_id: &str, lease: Duration) -> QueueResult<Option<Job>>;

    /// Extend the lease of an active job.
    async fn renew_lease(&self, job_id: &JobId, lease: Duration) -> QueueResult<()>;

    /// Record progress (clamped to 100, never decreasing).
    async fn mark_progress(&self, job_id: &JobId, percent: u8) -> QueueResult<()>;

    /// Finish an active job successfully.
    async fn mark_completed(&self, job_id: &JobId) -> QueueResult<()>;

    /// Return an active job to the queue after a failed attempt. It becomes
    /// ready once `delay` has elapsed.
    async fn retry_later(&self, job_id: &JobId, error: &str, delay: Duration) -> QueueResult<()>;

    /// Fail an active job for good.
    async fn mark_failed(&self, job_id: &JobId, error: &str) -> QueueResult<()>;

    /// Fetch the full job record.
    async fn get_job(&self, job_id: &JobId) -> QueueResult<Option<Job>>;

    /// Fetch the job's state, progress and queue position.
    async fn get_status(&self, job_id: &JobId) -> QueueResult<Option<JobStatus>>;

    /// Purge terminal jobs that finished longer ago than the given ages.
    async fn sweep_old(
        &self,
        completed_after: Duration,
        failed_after: Duration,
    ) -> QueueResult<SweepReport>;

    /// Return active jobs with expired leases to the queue. Jobs that have
    /// used all `max_attempts` are failed instead.
    async fn recover_stalled(&self) -> QueueResult<StalledReport>;

    /// Job counts per state.
    async fn stats(&self) -> QueueResult<QueueStats>;

    /// Stop handing out jobs. Waiting jobs stay persisted.
    async fn close(&self) -> QueueResult<()>;

    /// Enqueue a freshly uploaded video with default priority.
    async fn enqueue_video(
        &self,
        video_id: &VideoId,
        video_path: &std::path::Path,
    ) -> QueueResult<JobHandle> {
        self.enqueue(EnqueueRequest::new(video_id.clone(), video_path))
            .await
    }
}

/// `now + duration`, saturating far in the future on overflow.
pub(crate) fn time_after(now: chrono::DateTime<chrono::Utc>, duration: Duration) -> chrono::DateTime<chrono::Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
}

/// `now - duration`, saturating at the epoch.
pub(crate) fn time_before(now: chrono::DateTime<chrono::Utc>, duration: Duration) -> chrono::DateTime<chrono::Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH)
}

//! In-process job store.
//!
//! Same semantics as the Redis store, kept behind one mutex. Nothing
//! survives a restart, so this is for tests and single-process setups.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use vproc_models::{Job, JobHandle, JobId, JobState, JobStatus, Priority, QueueStats};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::rank::BandRank;
use crate::store::{
    time_after, time_before, EnqueueRequest, JobStore, StalledReport, SweepReport,
    STALLED_FINAL_ATTEMPT_ERROR,
};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    /// Ready jobs ordered by (priority, sequence within the band)
    waiting: BTreeSet<(Priority, u64, JobId)>,
    waiting_keys: HashMap<JobId, (Priority, u64)>,
    bands: BTreeMap<Priority, BandRank>,
    /// Retries ordered by the time they become ready
    delayed: BTreeSet<(DateTime<Utc>, JobId)>,
    /// Active jobs and their lease deadlines
    active: HashMap<JobId, DateTime<Utc>>,
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
    closed: bool,
}

impl Inner {
    fn push_waiting(&mut self, job_id: JobId, priority: Priority) {
        let seq = self.bands.entry(priority).or_default().push_next();
        self.waiting.insert((priority, seq, job_id.clone()));
        self.waiting_keys.insert(job_id, (priority, seq));
    }

    fn pop_waiting(&mut self) -> Option<JobId> {
        let (priority, seq, job_id) = self.waiting.pop_first()?;
        self.waiting_keys.remove(&job_id);
        if let Some(band) = self.bands.get_mut(&priority) {
            band.remove(seq);
            if band.is_sparse() {
                self.compact_band(priority);
            }
        }
        Some(job_id)
    }

    /// Renumber a band whose rank tree is mostly empty slots.
    fn compact_band(&mut self, priority: Priority) {
        let mut members: Vec<(u64, JobId)> = self
            .waiting_keys
            .iter()
            .filter(|(_, (p, _))| *p == priority)
            .map(|(job_id, (_, seq))| (*seq, job_id.clone()))
            .collect();
        members.sort_unstable();

        let Some(band) = self.bands.get_mut(&priority) else {
            return;
        };
        let renumbered = band.rebuild(members.len());
        for ((old, job_id), seq) in members.into_iter().zip(renumbered) {
            self.waiting.remove(&(priority, old, job_id.clone()));
            self.waiting.insert((priority, seq, job_id.clone()));
            self.waiting_keys.insert(job_id, (priority, seq));
        }
        debug!("Compacted waiting band {}", priority.0);
    }

    /// Jobs ahead of `job_id`: every job in a more urgent band plus the
    /// earlier ones in its own band.
    fn queue_position(&self, job_id: &JobId) -> Option<u64> {
        let (priority, seq) = self.waiting_keys.get(job_id)?;
        let ahead: u64 = self.bands.range(..*priority).map(|(_, band)| band.len()).sum();
        let band = self.bands.get(priority)?;
        Some(ahead + band.rank(*seq))
    }

    fn promote_due(&mut self, now: DateTime<Utc>) {
        while let Some((ready_at, _)) = self.delayed.first() {
            if *ready_at > now {
                break;
            }
            let Some((_, job_id)) = self.delayed.pop_first() else {
                break;
            };
            if let Some(priority) = self.jobs.get(&job_id).map(|j| j.priority) {
                debug!("Promoting delayed job {}", job_id);
                self.push_waiting(job_id, priority);
            }
        }
    }

    fn active_job_mut(&mut self, job_id: &JobId) -> QueueResult<&mut Job> {
        let job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::job_not_found(job_id))?;
        if job.state != JobState::Active {
            return Err(QueueError::InvalidState {
                job_id: job_id.to_string(),
                state: job.state,
                expected: JobState::Active,
            });
        }
        Ok(job)
    }

    /// Drop the oldest entries of a terminal list beyond `keep`.
    fn trim(&mut self, state: JobState, keep: usize) {
        loop {
            let list = match state {
                JobState::Completed => &mut self.completed,
                _ => &mut self.failed,
            };
            if list.len() <= keep {
                break;
            }
            if let Some(job_id) = list.pop_front() {
                self.jobs.remove(&job_id);
            }
        }
    }

    /// Remove terminal jobs that finished before `cutoff`.
    fn sweep(&mut self, state: JobState, cutoff: DateTime<Utc>) -> u64 {
        let list = match state {
            JobState::Completed => std::mem::take(&mut self.completed),
            _ => std::mem::take(&mut self.failed),
        };
        let mut kept = VecDeque::with_capacity(list.len());
        let mut removed = 0;
        for job_id in list {
            let expired = self
                .jobs
                .get(&job_id)
                .and_then(|j| j.finished_at)
                .map(|finished| finished < cutoff)
                .unwrap_or(true);
            if expired {
                self.jobs.remove(&job_id);
                removed += 1;
            } else {
                kept.push_back(job_id);
            }
        }
        match state {
            JobState::Completed => self.completed = kept,
            _ => self.failed = kept,
        }
        removed
    }
}

/// Job store held in process memory.
#[derive(Debug)]
pub struct InMemoryJobStore {
    config: QueueConfig,
    inner: Mutex<Inner>,
}

impl InMemoryJobStore {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, request: EnqueueRequest) -> QueueResult<JobHandle> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(QueueError::Closed);
        }
        let job_id = vproc_models::JobId::for_video(&request.video_id);

        if let Some(existing) = inner.jobs.get(&job_id) {
            debug!("Job {} already exists ({}), not duplicating", job_id, existing.state);
            let state = existing.state;
            return Ok(JobHandle {
                queue_position: inner.queue_position(&job_id),
                job_id,
                state,
                created: false,
            });
        }

        let job = request.into_job();
        let priority = job.priority;
        inner.jobs.insert(job_id.clone(), job);
        inner.push_waiting(job_id.clone(), priority);

        info!("Enqueued job {}", job_id);
        Ok(JobHandle {
            queue_position: inner.queue_position(&job_id),
            job_id,
            state: JobState::Waiting,
            created: true,
        })
    }

    async fn dequeue(&self, worker_id: &str, lease: Duration) -> QueueResult<Option<Job>> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Ok(None);
        }

        let now = Utc::now();
        inner.promote_due(now);

        if inner.active.len() >= self.config.max_active {
            return Ok(None);
        }

        let Some(job_id) = inner.pop_waiting() else {
            return Ok(None);
        };

        inner.active.insert(job_id.clone(), time_after(now, lease));
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| QueueError::job_not_found(&job_id))?;
        job.activate(worker_id);

        Ok(Some(job.clone()))
    }

    async fn renew_lease(&self, job_id: &JobId, lease: Duration) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.active_job_mut(job_id)?;
        inner.active.insert(job_id.clone(), time_after(Utc::now(), lease));
        Ok(())
    }

    async fn mark_progress(&self, job_id: &JobId, percent: u8) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.active_job_mut(job_id)?.set_progress(percent);
        Ok(())
    }

    async fn mark_completed(&self, job_id: &JobId) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.active_job_mut(job_id)?.complete();
        inner.active.remove(job_id);
        inner.completed.push_back(job_id.clone());
        inner.trim(JobState::Completed, self.config.keep_completed);
        Ok(())
    }

    async fn retry_later(&self, job_id: &JobId, error: &str, delay: Duration) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let ready_at = time_after(Utc::now(), delay);
        inner.active_job_mut(job_id)?.schedule_retry(error, ready_at);
        inner.active.remove(job_id);
        inner.delayed.insert((ready_at, job_id.clone()));
        Ok(())
    }

    async fn mark_failed(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.active_job_mut(job_id)?.fail(error);
        inner.active.remove(job_id);
        inner.failed.push_back(job_id.clone());
        inner.trim(JobState::Failed, self.config.keep_failed);
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> QueueResult<Option<Job>> {
        Ok(self.inner.lock().await.jobs.get(job_id).cloned())
    }

    async fn get_status(&self, job_id: &JobId) -> QueueResult<Option<JobStatus>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .get(job_id)
            .map(|job| JobStatus::from_job(job, inner.queue_position(job_id))))
    }

    async fn sweep_old(
        &self,
        completed_after: Duration,
        failed_after: Duration,
    ) -> QueueResult<SweepReport> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        Ok(SweepReport {
            completed_removed: inner.sweep(JobState::Completed, time_before(now, completed_after)),
            failed_removed: inner.sweep(JobState::Failed, time_before(now, failed_after)),
        })
    }

    async fn recover_stalled(&self) -> QueueResult<StalledReport> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let expired: Vec<JobId> = inner
            .active
            .iter()
            .filter(|(_, deadline)| **deadline < now)
            .map(|(job_id, _)| job_id.clone())
            .collect();

        let mut report = StalledReport::default();
        for job_id in expired {
            inner.active.remove(&job_id);
            let Some(job) = inner.jobs.get_mut(&job_id) else {
                continue;
            };

            if job.attempts >= self.config.max_attempts {
                job.fail(STALLED_FINAL_ATTEMPT_ERROR);
                warn!("Job {} stalled on its final attempt, failing it", job_id);
                report.failed.push(job.clone());
                inner.failed.push_back(job_id);
                continue;
            }

            job.requeue_stalled();
            let priority = job.priority;
            warn!("Job {} stalled, returning it to the queue", job_id);
            inner.push_waiting(job_id.clone(), priority);
            report.requeued.push(job_id);
        }

        if !report.failed.is_empty() {
            inner.trim(JobState::Failed, self.config.keep_failed);
        }
        Ok(report)
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let inner = self.inner.lock().await;
        Ok(QueueStats {
            waiting: inner.waiting.len() as u64,
            delayed: inner.delayed.len() as u64,
            active: inner.active.len() as u64,
            completed: inner.completed.len() as u64,
            failed: inner.failed.len() as u64,
        })
    }

    async fn close(&self) -> QueueResult<()> {
        self.inner.lock().await.closed = true;
        info!("In-memory job store closed");
        Ok(())
    }
}

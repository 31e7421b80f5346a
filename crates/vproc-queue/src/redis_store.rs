//! Job store backed by Redis.
//!
//! Layout under the configured prefix:
//!
//! - `<prefix>:job:<id>`: the job record as JSON
//! - `<prefix>:waiting`: sorted set, score = priority * 1e13 + enqueue sequence
//! - `<prefix>:delayed`: sorted set, score = ready-at (ms)
//! - `<prefix>:active`: sorted set, score = lease deadline (ms)
//! - `<prefix>:completed`, `<prefix>:failed`: sorted sets, score = finished-at (ms)
//! - `<prefix>:seq`: enqueue sequence counter
//!
//! Enqueue and dequeue run as Lua scripts so deduplication and the global
//! active cap hold across worker processes. Updates to an active job are a
//! compare-and-set script that requires the job to still hold its `active`
//! entry, so a worker whose lease was recovered cannot overwrite the job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use vproc_models::{Job, JobHandle, JobId, JobState, JobStatus, Priority, QueueStats};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::store::{
    time_after, time_before, EnqueueRequest, JobStore, StalledReport, SweepReport,
    STALLED_FINAL_ATTEMPT_ERROR,
};

/// Priority bands are this far apart in the waiting set's score space.
const PRIORITY_BAND: f64 = 1e13;

const ENQUEUE_SCRIPT: &str = r#"
-- KEYS[1] job key, KEYS[2] waiting, KEYS[3] seq
-- ARGV[1] job json, ARGV[2] priority, ARGV[3] job id
if redis.call('SET', KEYS[1], ARGV[1], 'NX') then
  local seq = redis.call('INCR', KEYS[3])
  redis.call('ZADD', KEYS[2], tonumber(ARGV[2]) * 1e13 + seq, ARGV[3])
  return 1
end
return 0
"#;

const DEQUEUE_SCRIPT: &str = r#"
-- KEYS[1] waiting, KEYS[2] delayed, KEYS[3] active, KEYS[4] seq
-- ARGV[1] now ms, ARGV[2] lease deadline ms, ARGV[3] max active,
-- ARGV[4] worker id, ARGV[5] now rfc3339, ARGV[6] job key prefix
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[2], id)
  local raw = redis.call('GET', ARGV[6] .. id)
  if raw then
    local job = cjson.decode(raw)
    local seq = redis.call('INCR', KEYS[4])
    redis.call('ZADD', KEYS[1], (job.priority or 1) * 1e13 + seq, id)
  end
end

if redis.call('ZCARD', KEYS[3]) >= tonumber(ARGV[3]) then
  return false
end

local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
  return false
end

local id = popped[1]
local key = ARGV[6] .. id
local raw = redis.call('GET', key)
if not raw then
  return false
end

local job = cjson.decode(raw)
job.state = 'active'
job.attempts = (job.attempts or 0) + 1
job.started_at = ARGV[5]
job.worker_id = ARGV[4]
job.retry_at = nil
local encoded = cjson.encode(job)
redis.call('SET', key, encoded)
redis.call('ZADD', KEYS[3], ARGV[2], id)
return encoded
"#;

const TRANSITION_SCRIPT: &str = r#"
-- KEYS[1] job key, KEYS[2] active, KEYS[3] destination set
-- ARGV[1] job id, ARGV[2] record as read, ARGV[3] new record,
-- ARGV[4] destination score, empty to stay active
if not redis.call('ZSCORE', KEYS[2], ARGV[1]) then
  return 0
end
if redis.call('GET', KEYS[1]) ~= ARGV[2] then
  return -1
end
redis.call('SET', KEYS[1], ARGV[3])
if ARGV[4] ~= '' then
  redis.call('ZREM', KEYS[2], ARGV[1])
  redis.call('ZADD', KEYS[3], ARGV[4], ARGV[1])
end
return 1
"#;

/// Reads of an active job before giving up on a record that keeps changing.
const TRANSITION_ATTEMPTS: u32 = 3;

/// Where an active job ends up after an update.
enum Landing {
    Active,
    Set(String, i64),
}

/// Waiting-set score: lower priority values first, FIFO within a band.
pub(crate) fn waiting_score(priority: Priority, seq: u64) -> f64 {
    f64::from(priority.0) * PRIORITY_BAND + seq as f64
}

/// Terminal-set score for a finished job.
fn finished_ms(job: &Job) -> i64 {
    job.finished_at.unwrap_or_else(Utc::now).timestamp_millis()
}

/// Key names for one queue.
#[derive(Debug, Clone)]
pub(crate) struct Keys {
    prefix: String,
}

impl Keys {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub(crate) fn job_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    pub(crate) fn job(&self, job_id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    pub(crate) fn set(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    pub(crate) fn waiting(&self) -> String {
        self.set("waiting")
    }

    pub(crate) fn delayed(&self) -> String {
        self.set("delayed")
    }

    pub(crate) fn active(&self) -> String {
        self.set("active")
    }

    pub(crate) fn completed(&self) -> String {
        self.set("completed")
    }

    pub(crate) fn failed(&self) -> String {
        self.set("failed")
    }

    pub(crate) fn seq(&self) -> String {
        self.set("seq")
    }
}

/// Job store shared by every worker process through Redis.
pub struct RedisJobStore {
    client: redis::Client,
    config: QueueConfig,
    keys: Keys,
    enqueue_script: redis::Script,
    dequeue_script: redis::Script,
    transition_script: redis::Script,
    closed: AtomicBool,
}

impl std::fmt::Debug for RedisJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobStore")
            .field("key_prefix", &self.config.key_prefix)
            .field("max_active", &self.config.max_active)
            .finish()
    }
}

impl RedisJobStore {
    /// Create a new store. Does not connect until first use.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            keys: Keys::new(config.key_prefix.clone()),
            config,
            enqueue_script: redis::Script::new(ENQUEUE_SCRIPT),
            dequeue_script: redis::Script::new(DEQUEUE_SCRIPT),
            transition_script: redis::Script::new(TRANSITION_SCRIPT),
            closed: AtomicBool::new(false),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Round-trip to Redis.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn load_raw(&self, conn: &mut MultiplexedConnection, job_id: &JobId) -> QueueResult<Option<(String, Job)>> {
        let raw: Option<String> = conn.get(self.keys.job(job_id)).await?;
        match raw {
            Some(raw) => {
                let job = serde_json::from_str(&raw)?;
                Ok(Some((raw, job)))
            }
            None => Ok(None),
        }
    }

    async fn load(&self, conn: &mut MultiplexedConnection, job_id: &JobId) -> QueueResult<Option<Job>> {
        Ok(self.load_raw(conn, job_id).await?.map(|(_, job)| job))
    }

    fn not_active(job_id: &JobId, state: JobState) -> QueueError {
        QueueError::InvalidState {
            job_id: job_id.to_string(),
            state,
            expected: JobState::Active,
        }
    }

    async fn load_active(&self, conn: &mut MultiplexedConnection, job_id: &JobId) -> QueueResult<(String, Job)> {
        let (raw, job) = self
            .load_raw(conn, job_id)
            .await?
            .ok_or_else(|| QueueError::job_not_found(job_id))?;
        if job.state != JobState::Active {
            return Err(Self::not_active(job_id, job.state));
        }
        Ok((raw, job))
    }

    async fn queue_position(&self, conn: &mut MultiplexedConnection, job_id: &JobId) -> QueueResult<Option<u64>> {
        let rank: Option<u64> = conn.zrank(self.keys.waiting(), job_id.as_str()).await?;
        Ok(rank)
    }

    /// Apply `update` to an active job and store the result, provided the
    /// job still holds its lease and nobody wrote it since it was read.
    async fn transition<F>(
        &self,
        conn: &mut MultiplexedConnection,
        job_id: &JobId,
        mut update: F,
    ) -> QueueResult<Job>
    where
        F: FnMut(&mut Job) -> Landing,
    {
        for _ in 0..TRANSITION_ATTEMPTS {
            let (raw, mut job) = self.load_active(conn, job_id).await?;
            let (destination, score) = match update(&mut job) {
                Landing::Active => (self.keys.active(), String::new()),
                Landing::Set(set, score) => (set, score.to_string()),
            };

            let outcome: i64 = self
                .transition_script
                .key(self.keys.job(job_id))
                .key(self.keys.active())
                .key(destination)
                .arg(job_id.as_str())
                .arg(&raw)
                .arg(serde_json::to_string(&job)?)
                .arg(score)
                .invoke_async(conn)
                .await?;

            match outcome {
                1 => return Ok(job),
                0 => {
                    // Lease recovered; the record may still say active
                    let state = self
                        .load(conn, job_id)
                        .await?
                        .map(|j| j.state)
                        .ok_or_else(|| QueueError::job_not_found(job_id))?;
                    warn!("Job {} no longer holds its lease ({})", job_id, state);
                    return Err(Self::not_active(job_id, state));
                }
                _ => debug!("Job {} changed while updating it, reading again", job_id),
            }
        }
        Err(QueueError::Conflict(job_id.to_string()))
    }

    /// Drop the oldest members of a terminal set beyond `keep`.
    async fn trim(&self, conn: &mut MultiplexedConnection, set: &str, keep: usize) -> QueueResult<()> {
        let len: usize = conn.zcard(set).await?;
        if len <= keep {
            return Ok(());
        }
        let excess = (len - keep) as isize;
        let ids: Vec<String> = conn.zrange(set, 0, excess - 1).await?;
        self.purge(conn, set, &ids).await?;
        debug!("Trimmed {} jobs from {}", ids.len(), set);
        Ok(())
    }

    async fn purge(&self, conn: &mut MultiplexedConnection, set: &str, ids: &[String]) -> QueueResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in ids {
            pipe.zrem(set, id).ignore();
            pipe.del(self.keys.job(&JobId::from_string(id.as_str()))).ignore();
        }
        pipe.query_async::<()>(conn).await?;
        Ok(())
    }

    async fn sweep_set(&self, conn: &mut MultiplexedConnection, set: &str, cutoff_ms: i64) -> QueueResult<u64> {
        let ids: Vec<String> = conn.zrangebyscore(set, "-inf", format!("({}", cutoff_ms)).await?;
        self.purge(conn, set, &ids).await?;
        Ok(ids.len() as u64)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn enqueue(&self, request: EnqueueRequest) -> QueueResult<JobHandle> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        let mut conn = self.conn().await?;
        let job = request.into_job();
        let payload = serde_json::to_string(&job)?;

        let created: i64 = self
            .enqueue_script
            .key(self.keys.job(&job.id))
            .key(self.keys.waiting())
            .key(self.keys.seq())
            .arg(&payload)
            .arg(job.priority.0)
            .arg(job.id.as_str())
            .invoke_async(&mut conn)
            .await?;

        let (state, created) = if created == 1 {
            info!("Enqueued job {}", job.id);
            (JobState::Waiting, true)
        } else {
            let existing = self
                .load(&mut conn, &job.id)
                .await?
                .ok_or_else(|| QueueError::job_not_found(&job.id))?;
            debug!("Job {} already exists ({}), not duplicating", job.id, existing.state);
            (existing.state, false)
        };

        Ok(JobHandle {
            queue_position: self.queue_position(&mut conn, &job.id).await?,
            job_id: job.id,
            state,
            created,
        })
    }

    async fn dequeue(&self, worker_id: &str, lease: Duration) -> QueueResult<Option<Job>> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut conn = self.conn().await?;
        let now = Utc::now();

        let raw: Option<String> = self
            .dequeue_script
            .key(self.keys.waiting())
            .key(self.keys.delayed())
            .key(self.keys.active())
            .key(self.keys.seq())
            .arg(now.timestamp_millis())
            .arg(time_after(now, lease).timestamp_millis())
            .arg(self.config.max_active)
            .arg(worker_id)
            .arg(now.to_rfc3339())
            .arg(self.keys.job_prefix())
            .invoke_async(&mut conn)
            .await?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn renew_lease(&self, job_id: &JobId, lease: Duration) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        self.load_active(&mut conn, job_id).await?;
        let deadline = time_after(Utc::now(), lease).timestamp_millis();
        redis::cmd("ZADD")
            .arg(self.keys.active())
            .arg("XX")
            .arg(deadline)
            .arg(job_id.as_str())
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn mark_progress(&self, job_id: &JobId, percent: u8) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        self.transition(&mut conn, job_id, |job| {
            job.set_progress(percent);
            Landing::Active
        })
        .await?;
        Ok(())
    }

    async fn mark_completed(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let completed = self.keys.completed();
        self.transition(&mut conn, job_id, |job| {
            job.complete();
            Landing::Set(completed.clone(), finished_ms(job))
        })
        .await?;
        self.trim(&mut conn, &completed, self.config.keep_completed)
            .await
    }

    async fn retry_later(&self, job_id: &JobId, error: &str, delay: Duration) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let ready_at = time_after(Utc::now(), delay);
        let delayed = self.keys.delayed();
        self.transition(&mut conn, job_id, |job| {
            job.schedule_retry(error, ready_at);
            Landing::Set(delayed.clone(), ready_at.timestamp_millis())
        })
        .await?;

        debug!("Job {} scheduled for retry at {}", job_id, ready_at);
        Ok(())
    }

    async fn mark_failed(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let failed = self.keys.failed();
        self.transition(&mut conn, job_id, |job| {
            job.fail(error);
            Landing::Set(failed.clone(), finished_ms(job))
        })
        .await?;
        self.trim(&mut conn, &failed, self.config.keep_failed).await
    }

    async fn get_job(&self, job_id: &JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.conn().await?;
        self.load(&mut conn, job_id).await
    }

    async fn get_status(&self, job_id: &JobId) -> QueueResult<Option<JobStatus>> {
        let mut conn = self.conn().await?;
        let Some(job) = self.load(&mut conn, job_id).await? else {
            return Ok(None);
        };
        let position = if job.state == JobState::Waiting {
            self.queue_position(&mut conn, job_id).await?
        } else {
            None
        };
        Ok(Some(JobStatus::from_job(&job, position)))
    }

    async fn sweep_old(
        &self,
        completed_after: Duration,
        failed_after: Duration,
    ) -> QueueResult<SweepReport> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let completed_removed = self
            .sweep_set(
                &mut conn,
                &self.keys.completed(),
                time_before(now, completed_after).timestamp_millis(),
            )
            .await?;
        let failed_removed = self
            .sweep_set(
                &mut conn,
                &self.keys.failed(),
                time_before(now, failed_after).timestamp_millis(),
            )
            .await?;
        Ok(SweepReport {
            completed_removed,
            failed_removed,
        })
    }

    async fn recover_stalled(&self) -> QueueResult<StalledReport> {
        let mut conn = self.conn().await?;
        let now_ms = Utc::now().timestamp_millis();
        let expired: Vec<String> = conn
            .zrangebyscore(self.keys.active(), "-inf", format!("({}", now_ms))
            .await?;

        let mut report = StalledReport::default();
        for id in expired {
            // Whoever removes the entry owns the recovery
            let removed: i64 = conn.zrem(self.keys.active(), &id).await?;
            if removed == 0 {
                continue;
            }
            let job_id = JobId::from_string(id);
            let Some(mut job) = self.load(&mut conn, &job_id).await? else {
                continue;
            };

            if job.attempts >= self.config.max_attempts {
                job.fail(STALLED_FINAL_ATTEMPT_ERROR);
                redis::pipe()
                    .atomic()
                    .set(self.keys.job(&job_id), serde_json::to_string(&job)?)
                    .ignore()
                    .zadd(self.keys.failed(), job_id.as_str(), finished_ms(&job))
                    .ignore()
                    .query_async::<()>(&mut conn)
                    .await?;
                warn!("Job {} stalled on its final attempt, failing it", job_id);
                report.failed.push(job);
                continue;
            }

            job.requeue_stalled();
            let seq: u64 = conn.incr(self.keys.seq(), 1).await?;
            redis::pipe()
                .atomic()
                .set(self.keys.job(&job_id), serde_json::to_string(&job)?)
                .ignore()
                .zadd(self.keys.waiting(), job_id.as_str(), waiting_score(job.priority, seq))
                .ignore()
                .query_async::<()>(&mut conn)
                .await?;

            warn!("Job {} stalled, returning it to the queue", job_id);
            report.requeued.push(job_id);
        }

        if !report.failed.is_empty() {
            self.trim(&mut conn, &self.keys.failed(), self.config.keep_failed)
                .await?;
        }
        Ok(report)
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let mut conn = self.conn().await?;
        let (waiting, delayed, active, completed, failed): (u64, u64, u64, u64, u64) = redis::pipe()
            .zcard(self.keys.waiting())
            .zcard(self.keys.delayed())
            .zcard(self.keys.active())
            .zcard(self.keys.completed())
            .zcard(self.keys.failed())
            .query_async(&mut conn)
            .await?;
        Ok(QueueStats {
            waiting,
            delayed,
            active,
            completed,
            failed,
        })
    }

    async fn close(&self) -> QueueResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        info!("Redis job store closed");
        Ok(())
    }
}

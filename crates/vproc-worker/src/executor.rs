//! Worker pool.
//!
//! `max_concurrent` worker loops pull jobs from the store. Each attempt runs
//! in its own task so a panic or a hung tool only costs that attempt; the
//! loop that spawned it records the outcome and moves on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use vproc_media::{Prober, Transcoder};
use vproc_models::{Job, JobId, VideoProcessingStatus};
use vproc_queue::{JobStore, StalledReport};

use crate::config::{PipelineOptions, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::{PipelineOutput, VideoPipeline};
use crate::repository::{mirror_status, VideoRepository};
use crate::retry::{StoreRetry, WarnBudget};

/// Aborts a task when dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Interval that tolerates a zero period from configuration.
fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(10)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}

/// Shared state of the worker loops.
struct PoolContext {
    store: Arc<dyn JobStore>,
    videos: Arc<dyn VideoRepository>,
    pipeline: Arc<VideoPipeline>,
    options: PipelineOptions,
    config: WorkerConfig,
}

/// Pool of workers processing jobs from a [`JobStore`].
pub struct WorkerPool {
    ctx: Arc<PoolContext>,
    pool_id: String,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn JobStore>,
        prober: Arc<dyn Prober>,
        transcoder: Arc<dyn Transcoder>,
        videos: Arc<dyn VideoRepository>,
        options: PipelineOptions,
        config: WorkerConfig,
    ) -> Self {
        let pipeline = VideoPipeline::new(Arc::clone(&store), prober, transcoder, Arc::clone(&videos))
            .with_thumbnail_fraction(config.thumbnail_fraction)
            .with_thumbnail_url_prefix(config.thumbnail_url_prefix.clone());

        Self {
            ctx: Arc::new(PoolContext {
                store,
                videos,
                pipeline: Arc::new(pipeline),
                options,
                config,
            }),
            pool_id: format!("worker-{}", Uuid::new_v4()),
        }
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    /// Recover jobs left behind by a previous run, then start the worker
    /// and maintenance loops.
    pub async fn start(self) -> WorkerResult<PoolHandle> {
        self.ctx.options.validate()?;
        let concurrency = self.ctx.options.max_concurrent;
        info!(
            "Starting worker pool '{}' with {} concurrent jobs",
            self.pool_id, concurrency
        );

        let report = self.ctx.store.recover_stalled().await?;
        if !report.is_empty() {
            info!(
                "Startup recovery: {} jobs requeued, {} failed",
                report.requeued.len(),
                report.failed.len()
            );
        }
        self.ctx.settle_stalled(report).await;

        let (shutdown, _) = watch::channel(false);

        let workers = (0..concurrency)
            .map(|slot| {
                let ctx = Arc::clone(&self.ctx);
                let worker_id = format!("{}-{}", self.pool_id, slot);
                let rx = shutdown.subscribe();
                tokio::spawn(async move { ctx.worker_loop(worker_id, rx).await })
            })
            .collect();

        let maintenance = vec![
            tokio::spawn(Arc::clone(&self.ctx).stalled_loop(shutdown.subscribe())),
            tokio::spawn(Arc::clone(&self.ctx).sweep_loop(shutdown.subscribe())),
        ];

        Ok(PoolHandle {
            shutdown,
            workers,
            maintenance,
            store: Arc::clone(&self.ctx.store),
            shutdown_timeout: self.ctx.config.shutdown_timeout,
        })
    }
}

/// Handle to a running pool.
pub struct PoolHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    maintenance: Vec<JoinHandle<()>>,
    store: Arc<dyn JobStore>,
    shutdown_timeout: Duration,
}

impl PoolHandle {
    /// Stop taking jobs, let in-flight jobs finish, then close the store.
    ///
    /// Jobs still running after `shutdown_timeout` are abandoned; their
    /// leases expire and stalled recovery hands them to another worker.
    pub async fn shutdown(self) -> WorkerResult<()> {
        info!("Shutting down worker pool");
        let _ = self.shutdown.send(true);

        for task in &self.maintenance {
            task.abort();
        }

        let aborts: Vec<AbortHandle> = self.workers.iter().map(|w| w.abort_handle()).collect();
        if tokio::time::timeout(self.shutdown_timeout, join_all(self.workers))
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs did not finish within {:?}, abandoning them",
                self.shutdown_timeout
            );
            for abort in aborts {
                abort.abort();
            }
        }

        self.store.close().await?;
        info!("Worker pool stopped");
        Ok(())
    }
}

impl PoolContext {
    async fn worker_loop(self: Arc<Self>, worker_id: String, mut shutdown: watch::Receiver<bool>) {
        debug!("Worker {} started", worker_id);
        let mut dequeue_failures = WarnBudget::new(3);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.store.dequeue(&worker_id, self.config.lease_duration).await {
                Ok(Some(job)) => {
                    dequeue_failures.succeeded();
                    self.execute_job(job).await;
                    continue;
                }
                Ok(None) => dequeue_failures.succeeded(),
                Err(e) => {
                    if dequeue_failures.failed() {
                        warn!("Worker {} failed to dequeue: {}", worker_id, e);
                    }
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        debug!("Worker {} stopped", worker_id);
    }

    /// Run one attempt of a job and record the outcome.
    async fn execute_job(self: &Arc<Self>, job: Job) {
        let logger = JobLogger::new(&job, "video_processing");
        metrics::record_job_started();
        let started = Instant::now();

        logger.log_start(&format!(
            "attempt {}/{}",
            job.attempts, self.options.max_attempts
        ));

        let heartbeat = self.spawn_heartbeat(job.id.clone());

        let pipeline = Arc::clone(&self.pipeline);
        let task_job = job.clone();
        let task = tokio::spawn(
            async move { pipeline.run(&task_job).await }.instrument(logger.create_span()),
        );
        let task_guard = AbortOnDrop(task.abort_handle());

        let result = match tokio::time::timeout(self.options.per_job_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => Err(WorkerError::Panicked),
            Ok(Err(_)) => Err(WorkerError::Cancelled),
            Err(_) => Err(WorkerError::Timeout(self.options.per_job_timeout)),
        };
        drop(task_guard);
        drop(heartbeat);

        match result {
            Ok(output) => self.complete_job(&job, &logger, output, started).await,
            Err(e) => self.handle_failure(&job, &logger, e, started).await,
        }
    }

    async fn complete_job(&self, job: &Job, logger: &JobLogger, output: PipelineOutput, started: Instant) {
        let store = &self.store;
        let marked = StoreRetry::default()
            .run("mark_completed", || store.mark_completed(&job.id))
            .await;
        if let Err(e) = marked {
            logger.log_error(&format!("could not mark job completed: {}", e));
            return;
        }

        self.mirror(job, logger, VideoProcessingStatus::Completed).await;
        metrics::record_job_completed(started.elapsed().as_secs_f64());
        logger.log_completion(&format!(
            "duration {}s, remux {:?}",
            output.duration_secs, output.remux
        ));
    }

    async fn handle_failure(&self, job: &Job, logger: &JobLogger, error: WorkerError, started: Instant) {
        if !error.is_retryable() || job.attempts >= self.options.max_attempts {
            self.fail_job(job, logger, &error, started).await;
            return;
        }

        let summary = error.summary();
        let delay = self.options.backoff_for(job.attempts);
        logger.log_warning(&format!("{}; retrying in {:?} ({})", summary, delay, error));

        let store = &self.store;
        let scheduled = StoreRetry::default()
            .run("retry_later", || store.retry_later(&job.id, &summary, delay))
            .await;
        match scheduled {
            Ok(()) => metrics::record_job_retried(job.attempts),
            Err(e) => logger.log_error(&format!("could not schedule retry: {}", e)),
        }
    }

    /// Fail the job for good and mirror `failed` onto the video record.
    async fn fail_job(&self, job: &Job, logger: &JobLogger, error: &WorkerError, started: Instant) {
        let summary = error.summary();
        logger.log_error(&format!("{} ({})", summary, error));

        let store = &self.store;
        let marked = StoreRetry::default()
            .run("mark_failed", || store.mark_failed(&job.id, &summary))
            .await;
        if let Err(e) = marked {
            logger.log_error(&format!("could not mark job failed: {}", e));
            return;
        }

        self.mirror(job, logger, VideoProcessingStatus::Failed).await;
        metrics::record_job_failed(started.elapsed().as_secs_f64());
    }

    /// Best-effort status write; failures are logged and counted only.
    async fn mirror(&self, job: &Job, logger: &JobLogger, status: VideoProcessingStatus) {
        if let Err(e) = mirror_status(self.videos.as_ref(), &job.video_id, status).await {
            metrics::record_status_mirror_failure();
            logger.log_warning(&format!("could not set processing_status={}: {}", status, e));
        }
    }

    /// Record a recovery pass and mirror `failed` for jobs the store gave up on.
    async fn settle_stalled(&self, report: StalledReport) {
        if !report.requeued.is_empty() {
            warn!("Returned {} stalled jobs to the queue", report.requeued.len());
        }
        metrics::record_stalled_recovered(report.requeued.len() + report.failed.len());

        for job in &report.failed {
            let logger = JobLogger::new(job, "stalled_recovery");
            logger.log_error("stalled on its final attempt");
            self.mirror(job, &logger, VideoProcessingStatus::Failed).await;
            metrics::record_job_failed(0.0);
        }
    }

    /// Renew the job's lease until the returned guard is dropped.
    fn spawn_heartbeat(self: &Arc<Self>, job_id: JobId) -> AbortOnDrop {
        let ctx = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut failures = WarnBudget::new(3);
            let mut interval = ticker(ctx.config.heartbeat_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                match ctx.store.renew_lease(&job_id, ctx.config.lease_duration).await {
                    Ok(()) => failures.succeeded(),
                    Err(e) => {
                        if failures.failed() {
                            warn!("Failed to renew lease for job {}: {}", job_id, e);
                        }
                    }
                }
            }
        });
        AbortOnDrop(handle.abort_handle())
    }

    async fn stalled_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = ticker(self.config.stalled_check_interval);
        interval.tick().await;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.store.recover_stalled().await {
                        Ok(report) => self.settle_stalled(report).await,
                        Err(e) => warn!("Failed to recover stalled jobs: {}", e),
                    }
                    match self.store.stats().await {
                        Ok(stats) => metrics::record_queue_depth(&stats),
                        Err(e) => debug!("Failed to read queue stats: {}", e),
                    }
                }
            }
        }
    }

    async fn sweep_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = ticker(self.config.sweep_interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self
                        .store
                        .sweep_old(self.config.completed_retention, self.config.failed_retention)
                        .await
                    {
                        Ok(report) => {
                            if report.completed_removed + report.failed_removed > 0 {
                                info!(
                                    "Swept {} completed and {} failed jobs",
                                    report.completed_removed, report.failed_removed
                                );
                            }
                            metrics::record_swept("completed", report.completed_removed);
                            metrics::record_swept("failed", report.failed_removed);
                        }
                        Err(e) => error!("Failed to sweep old jobs: {}", e),
                    }
                }
            }
        }
    }
}

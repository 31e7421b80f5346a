//! Worker pool tests against the in-memory store with fake media tools.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;

use vproc_media::{
    thumbnail_path_for, MediaInfo, ProbeError, ProbeResult, Prober, RemuxOutcome, TranscodeError,
    TranscodeResult, Transcoder,
};
use vproc_models::{
    Job, JobHandle, JobId, JobState, JobStatus, QueueStats, StatusKind, VideoField, VideoId,
};
use vproc_queue::{
    EnqueueRequest, InMemoryJobStore, JobStore, QueueConfig, QueueResult, StalledReport,
    StatusQuery, SweepReport,
};
use vproc_worker::repository::RepositoryResult;
use vproc_worker::{
    InMemoryVideoRepository, PipelineOptions, RepositoryError, VideoRepository, WorkerConfig,
    WorkerPool,
};

/// Prober returning a fixed duration, with scripted misbehavior on the
/// first calls.
#[derive(Default)]
struct FakeProber {
    duration: f64,
    delay: Duration,
    fail_first: AtomicU32,
    hang_first: AtomicU32,
    panic_first: AtomicU32,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeProber {
    fn new(duration: f64) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing_first(self, n: u32) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    fn hanging_first(self, n: u32) -> Self {
        self.hang_first.store(n, Ordering::SeqCst);
        self
    }

    fn panicking_first(self, n: u32) -> Self {
        self.panic_first.store(n, Ordering::SeqCst);
        self
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, path: &Path) -> ProbeResult<MediaInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if Self::take(&self.panic_first) {
            panic!("decoder crashed");
        }
        if Self::take(&self.hang_first) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if Self::take(&self.fail_first) {
            return Err(ProbeError::ToolFailed {
                message: "FFprobe exited with non-zero status".to_string(),
                stderr: Some(format!("{}: Invalid data found", path.display())),
                exit_code: Some(1),
            });
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(MediaInfo {
            duration: Some(self.duration),
            ..Default::default()
        })
    }
}

/// Transcoder that writes a placeholder thumbnail and pretends to remux.
#[derive(Default)]
struct FakeTranscoder {
    remuxed: AtomicU32,
    fail_remux_first: AtomicU32,
    /// Durations handed to each step, in call order
    seen_durations: Mutex<Vec<Option<f64>>>,
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn extract_thumbnail(
        &self,
        path: &Path,
        info: &MediaInfo,
        _at_fraction: f64,
    ) -> TranscodeResult<PathBuf> {
        self.seen_durations.lock().await.push(info.duration);
        let thumb = thumbnail_path_for(path);
        tokio::fs::write(&thumb, b"\xFF\xD8\xFF").await?;
        Ok(thumb)
    }

    async fn optimize_for_streaming(&self, path: &Path, info: &MediaInfo) -> TranscodeResult<RemuxOutcome> {
        self.seen_durations.lock().await.push(info.duration);
        if FakeProber::take(&self.fail_remux_first) {
            return Err(TranscodeError::MissingOutput(path.with_extension("mp4.faststart")));
        }
        self.remuxed.fetch_add(1, Ordering::SeqCst);
        Ok(RemuxOutcome::Optimized)
    }
}

/// Video records whose `processing_status` column cannot be written.
#[derive(Default)]
struct StatusOutageRepository {
    inner: InMemoryVideoRepository,
}

#[async_trait]
impl VideoRepository for StatusOutageRepository {
    async fn update_video_field(&self, video_id: &VideoId, field: VideoField) -> RepositoryResult<()> {
        if matches!(field, VideoField::ProcessingStatus(_)) {
            return Err(RepositoryError::Unavailable("status column locked".to_string()));
        }
        self.inner.update_video_field(video_id, field).await
    }
}

/// Store wrapper that records every progress write, and the stored
/// progress a poller would see after each job mutation.
#[derive(Default)]
struct RecordingStore {
    inner: InMemoryJobStore,
    progress: Mutex<Vec<u8>>,
    observed: Mutex<Vec<u8>>,
}

impl RecordingStore {
    async fn observe(&self, job_id: &JobId) {
        if let Ok(Some(status)) = self.inner.get_status(job_id).await {
            self.observed.lock().await.push(status.progress);
        }
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn enqueue(&self, request: EnqueueRequest) -> QueueResult<JobHandle> {
        self.inner.enqueue(request).await
    }
    async fn dequeue(&self, worker_id: &str, lease: Duration) -> QueueResult<Option<Job>> {
        self.inner.dequeue(worker_id, lease).await
    }
    async fn renew_lease(&self, job_id: &JobId, lease: Duration) -> QueueResult<()> {
        self.inner.renew_lease(job_id, lease).await
    }
    async fn mark_progress(&self, job_id: &JobId, percent: u8) -> QueueResult<()> {
        self.progress.lock().await.push(percent);
        let result = self.inner.mark_progress(job_id, percent).await;
        self.observe(job_id).await;
        result
    }
    async fn mark_completed(&self, job_id: &JobId) -> QueueResult<()> {
        let result = self.inner.mark_completed(job_id).await;
        self.observe(job_id).await;
        result
    }
    async fn retry_later(&self, job_id: &JobId, error: &str, delay: Duration) -> QueueResult<()> {
        let result = self.inner.retry_later(job_id, error, delay).await;
        self.observe(job_id).await;
        result
    }
    async fn mark_failed(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        self.inner.mark_failed(job_id, error).await
    }
    async fn get_job(&self, job_id: &JobId) -> QueueResult<Option<Job>> {
        self.inner.get_job(job_id).await
    }
    async fn get_status(&self, job_id: &JobId) -> QueueResult<Option<JobStatus>> {
        self.inner.get_status(job_id).await
    }
    async fn sweep_old(&self, completed_after: Duration, failed_after: Duration) -> QueueResult<SweepReport> {
        self.inner.sweep_old(completed_after, failed_after).await
    }
    async fn recover_stalled(&self) -> QueueResult<StalledReport> {
        self.inner.recover_stalled().await
    }
    async fn stats(&self) -> QueueResult<QueueStats> {
        self.inner.stats().await
    }
    async fn close(&self) -> QueueResult<()> {
        self.inner.close().await
    }
}

fn fast_options() -> PipelineOptions {
    PipelineOptions {
        max_attempts: 3,
        base_backoff: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        per_job_timeout: Duration::from_secs(5),
        max_concurrent: 2,
    }
}

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(10),
        lease_duration: Duration::from_secs(5),
        heartbeat_interval: Duration::from_secs(1),
        stalled_check_interval: Duration::from_millis(50),
        shutdown_timeout: Duration::from_secs(5),
        ..WorkerConfig::default()
    }
}

/// Write a placeholder upload and register its video record.
async fn upload(dir: &TempDir, videos: &InMemoryVideoRepository, id: &str) -> (VideoId, PathBuf) {
    let path = dir.path().join(format!("{}.mp4", id));
    tokio::fs::write(&path, b"not really an mp4").await.unwrap();
    videos.insert_video(id).await;
    (VideoId::from(id), path)
}

async fn wait_terminal(store: &dyn JobStore, video_id: &VideoId) -> Job {
    let job_id = JobId::for_video(video_id);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(job) = store.get_job(&job_id).await.unwrap() {
            if job.is_terminal() {
                return job;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} did not finish in time",
            job_id
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn pool(
    store: Arc<dyn JobStore>,
    prober: Arc<FakeProber>,
    videos: Arc<dyn VideoRepository>,
    options: PipelineOptions,
) -> WorkerPool {
    WorkerPool::new(
        store,
        prober,
        Arc::new(FakeTranscoder::default()),
        videos,
        options,
        fast_config(),
    )
}

#[tokio::test]
async fn test_video_processed_end_to_end() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryJobStore::default());
    let videos = Arc::new(InMemoryVideoRepository::new());
    let (video_id, path) = upload(&dir, &videos, "v1").await;

    store.enqueue_video(&video_id, &path).await.unwrap();
    let handle = pool(store.clone(), Arc::new(FakeProber::new(30.2)), videos.clone(), fast_options())
        .start()
        .await
        .unwrap();

    let job = wait_terminal(&*store, &video_id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.progress_percent, 100);
    assert_eq!(job.attempts, 1);

    assert_eq!(videos.field(&video_id, "duration").await.as_deref(), Some("30"));
    assert_eq!(
        videos.field(&video_id, "thumbnail_url").await.as_deref(),
        Some("/uploads/videos/v1_thumb.jpg")
    );
    assert_eq!(videos.processing_status(&video_id).await.as_deref(), Some("completed"));
    assert!(dir.path().join("v1_thumb.jpg").exists());

    let status = StatusQuery::new(store.clone())
        .get_processing_status(&video_id)
        .await
        .unwrap();
    assert_eq!(status.status, StatusKind::Completed);
    assert_eq!(status.progress, Some(100));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_progress_is_reported_in_order() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RecordingStore::default());
    let videos = Arc::new(InMemoryVideoRepository::new());
    let (video_id, path) = upload(&dir, &videos, "v1").await;

    store.enqueue_video(&video_id, &path).await.unwrap();
    let handle = pool(store.clone(), Arc::new(FakeProber::new(30.0)), videos, fast_options())
        .start()
        .await
        .unwrap();

    wait_terminal(&*store, &video_id).await;
    assert_eq!(*store.progress.lock().await, vec![10, 85, 100]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_progress_never_drops_across_retries() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RecordingStore::default());
    let videos = Arc::new(InMemoryVideoRepository::new());
    let (video_id, path) = upload(&dir, &videos, "v1").await;
    let prober = Arc::new(FakeProber::new(30.0).failing_first(1));
    let transcoder = FakeTranscoder::default();
    transcoder.fail_remux_first.store(1, Ordering::SeqCst);

    store.enqueue_video(&video_id, &path).await.unwrap();
    let handle = WorkerPool::new(
        store.clone(),
        prober.clone(),
        Arc::new(transcoder),
        videos,
        fast_options(),
        fast_config(),
    )
    .start()
    .await
    .unwrap();

    let job = wait_terminal(&*store, &video_id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 3);
    assert_eq!(prober.calls.load(Ordering::SeqCst), 3);

    let observed = store.observed.lock().await.clone();
    assert!(
        observed.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {:?}",
        observed
    );
    assert!(observed.contains(&85));
    assert_eq!(observed.last(), Some(&100));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_media_is_inspected_once_per_attempt() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryJobStore::default());
    let videos = Arc::new(InMemoryVideoRepository::new());
    let (video_id, path) = upload(&dir, &videos, "v1").await;
    let prober = Arc::new(FakeProber::new(42.5));
    let transcoder = Arc::new(FakeTranscoder::default());

    store.enqueue_video(&video_id, &path).await.unwrap();
    let handle = WorkerPool::new(
        store.clone(),
        prober.clone(),
        transcoder.clone(),
        videos,
        fast_options(),
        fast_config(),
    )
    .start()
    .await
    .unwrap();

    let job = wait_terminal(&*store, &video_id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *transcoder.seen_durations.lock().await,
        vec![Some(42.5), Some(42.5)]
    );
    assert_eq!(transcoder.remuxed.load(Ordering::SeqCst), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryJobStore::default());
    let videos = Arc::new(InMemoryVideoRepository::new());
    let prober = Arc::new(FakeProber::new(30.0).with_delay(Duration::from_millis(50)));

    let mut ids = Vec::new();
    for i in 0..10 {
        let (video_id, path) = upload(&dir, &videos, &format!("v{}", i)).await;
        store.enqueue_video(&video_id, &path).await.unwrap();
        ids.push(video_id);
    }

    let handle = pool(store.clone(), prober.clone(), videos, fast_options())
        .start()
        .await
        .unwrap();

    for video_id in &ids {
        let job = wait_terminal(&*store, video_id).await;
        assert_eq!(job.state, JobState::Completed);
    }
    let peak = prober.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 2, "{} jobs ran at once", peak);
    assert!(peak >= 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_enqueue_runs_once() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryJobStore::default());
    let videos = Arc::new(InMemoryVideoRepository::new());
    let prober = Arc::new(FakeProber::new(30.0));
    let (video_id, path) = upload(&dir, &videos, "v1").await;

    let first = store.enqueue_video(&video_id, &path).await.unwrap();
    let second = store.enqueue_video(&video_id, &path).await.unwrap();
    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.job_id, second.job_id);
    assert_eq!(store.stats().await.unwrap().waiting, 1);

    let handle = pool(store.clone(), prober.clone(), videos, fast_options())
        .start()
        .await
        .unwrap();
    wait_terminal(&*store, &video_id).await;
    assert_eq!(prober.calls.load(Ordering::SeqCst), 1);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.total(), 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryJobStore::default());
    let videos = Arc::new(InMemoryVideoRepository::new());
    let prober = Arc::new(FakeProber::new(30.0).failing_first(2));
    let (video_id, path) = upload(&dir, &videos, "v1").await;

    store.enqueue_video(&video_id, &path).await.unwrap();
    let handle = pool(store.clone(), prober, videos.clone(), fast_options())
        .start()
        .await
        .unwrap();

    let job = wait_terminal(&*store, &video_id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 3);
    assert_eq!(videos.processing_status(&video_id).await.as_deref(), Some("completed"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retries_exhausted() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryJobStore::default());
    let videos = Arc::new(InMemoryVideoRepository::new());
    let prober = Arc::new(FakeProber::new(30.0).failing_first(10));
    let (video_id, path) = upload(&dir, &videos, "v1").await;

    store.enqueue_video(&video_id, &path).await.unwrap();
    let handle = pool(store.clone(), prober.clone(), videos.clone(), fast_options())
        .start()
        .await
        .unwrap();

    let job = wait_terminal(&*store, &video_id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(prober.calls.load(Ordering::SeqCst), 3);

    let error = job.last_error.unwrap();
    assert!(!error.is_empty());
    assert!(!error.contains(dir.path().to_string_lossy().as_ref()));
    assert!(!error.contains("Invalid data found"));

    assert_eq!(videos.processing_status(&video_id).await.as_deref(), Some("failed"));

    let status = StatusQuery::new(store.clone())
        .get_processing_status(&video_id)
        .await
        .unwrap();
    assert_eq!(status.status, StatusKind::Failed);
    assert_eq!(status.attempts, Some(3));
    assert!(status.error.is_some());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_source_fails_without_retry() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryJobStore::default());
    let videos = Arc::new(InMemoryVideoRepository::new());
    let prober = Arc::new(FakeProber::new(30.0));
    videos.insert_video("v1").await;
    let video_id = VideoId::from("v1");

    store
        .enqueue_video(&video_id, &dir.path().join("gone.mp4"))
        .await
        .unwrap();
    let handle = pool(store.clone(), prober.clone(), videos.clone(), fast_options())
        .start()
        .await
        .unwrap();

    let job = wait_terminal(&*store, &video_id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.last_error.as_deref(), Some("source file is missing"));
    assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    assert_eq!(videos.processing_status(&video_id).await.as_deref(), Some("failed"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_timed_out_attempt_is_retried() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryJobStore::default());
    let videos = Arc::new(InMemoryVideoRepository::new());
    let prober = Arc::new(FakeProber::new(30.0).hanging_first(1));
    let (video_id, path) = upload(&dir, &videos, "v1").await;

    let options = PipelineOptions {
        per_job_timeout: Duration::from_millis(200),
        ..fast_options()
    };
    store.enqueue_video(&video_id, &path).await.unwrap();
    let handle = pool(store.clone(), prober, videos, options).start().await.unwrap();

    let job = wait_terminal(&*store, &video_id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 2);
    assert!(job
        .last_error
        .as_deref()
        .is_some_and(|e| e.starts_with("processing timed out")));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_panicking_job_does_not_kill_worker() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryJobStore::default());
    let videos = Arc::new(InMemoryVideoRepository::new());
    let prober = Arc::new(FakeProber::new(30.0).panicking_first(1));
    let options = PipelineOptions {
        max_concurrent: 1,
        ..fast_options()
    };

    let (first, first_path) = upload(&dir, &videos, "v1").await;
    let (second, second_path) = upload(&dir, &videos, "v2").await;
    store.enqueue_video(&first, &first_path).await.unwrap();
    store.enqueue_video(&second, &second_path).await.unwrap();

    let handle = pool(store.clone(), prober, videos, options).start().await.unwrap();

    let job = wait_terminal(&*store, &first).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.last_error.as_deref(), Some("processing crashed unexpectedly"));

    let job = wait_terminal(&*store, &second).await;
    assert_eq!(job.state, JobState::Completed);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stalled_job_is_recovered_on_startup() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryJobStore::default());
    let videos = Arc::new(InMemoryVideoRepository::new());
    let (video_id, path) = upload(&dir, &videos, "v1").await;

    // A worker that claimed the job and died.
    store.enqueue_video(&video_id, &path).await.unwrap();
    let claimed = store.dequeue("crashed-worker", Duration::ZERO).await.unwrap();
    assert!(claimed.is_some());
    tokio::time::sleep(Duration::from_millis(5)).await;

    let handle = pool(store.clone(), Arc::new(FakeProber::new(30.0)), videos, fast_options())
        .start()
        .await
        .unwrap();

    let job = wait_terminal(&*store, &video_id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_job_stalled_on_final_attempt_is_failed() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryJobStore::new(QueueConfig::default()));
    let videos = Arc::new(InMemoryVideoRepository::new());
    let (video_id, path) = upload(&dir, &videos, "v1").await;
    let job_id = JobId::for_video(&video_id);

    store.enqueue_video(&video_id, &path).await.unwrap();
    for _ in 0..2 {
        store.dequeue("w", Duration::from_secs(60)).await.unwrap().unwrap();
        store.retry_later(&job_id, "boom", Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let last = store.dequeue("crashed-worker", Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(last.attempts, 3);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let handle = pool(store.clone(), Arc::new(FakeProber::new(30.0)), videos.clone(), fast_options())
        .start()
        .await
        .unwrap();

    let job = wait_terminal(&*store, &video_id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(videos.processing_status(&video_id).await.as_deref(), Some("failed"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_status_write_outage_is_not_fatal() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryJobStore::default());
    let videos = Arc::new(StatusOutageRepository::default());
    let (video_id, path) = upload(&dir, &videos.inner, "v1").await;

    store.enqueue_video(&video_id, &path).await.unwrap();
    let handle = pool(store.clone(), Arc::new(FakeProber::new(30.0)), videos.clone(), fast_options())
        .start()
        .await
        .unwrap();

    let job = wait_terminal(&*store, &video_id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 1);
    assert_eq!(videos.inner.field(&video_id, "duration").await.as_deref(), Some("30"));
    assert_eq!(
        videos.inner.processing_status(&video_id).await.as_deref(),
        Some("pending")
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sweep_keeps_video_status() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryJobStore::default());
    let videos = Arc::new(InMemoryVideoRepository::new());
    let (video_id, path) = upload(&dir, &videos, "v1").await;

    store.enqueue_video(&video_id, &path).await.unwrap();
    let handle = pool(store.clone(), Arc::new(FakeProber::new(30.0)), videos.clone(), fast_options())
        .start()
        .await
        .unwrap();
    wait_terminal(&*store, &video_id).await;
    handle.shutdown().await.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let report = store.sweep_old(Duration::ZERO, Duration::ZERO).await.unwrap();
    assert_eq!(report.completed_removed, 1);

    let status = StatusQuery::new(store.clone())
        .get_processing_status(&video_id)
        .await
        .unwrap();
    assert_eq!(status.status, StatusKind::NotFound);
    assert_eq!(videos.processing_status(&video_id).await.as_deref(), Some("completed"));
}

#[tokio::test]
async fn test_unknown_video_reports_not_found() {
    let store = Arc::new(InMemoryJobStore::default());
    let status = StatusQuery::new(store)
        .get_processing_status(&VideoId::from("never-uploaded"))
        .await
        .unwrap();
    assert_eq!(status.status, StatusKind::NotFound);
    assert_eq!(status.progress, None);
}

#[tokio::test]
async fn test_shutdown_stops_taking_jobs() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryJobStore::default());
    let videos = Arc::new(InMemoryVideoRepository::new());
    let prober = Arc::new(FakeProber::new(30.0));

    let handle = pool(store.clone(), prober.clone(), videos.clone(), fast_options())
        .start()
        .await
        .unwrap();
    handle.shutdown().await.unwrap();

    let (video_id, path) = upload(&dir, &videos, "late").await;
    store.enqueue_video(&video_id, &path).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    let job = store.get_job(&JobId::for_video(&video_id)).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Waiting);
}

#[tokio::test]
async fn test_invalid_options_rejected_at_start() {
    let store = Arc::new(InMemoryJobStore::default());
    let videos = Arc::new(InMemoryVideoRepository::new());
    let options = PipelineOptions {
        max_concurrent: 0,
        ..fast_options()
    };
    let result = pool(store, Arc::new(FakeProber::new(30.0)), videos, options)
        .start()
        .await;
    assert!(result.is_err());
}

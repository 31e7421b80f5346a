//! Per-job processing steps: probe, thumbnail, fast-start remux.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use vproc_media::{Prober, RemuxOutcome, Transcoder};
use vproc_models::{Job, VideoField, VideoProcessingStatus};
use vproc_queue::JobStore;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::repository::{mirror_status, VideoRepository};

/// Progress after the duration is known.
pub const PROGRESS_PROBED: u8 = 10;
/// Progress after the thumbnail is written.
pub const PROGRESS_THUMBNAIL: u8 = 85;
/// Progress after the remux.
pub const PROGRESS_DONE: u8 = 100;

/// What one successful run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub duration_secs: u64,
    pub thumbnail_path: PathBuf,
    pub thumbnail_url: String,
    pub remux: RemuxOutcome,
}

/// Runs the processing steps for one job attempt.
pub struct VideoPipeline {
    store: Arc<dyn JobStore>,
    prober: Arc<dyn Prober>,
    transcoder: Arc<dyn Transcoder>,
    videos: Arc<dyn VideoRepository>,
    thumbnail_fraction: f64,
    thumbnail_url_prefix: String,
}

impl VideoPipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        prober: Arc<dyn Prober>,
        transcoder: Arc<dyn Transcoder>,
        videos: Arc<dyn VideoRepository>,
    ) -> Self {
        Self {
            store,
            prober,
            transcoder,
            videos,
            thumbnail_fraction: vproc_media::DEFAULT_THUMBNAIL_FRACTION,
            thumbnail_url_prefix: "/uploads/videos".to_string(),
        }
    }

    pub fn with_thumbnail_fraction(mut self, fraction: f64) -> Self {
        self.thumbnail_fraction = fraction;
        self
    }

    pub fn with_thumbnail_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thumbnail_url_prefix = prefix.into();
        self
    }

    /// Run every step for `job`. Steps run strictly in order; the first
    /// failure ends the attempt.
    pub async fn run(&self, job: &Job) -> WorkerResult<PipelineOutput> {
        let logger = JobLogger::new(job, "video_processing");
        let path = job.video_path.as_path();

        if !source_exists(path).await {
            return Err(WorkerError::SourceMissing(job.video_path.clone()));
        }

        if let Err(e) = mirror_status(self.videos.as_ref(), &job.video_id, VideoProcessingStatus::Processing).await {
            metrics::record_status_mirror_failure();
            logger.log_warning(&format!("could not set processing_status=processing: {}", e));
        }

        let info = self.prober.probe(path).await?;
        let duration_secs = info.rounded_duration()?;
        self.videos
            .update_video_field(&job.video_id, VideoField::Duration(duration_secs))
            .await?;
        self.report(job, &logger, PROGRESS_PROBED, "duration probed").await;

        let thumbnail_path = self
            .transcoder
            .extract_thumbnail(path, &info, self.thumbnail_fraction)
            .await?;
        let thumbnail_url = thumbnail_url(&self.thumbnail_url_prefix, &thumbnail_path);
        self.videos
            .update_video_field(&job.video_id, VideoField::ThumbnailUrl(thumbnail_url.clone()))
            .await?;
        self.report(job, &logger, PROGRESS_THUMBNAIL, "thumbnail generated").await;

        let remux = self.transcoder.optimize_for_streaming(path, &info).await?;
        self.report(job, &logger, PROGRESS_DONE, "fast-start remux finished").await;

        Ok(PipelineOutput {
            duration_secs,
            thumbnail_path,
            thumbnail_url,
            remux,
        })
    }

    /// Progress is informational; a failed write does not fail the job.
    async fn report(&self, job: &Job, logger: &JobLogger, percent: u8, message: &str) {
        logger.log_progress(percent, message);
        if let Err(e) = self.store.mark_progress(&job.id, percent).await {
            logger.log_warning(&format!("could not record progress {}: {}", percent, e));
        }
    }
}

async fn source_exists(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.is_file())
}

/// Public URL of a thumbnail: `<prefix>/<file name>`.
pub fn thumbnail_url(prefix: &str, thumbnail_path: &Path) -> String {
    let name = thumbnail_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{}/{}", prefix.trim_end_matches('/'), name)
}

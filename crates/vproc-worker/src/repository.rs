//! Writes to the video records owned by the upload service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use vproc_models::{VideoField, VideoId, VideoProcessingStatus};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Video not found: {0}")]
    VideoNotFound(VideoId),

    #[error("Video store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Narrow update interface onto the video persistence layer.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Set one column of a video record.
    async fn update_video_field(&self, video_id: &VideoId, field: VideoField) -> RepositoryResult<()>;
}

/// Mirror the pipeline outcome onto the video record.
///
/// Best effort: callers log a failure and carry on. The job store stays the
/// source of truth for the job itself.
pub async fn mirror_status(
    videos: &dyn VideoRepository,
    video_id: &VideoId,
    status: VideoProcessingStatus,
) -> RepositoryResult<()> {
    videos
        .update_video_field(video_id, VideoField::ProcessingStatus(status))
        .await
}

/// Video records in Postgres.
///
/// Expects a `videos` table keyed by a text `id` with `thumbnail_url`,
/// `duration` (bigint) and `processing_status` columns.
#[derive(Debug, Clone)]
pub struct PgVideoRepository {
    pool: PgPool,
}

impl PgVideoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a small pool; the worker writes a handful of rows per job.
    pub async fn connect(url: &str, max_connections: u32) -> RepositoryResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// `UPDATE` statement for a field. Column names come from a closed set.
pub(crate) fn update_sql(field: &VideoField) -> String {
    format!("UPDATE videos SET {} = $1 WHERE id = $2", field.column())
}

#[async_trait]
impl VideoRepository for PgVideoRepository {
    async fn update_video_field(&self, video_id: &VideoId, field: VideoField) -> RepositoryResult<()> {
        let sql = update_sql(&field);
        let query = sqlx::query(&sql);
        let query = match &field {
            VideoField::ThumbnailUrl(url) => query.bind(url.clone()),
            VideoField::Duration(secs) => query.bind(i64::try_from(*secs).unwrap_or(i64::MAX)),
            VideoField::ProcessingStatus(status) => query.bind(status.as_str()),
        };

        let result = query.bind(video_id.as_str()).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::VideoNotFound(video_id.clone()));
        }

        debug!("Updated video {} {}", video_id, field.column());
        Ok(())
    }
}

/// Video records held in memory, for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryVideoRepository {
    videos: Mutex<HashMap<VideoId, HashMap<&'static str, String>>>,
    unavailable: AtomicBool,
}

impl InMemoryVideoRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a video record with `processing_status = pending`.
    pub async fn insert_video(&self, video_id: impl Into<VideoId>) {
        let mut fields = HashMap::new();
        fields.insert(
            "processing_status",
            VideoProcessingStatus::Pending.as_str().to_string(),
        );
        self.videos.lock().await.insert(video_id.into(), fields);
    }

    /// Make every write fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current value of a column.
    pub async fn field(&self, video_id: &VideoId, column: &str) -> Option<String> {
        self.videos
            .lock()
            .await
            .get(video_id)
            .and_then(|fields| fields.get(column).cloned())
    }

    pub async fn processing_status(&self, video_id: &VideoId) -> Option<String> {
        self.field(video_id, "processing_status").await
    }
}

#[async_trait]
impl VideoRepository for InMemoryVideoRepository {
    async fn update_video_field(&self, video_id: &VideoId, field: VideoField) -> RepositoryResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("writes disabled".to_string()));
        }
        let mut videos = self.videos.lock().await;
        let fields = videos
            .get_mut(video_id)
            .ok_or_else(|| RepositoryError::VideoNotFound(video_id.clone()))?;
        fields.insert(field.column(), field.value_string());
        Ok(())
    }
}

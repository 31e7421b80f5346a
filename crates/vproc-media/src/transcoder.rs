//! Thumbnail extraction and fast-start remuxing.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::command::ProcessRunner;
use crate::config::MediaConfig;
use crate::error::{TranscodeError, TranscodeResult};
use crate::faststart::{self, non_empty_len, RemuxOutcome, TempFileGuard};
use crate::probe::MediaInfo;
use crate::thumbnail::{seek_position, thumbnail_command, thumbnail_path_for};

/// Produces derived media from an uploaded video.
///
/// Both steps take the `MediaInfo` the caller already probed, so a file is
/// inspected once per attempt.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Write `<stem>_thumb.jpg` next to the source with a frame taken
    /// `at_fraction` of the way in. An existing non-empty thumbnail is reused.
    async fn extract_thumbnail(
        &self,
        path: &Path,
        info: &MediaInfo,
        at_fraction: f64,
    ) -> TranscodeResult<PathBuf>;

    /// Rewrite the container so playback can start before the download ends.
    async fn optimize_for_streaming(&self, path: &Path, info: &MediaInfo) -> TranscodeResult<RemuxOutcome>;
}

/// Transcoder backed by the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    runner: ProcessRunner,
}

impl FfmpegTranscoder {
    /// Create a transcoder from media configuration.
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            runner: ProcessRunner::new().with_timeout(config.transcode_timeout),
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new(&MediaConfig::default())
    }
}

async fn ensure_source(path: &Path) -> TranscodeResult<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(TranscodeError::FileNotFound(path.to_path_buf())),
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn extract_thumbnail(
        &self,
        path: &Path,
        info: &MediaInfo,
        at_fraction: f64,
    ) -> TranscodeResult<PathBuf> {
        ensure_source(path).await?;

        let output = thumbnail_path_for(path);
        if non_empty_len(&output).await.is_some() {
            debug!("Thumbnail already present: {}", output.display());
            return Ok(output);
        }

        let seek = seek_position(info.duration, at_fraction);
        let cmd = thumbnail_command(path, &output, seek);

        // A zero-byte file left behind would be mistaken for a finished thumbnail.
        let guard = TempFileGuard::new(&output);
        self.runner.run_ffmpeg(&self.ffmpeg, &cmd).await?;

        if non_empty_len(&output).await.is_none() {
            return Err(TranscodeError::MissingOutput(output));
        }
        guard.disarm();

        info!("Generated thumbnail {}", output.display());
        Ok(output)
    }

    async fn optimize_for_streaming(&self, path: &Path, info: &MediaInfo) -> TranscodeResult<RemuxOutcome> {
        ensure_source(path).await?;

        if let Some(reason) = faststart::skip_reason(info) {
            debug!("Skipping fast-start remux ({:?}): {}", reason, path.display());
            return Ok(RemuxOutcome::Skipped(reason));
        }

        let temp = faststart::temp_path_for(path);
        let guard = TempFileGuard::new(&temp);
        let cmd = faststart::remux_command(path, &temp);
        self.runner.run_ffmpeg(&self.ffmpeg, &cmd).await?;

        faststart::replace_with_verified(guard, path).await?;

        info!("Video optimized for fast start: {}", path.display());
        Ok(RemuxOutcome::Optimized)
    }
}

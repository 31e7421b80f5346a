//! Fast-start remuxing helpers.
//!
//! The remux writes to `<original>.faststart` and only renames over the
//! original once the temp file is verified. [`TempFileGuard`] removes the
//! temp file on every other exit, including the future being dropped.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::command::FfmpegCommand;
use crate::error::{TranscodeError, TranscodeResult};
use crate::probe::MediaInfo;

/// Container tag written on optimized files.
pub const FASTSTART_TAG: &str = "faststart";
/// Clips at or below this length are not worth remuxing.
pub const MIN_DURATION_SECS: f64 = 10.0;

/// Result of a fast-start optimization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemuxOutcome {
    Optimized,
    Skipped(SkipReason),
}

/// Why a remux was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyOptimized,
    TooShort,
}

/// Decide whether a file needs remuxing. Unknown duration means remux.
pub fn skip_reason(info: &MediaInfo) -> Option<SkipReason> {
    if info.tag(FASTSTART_TAG).is_some() {
        return Some(SkipReason::AlreadyOptimized);
    }
    match info.duration {
        Some(d) if d <= MIN_DURATION_SECS => Some(SkipReason::TooShort),
        _ => None,
    }
}

/// `<original-path>.faststart`
pub fn temp_path_for(video_path: &Path) -> PathBuf {
    let mut name: OsString = video_path.as_os_str().to_os_string();
    name.push(".faststart");
    PathBuf::from(name)
}

/// Muxer for the temp file; its extension does not identify the container.
pub fn container_format_for(video_path: &Path) -> &'static str {
    match video_path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .as_deref()
    {
        Some("mov") | Some("qt") => "mov",
        Some("m4v") => "ipod",
        _ => "mp4",
    }
}

/// Stream-copy remux that moves the index to the front of the file.
pub fn remux_command(video_path: &Path, temp_path: &Path) -> FfmpegCommand {
    FfmpegCommand::new(video_path, temp_path)
        .stream_copy()
        .movflags("+faststart+use_metadata_tags")
        .output_args(["-avoid_negative_ts", "make_zero"])
        .output_args(["-fflags", "+genpts"])
        .output_args(["-max_muxing_queue_size", "1024"])
        .output_args(["-map_metadata", "0"])
        .metadata(FASTSTART_TAG, "1")
        .format(container_format_for(video_path))
        .log_level("error")
}

/// Deletes the wrapped file when dropped unless disarmed.
#[derive(Debug)]
pub struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temp file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temp file {}: {}", self.path.display(), e),
        }
    }
}

/// Size of a file, or `None` if it is missing or empty.
pub async fn non_empty_len(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Some(meta.len()),
        _ => None,
    }
}

/// Rename a verified temp file over the original.
///
/// The original is untouched unless the temp file exists and is non-empty.
pub async fn replace_with_verified(guard: TempFileGuard, original: &Path) -> TranscodeResult<()> {
    if non_empty_len(guard.path()).await.is_none() {
        return Err(TranscodeError::MissingOutput(guard.path().to_path_buf()));
    }
    tokio::fs::rename(guard.path(), original).await?;
    guard.disarm();
    Ok(())
}

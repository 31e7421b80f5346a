//! Media tool configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Locations and limits for the external media tools.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// FFmpeg binary (name resolved through PATH, or an absolute path)
    pub ffmpeg_path: PathBuf,
    /// FFprobe binary
    pub ffprobe_path: PathBuf,
    /// Ceiling for a single FFprobe invocation
    pub probe_timeout: Duration,
    /// Ceiling for a single FFmpeg invocation
    pub transcode_timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            probe_timeout: Duration::from_secs(30),
            transcode_timeout: Duration::from_secs(540),
        }
    }
}

impl MediaConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: std::env::var("FFPROBE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffprobe_path),
            probe_timeout: std::env::var("MEDIA_PROBE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.probe_timeout),
            transcode_timeout: std::env::var("MEDIA_TRANSCODE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.transcode_timeout),
        }
    }
}

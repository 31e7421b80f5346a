//! FFmpeg CLI wrappers for post-upload video processing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Subprocess execution with timeouts that kill hung tools
//! - Duration probing via FFprobe (`Prober`)
//! - Thumbnail extraction and fast-start remuxing (`Transcoder`)

pub mod command;
pub mod config;
pub mod error;
pub mod faststart;
pub mod probe;
pub mod thumbnail;
pub mod transcoder;

pub use command::{check_ffmpeg, check_ffprobe, check_tool, FfmpegCommand, ProcessOutput, ProcessRunner};
pub use config::MediaConfig;
pub use error::{ProbeError, ProbeResult, ProcessError, TranscodeError, TranscodeResult};
pub use faststart::{RemuxOutcome, SkipReason};
pub use probe::{FfprobeProber, MediaInfo, Prober};
pub use thumbnail::{thumbnail_path_for, DEFAULT_THUMBNAIL_FRACTION};
pub use transcoder::{FfmpegTranscoder, Transcoder};

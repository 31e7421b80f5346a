//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Result type for transcode operations.
pub type TranscodeResult<T> = Result<T, TranscodeError>;

/// Errors from running an external tool.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("{tool} exited with status {exit_code:?}")]
    Failed {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} timed out after {secs} seconds")]
    Timeout { tool: String, secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from inspecting a media file.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("FFprobe not found in PATH")]
    ToolNotFound,

    #[error("FFprobe command failed: {message}")]
    ToolFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe timed out after {0} seconds")]
    Timeout(u64),

    #[error("No duration in container metadata")]
    NoDuration,

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    /// Short description safe to show to callers: no paths, no raw stderr.
    pub fn summary(&self) -> String {
        match self {
            ProbeError::FileNotFound(_) => "source file is missing or unreadable".to_string(),
            ProbeError::ToolNotFound => "media probe tool is not installed".to_string(),
            ProbeError::ToolFailed { exit_code, .. } => match exit_code {
                Some(code) => format!("media probe failed (exit code {})", code),
                None => "media probe failed".to_string(),
            },
            ProbeError::Timeout(secs) => format!("media probe timed out after {}s", secs),
            ProbeError::NoDuration => "media has no duration metadata".to_string(),
            ProbeError::Parse(_) => "media probe returned unreadable metadata".to_string(),
            ProbeError::Io(_) => "media probe could not read the file".to_string(),
        }
    }
}

impl From<ProcessError> for ProbeError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::ToolNotFound(_) => ProbeError::ToolNotFound,
            ProcessError::Failed {
                exit_code, stderr, ..
            } => ProbeError::ToolFailed {
                message: "FFprobe exited with non-zero status".to_string(),
                stderr: Some(stderr),
                exit_code,
            },
            ProcessError::Timeout { secs, .. } => ProbeError::Timeout(secs),
            ProcessError::Io(e) => ProbeError::Io(e),
        }
    }
}

/// Errors from thumbnail extraction or remuxing.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("FFmpeg not found in PATH")]
    ToolNotFound,

    #[error("FFmpeg command failed: {message}")]
    ToolFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFmpeg timed out after {0} seconds")]
    Timeout(u64),

    #[error("FFmpeg reported success but produced no output: {0}")]
    MissingOutput(PathBuf),

    #[error("Probe failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::ToolFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Short description safe to show to callers: no paths, no raw stderr.
    pub fn summary(&self) -> String {
        match self {
            TranscodeError::FileNotFound(_) => "source file is missing or unreadable".to_string(),
            TranscodeError::ToolNotFound => "transcoder is not installed".to_string(),
            TranscodeError::ToolFailed { exit_code, .. } => match exit_code {
                Some(code) => format!("transcoder failed (exit code {})", code),
                None => "transcoder failed".to_string(),
            },
            TranscodeError::Timeout(secs) => format!("transcoder timed out after {}s", secs),
            TranscodeError::MissingOutput(_) => "transcoder produced no output".to_string(),
            TranscodeError::Probe(e) => e.summary(),
            TranscodeError::Io(_) => "transcoder could not write its output".to_string(),
        }
    }
}

impl From<ProcessError> for TranscodeError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::ToolNotFound(_) => TranscodeError::ToolNotFound,
            ProcessError::Failed {
                exit_code, stderr, ..
            } => TranscodeError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some(stderr),
                exit_code,
            ),
            ProcessError::Timeout { secs, .. } => TranscodeError::Timeout(secs),
            ProcessError::Io(e) => TranscodeError::Io(e),
        }
    }
}

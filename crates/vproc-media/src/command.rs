//! FFmpeg command builder and subprocess runner.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::MediaConfig;
use crate::error::ProcessError;

/// Bytes of stderr kept for diagnostics.
const STDERR_TAIL_BYTES: usize = 4096;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set seek position (before input).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-vframes").output_arg("1")
    }

    /// Copy all streams without re-encoding.
    pub fn stream_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Set container flags for the mov/mp4 muxer.
    pub fn movflags(self, flags: impl Into<String>) -> Self {
        self.output_arg("-movflags").output_arg(flags)
    }

    /// Set a container metadata tag.
    pub fn metadata(self, key: &str, value: &str) -> Self {
        self.output_arg("-metadata")
            .output_arg(format!("{}={}", key, value))
    }

    /// Force the output container format.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Output file path.
    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();

        if self.overwrite {
            args.push("-y".into());
        }

        args.push("-v".into());
        args.push(self.log_level.clone().into());

        args.extend(self.input_args.iter().map(OsString::from));

        args.push("-i".into());
        args.push(self.input.clone().into_os_string());

        args.extend(self.output_args.iter().map(OsString::from));

        args.push(self.output.clone().into_os_string());

        args
    }
}

/// Captured output of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Runs external tools to completion with an optional hard timeout.
///
/// Children are spawned with `kill_on_drop`, so dropping the future that
/// awaits them (a timeout at this layer or at the job layer) kills the tool.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Timeout per invocation
    timeout: Option<Duration>,
}

impl ProcessRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self { timeout: None }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run_ffmpeg(
        &self,
        ffmpeg: &Path,
        cmd: &FfmpegCommand,
    ) -> Result<ProcessOutput, ProcessError> {
        self.run(ffmpeg, &cmd.build_args()).await
    }

    /// Run a program and collect its output. Non-zero exit is an error.
    pub async fn run(
        &self,
        program: &Path,
        args: &[OsString],
    ) -> Result<ProcessOutput, ProcessError> {
        let tool = tool_name(program);
        which::which(program).map_err(|_| ProcessError::ToolNotFound(tool.clone()))?;

        debug!(
            "Running {}: {}",
            tool,
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let output = command.output();

        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, output).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("{} timed out after {:?}, killing process", tool, timeout);
                    return Err(ProcessError::Timeout {
                        tool,
                        secs: timeout.as_secs(),
                    });
                }
            },
            None => output.await?,
        };

        let stderr = stderr_tail(&output.stderr);

        if !output.status.success() {
            return Err(ProcessError::Failed {
                tool,
                exit_code: output.status.code(),
                stderr,
            });
        }

        Ok(ProcessOutput {
            stdout: output.stdout,
            stderr,
        })
    }
}

fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string_lossy().to_string())
}

/// Keep the last few KB of stderr; FFmpeg puts the cause at the end.
fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

/// Resolve a configured tool to an executable on disk.
pub fn check_tool(program: &Path) -> Result<PathBuf, ProcessError> {
    which::which(program).map_err(|_| ProcessError::ToolNotFound(tool_name(program)))
}

/// Check if the configured FFmpeg is available.
pub fn check_ffmpeg(config: &MediaConfig) -> Result<PathBuf, ProcessError> {
    check_tool(&config.ffmpeg_path)
}

/// Check if the configured FFprobe is available.
pub fn check_ffprobe(config: &MediaConfig) -> Result<PathBuf, ProcessError> {
    check_tool(&config.ffprobe_path)
}

//! FFprobe media information.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::command::ProcessRunner;
use crate::config::MediaConfig;
use crate::error::{ProbeError, ProbeResult};

/// Container-level information about a media file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds, if the container reports one
    pub duration: Option<f64>,
    /// Container format name (e.g. "mov,mp4,m4a,3gp,3g2,mj2")
    pub format_name: Option<String>,
    /// Container metadata tags
    pub tags: HashMap<String, String>,
    /// Video codec
    pub video_codec: Option<String>,
    /// Width in pixels
    pub width: Option<u32>,
    /// Height in pixels
    pub height: Option<u32>,
    /// File size in bytes
    pub size: Option<u64>,
}

impl MediaInfo {
    /// Look up a container tag, ignoring case.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Duration rounded to whole seconds.
    pub fn rounded_duration(&self) -> ProbeResult<u64> {
        match self.duration {
            Some(d) if d.is_finite() && d > 0.0 => Ok(d.round() as u64),
            _ => Err(ProbeError::NoDuration),
        }
    }
}

/// Inspects media files.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Read container metadata from a file.
    async fn probe(&self, path: &Path) -> ProbeResult<MediaInfo>;

    /// Duration in whole seconds.
    async fn probe_duration(&self, path: &Path) -> ProbeResult<u64> {
        self.probe(path).await?.rounded_duration()
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_output(stdout: &[u8]) -> ProbeResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let format = probe.format;

    Ok(MediaInfo {
        duration: format
            .as_ref()
            .and_then(|f| f.duration.as_ref())
            .and_then(|d| d.parse::<f64>().ok()),
        format_name: format.as_ref().and_then(|f| f.format_name.clone()),
        size: format
            .as_ref()
            .and_then(|f| f.size.as_ref())
            .and_then(|s| s.parse::<u64>().ok()),
        tags: format.map(|f| f.tags).unwrap_or_default(),
        video_codec: video_stream.and_then(|s| s.codec_name.clone()),
        width: video_stream.and_then(|s| s.width),
        height: video_stream.and_then(|s| s.height),
    })
}

/// Prober backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe: PathBuf,
    runner: ProcessRunner,
}

impl FfprobeProber {
    /// Create a prober from media configuration.
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffprobe: config.ffprobe_path.clone(),
            runner: ProcessRunner::new().with_timeout(config.probe_timeout),
        }
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new(&MediaConfig::default())
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, path: &Path) -> ProbeResult<MediaInfo> {
        if tokio::fs::metadata(path).await.is_err() {
            return Err(ProbeError::FileNotFound(path.to_path_buf()));
        }

        let mut args: Vec<OsString> = [
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(path.as_os_str().to_os_string());

        let output = self.runner.run(&self.ffprobe, &args).await?;
        parse_probe_output(&output.stdout)
    }
}

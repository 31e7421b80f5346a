//! Thumbnail generation.

use std::path::{Path, PathBuf};

use crate::command::FfmpegCommand;

/// Thumbnail width in pixels.
pub const THUMBNAIL_WIDTH: u32 = 320;
/// Thumbnail height in pixels.
pub const THUMBNAIL_HEIGHT: u32 = 240;
/// Default position of the thumbnail frame as a fraction of the duration.
/// Skips the black frames common at t=0.
pub const DEFAULT_THUMBNAIL_FRACTION: f64 = 0.10;

/// `<dir>/<stem>_thumb.jpg` next to the source video.
pub fn thumbnail_path_for(video_path: &Path) -> PathBuf {
    let stem = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    video_path.with_file_name(format!("{}_thumb.jpg", stem))
}

/// Seek position for a frame `fraction` of the way into the clip.
pub fn seek_position(duration: Option<f64>, fraction: f64) -> f64 {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        DEFAULT_THUMBNAIL_FRACTION
    };
    match duration {
        Some(d) if d.is_finite() && d > 0.0 => (d * fraction).min(d - 0.1).max(0.0),
        _ => 0.0,
    }
}

/// Build the single-frame extraction command.
pub fn thumbnail_command(video_path: &Path, output_path: &Path, seek_secs: f64) -> FfmpegCommand {
    FfmpegCommand::new(video_path, output_path)
        .seek(seek_secs)
        .single_frame()
        .video_filter(format!("scale={}:{}", THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT))
        .output_arg("-q:v")
        .output_arg("2")
        .log_level("error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_path() {
        assert_eq!(
            thumbnail_path_for(Path::new("/srv/uploads/videos/abc.mp4")),
            PathBuf::from("/srv/uploads/videos/abc_thumb.jpg")
        );
        assert_eq!(
            thumbnail_path_for(Path::new("/srv/uploads/videos/my.clip.mov")),
            PathBuf::from("/srv/uploads/videos/my.clip_thumb.jpg")
        );
    }

    #[test]
    fn test_seek_position() {
        assert!((seek_position(Some(30.0), 0.10) - 3.0).abs() < 1e-9);
        assert_eq!(seek_position(None, 0.10), 0.0);
        // Never seeks past the last frame
        assert!(seek_position(Some(5.0), 1.0) < 5.0);
        assert!((seek_position(Some(30.0), f64::NAN) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_thumbnail_filter() {
        let args: Vec<String> = thumbnail_command(Path::new("a.mp4"), Path::new("a_thumb.jpg"), 1.5)
            .build_args()
            .into_iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(args.contains(&"scale=320:240".to_string()));
        assert!(args.contains(&"1.500".to_string()));
    }
}

//! Video record models.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a video record owned by the upload service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Processing status persisted on the video record.
///
/// This outlives the job record: once the queue purges a finished job,
/// the video still remembers how processing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoProcessingStatus {
    /// Uploaded, not yet picked up
    #[default]
    Pending,
    /// A worker is processing the video
    Processing,
    /// Processing finished successfully
    Completed,
    /// Processing failed after all attempts
    Failed,
}

impl VideoProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoProcessingStatus::Pending => "pending",
            VideoProcessingStatus::Processing => "processing",
            VideoProcessingStatus::Completed => "completed",
            VideoProcessingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for VideoProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single field write against the video record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum VideoField {
    /// Public URL of the generated thumbnail
    ThumbnailUrl(String),
    /// Duration in whole seconds
    Duration(u64),
    /// Pipeline outcome
    ProcessingStatus(VideoProcessingStatus),
}

impl VideoField {
    /// Column name on the video record.
    pub fn column(&self) -> &'static str {
        match self {
            VideoField::ThumbnailUrl(_) => "thumbnail_url",
            VideoField::Duration(_) => "duration",
            VideoField::ProcessingStatus(_) => "processing_status",
        }
    }

    /// Value rendered as text, for stores that keep fields as strings.
    pub fn value_string(&self) -> String {
        match self {
            VideoField::ThumbnailUrl(url) => url.clone(),
            VideoField::Duration(secs) => secs.to_string(),
            VideoField::ProcessingStatus(status) => status.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_status_serde() {
        let json = serde_json::to_string(&VideoProcessingStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");

        let status: VideoProcessingStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(status, VideoProcessingStatus::Failed);
    }

    #[test]
    fn test_field_columns() {
        assert_eq!(VideoField::Duration(30).column(), "duration");
        assert_eq!(VideoField::Duration(30).value_string(), "30");
        assert_eq!(
            VideoField::ProcessingStatus(VideoProcessingStatus::Completed).value_string(),
            "completed"
        );
        assert_eq!(
            VideoField::ThumbnailUrl("/uploads/videos/a_thumb.jpg".into()).column(),
            "thumbnail_url"
        );
    }
}

//! Shared data models for the video processing pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Video and job identifiers
//! - Job records and their queue state
//! - Video processing status mirrored onto the video record
//! - Status query responses and queue statistics

pub mod job;
pub mod job_status;
pub mod video;

// Re-export common types
pub use job::{Job, JobHandle, JobId, JobState, Priority};
pub use job_status::{JobStatus, ProcessingStatusResponse, QueueStats, StatusKind};
pub use video::{VideoField, VideoId, VideoProcessingStatus};

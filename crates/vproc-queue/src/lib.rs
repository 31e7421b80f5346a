//! Durable job store for post-upload video processing.
//!
//! This crate provides:
//! - The `JobStore` contract (enqueue, dequeue, progress, retry, retention)
//! - A Redis implementation shared by all worker processes
//! - An in-memory implementation for tests and single-process setups
//! - The processing status query used by polling clients

pub mod config;
pub mod error;
pub mod memory;
mod rank;
pub mod redis_store;
pub mod status;
pub mod store;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use memory::InMemoryJobStore;
pub use redis_store::RedisJobStore;
pub use status::StatusQuery;
pub use store::{EnqueueRequest, JobStore, StalledReport, SweepReport, STALLED_FINAL_ATTEMPT_ERROR};

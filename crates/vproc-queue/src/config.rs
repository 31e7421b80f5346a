//! Queue configuration.

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key the store writes
    pub key_prefix: String,
    /// Global cap on jobs active at once, across all worker processes
    pub max_active: usize,
    /// Attempts after which a stalled job is failed instead of requeued
    pub max_attempts: u32,
    /// Completed jobs retained before the oldest are purged
    pub keep_completed: usize,
    /// Failed jobs retained before the oldest are purged
    pub keep_failed: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vproc:video-processing".to_string(),
            max_active: 2,
            max_attempts: 3,
            keep_completed: 100,
            keep_failed: 200,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX")
                .unwrap_or_else(|_| "vproc:video-processing".to_string()),
            max_active: std::env::var("QUEUE_MAX_ACTIVE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            keep_completed: std::env::var("QUEUE_KEEP_COMPLETED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
            keep_failed: std::env::var("QUEUE_KEEP_FAILED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(200),
        }
    }
}

//! Worker configuration.

use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Retry, timeout and concurrency policy for processing jobs.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Total attempts per job, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_backoff: Duration,
    /// Growth factor applied to the delay after each failed attempt
    pub backoff_multiplier: f64,
    /// Wall-clock ceiling for one attempt
    pub per_job_timeout: Duration,
    /// Jobs this process runs at once
    pub max_concurrent: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            per_job_timeout: Duration::from_secs(600), // 10 minutes
            max_concurrent: 2,
        }
    }
}

impl PipelineOptions {
    /// Create options from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: env_parse("WORKER_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            base_backoff: env_parse("WORKER_BACKOFF_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_backoff),
            backoff_multiplier: env_parse("WORKER_BACKOFF_MULTIPLIER")
                .unwrap_or(defaults.backoff_multiplier),
            per_job_timeout: env_secs("WORKER_JOB_TIMEOUT").unwrap_or(defaults.per_job_timeout),
            max_concurrent: env_parse("WORKER_MAX_JOBS").unwrap_or(defaults.max_concurrent),
        }
    }

    /// Reject settings the pool cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_attempts == 0 {
            return Err(WorkerError::config_error("max_attempts must be at least 1"));
        }
        if self.max_concurrent == 0 {
            return Err(WorkerError::config_error("max_concurrent must be at least 1"));
        }
        if self.per_job_timeout.is_zero() {
            return Err(WorkerError::config_error("per_job_timeout must be positive"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(WorkerError::config_error("backoff_multiplier must be >= 1.0"));
        }
        Ok(())
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    ///
    /// 5s, 10s, 20s, ... with the defaults.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(self.base_backoff.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX)
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Idle wait between dequeue attempts when the queue is empty
    pub poll_interval: Duration,
    /// Lease taken on a dequeued job
    pub lease_duration: Duration,
    /// Interval for renewing the lease while a job runs
    pub heartbeat_interval: Duration,
    /// How often expired leases are returned to the queue
    pub stalled_check_interval: Duration,
    /// How often old terminal jobs are purged
    pub sweep_interval: Duration,
    /// Age after which completed jobs are purged
    pub completed_retention: Duration,
    /// Age after which failed jobs are purged
    pub failed_retention: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Position of the thumbnail frame as a fraction of the duration
    pub thumbnail_fraction: f64,
    /// Public URL prefix for generated thumbnails
    pub thumbnail_url_prefix: String,
    /// Directory uploads are written to
    pub upload_dir: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            lease_duration: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(15),
            stalled_check_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(3600),
            completed_retention: Duration::from_secs(24 * 3600),
            failed_retention: Duration::from_secs(7 * 24 * 3600),
            shutdown_timeout: Duration::from_secs(60),
            thumbnail_fraction: 0.10,
            thumbnail_url_prefix: "/uploads/videos".to_string(),
            upload_dir: "uploads/videos".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: env_parse("WORKER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            lease_duration: env_secs("WORKER_LEASE_SECS").unwrap_or(defaults.lease_duration),
            heartbeat_interval: env_secs("WORKER_JOB_HEARTBEAT_SECS")
                .unwrap_or(defaults.heartbeat_interval),
            stalled_check_interval: env_secs("WORKER_STALLED_CHECK_SECS")
                .unwrap_or(defaults.stalled_check_interval),
            sweep_interval: env_secs("WORKER_SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sweep_interval),
            completed_retention: env_secs("WORKER_COMPLETED_RETENTION_SECS")
                .unwrap_or(defaults.completed_retention),
            failed_retention: env_secs("WORKER_FAILED_RETENTION_SECS")
                .unwrap_or(defaults.failed_retention),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT")
                .unwrap_or(defaults.shutdown_timeout),
            thumbnail_fraction: env_parse::<f64>("WORKER_THUMBNAIL_FRACTION")
                .filter(|f| (0.0..=1.0).contains(f))
                .unwrap_or(defaults.thumbnail_fraction),
            thumbnail_url_prefix: std::env::var("WORKER_THUMBNAIL_URL_PREFIX")
                .unwrap_or(defaults.thumbnail_url_prefix),
            upload_dir: std::env::var("WORKER_UPLOAD_DIR").unwrap_or(defaults.upload_dir),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse(key).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_five_seconds() {
        let options = PipelineOptions::default();
        assert_eq!(options.backoff_for(1), Duration::from_secs(5));
        assert_eq!(options.backoff_for(2), Duration::from_secs(10));
        assert_eq!(options.backoff_for(3), Duration::from_secs(20));
    }

    #[test]
    fn test_backoff_saturates() {
        let options = PipelineOptions {
            base_backoff: Duration::from_secs(u64::MAX / 2),
            ..PipelineOptions::default()
        };
        assert_eq!(options.backoff_for(40), Duration::MAX);
    }

    #[test]
    fn test_validate() {
        assert!(PipelineOptions::default().validate().is_ok());

        let zero_attempts = PipelineOptions {
            max_attempts: 0,
            ..PipelineOptions::default()
        };
        assert!(matches!(zero_attempts.validate(), Err(WorkerError::ConfigError(_))));

        let shrinking = PipelineOptions {
            backoff_multiplier: 0.5,
            ..PipelineOptions::default()
        };
        assert!(shrinking.validate().is_err());
    }

    #[test]
    fn test_defaults() {
        let options = PipelineOptions::default();
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.max_concurrent, 2);
        assert_eq!(options.per_job_timeout, Duration::from_secs(600));

        let config = WorkerConfig::default();
        assert_eq!(config.completed_retention, Duration::from_secs(86_400));
        assert_eq!(config.failed_retention, Duration::from_secs(604_800));
        assert!(config.heartbeat_interval < config.lease_duration);
    }
}

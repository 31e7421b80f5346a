//! Structured job logging.
//!
//! Every line carries the job id, the video id and the attempt number so a
//! single job can be followed across retries and worker processes.

use tracing::{error, info, warn, Span};

use vproc_models::Job;

/// Job logger with consistent structured fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    video_id: String,
    attempt: u32,
    operation: &'static str,
}

impl JobLogger {
    /// Create a logger for the current attempt of a job.
    pub fn new(job: &Job, operation: &'static str) -> Self {
        Self {
            job_id: job.id.to_string(),
            video_id: job.video_id.to_string(),
            attempt: job.attempts,
            operation,
        }
    }

    /// Log the start of a job operation.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            attempt = self.attempt,
            operation = self.operation,
            "Job started: {}", message
        );
    }

    /// Log a pipeline step.
    pub fn log_progress(&self, percent: u8, message: &str) {
        info!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            attempt = self.attempt,
            operation = self.operation,
            progress = percent,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            attempt = self.attempt,
            operation = self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            attempt = self.attempt,
            operation = self.operation,
            "Job error: {}", message
        );
    }

    /// Log the completion of a job.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            attempt = self.attempt,
            operation = self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Span for instrumenting the job's task.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            video_id = %self.video_id,
            attempt = self.attempt,
            operation = self.operation
        )
    }
}

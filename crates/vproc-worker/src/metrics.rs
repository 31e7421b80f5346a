//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use vproc_models::QueueStats;

/// Metric names as constants for consistency.
pub mod names {
    // Job lifecycle
    pub const JOBS_STARTED_TOTAL: &str = "vproc_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vproc_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vproc_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "vproc_jobs_retried_total";
    pub const JOB_DURATION_SECONDS: &str = "vproc_job_duration_seconds";

    // Queue health
    pub const STALLED_JOBS_RECOVERED_TOTAL: &str = "vproc_stalled_jobs_recovered_total";
    pub const JOBS_SWEPT_TOTAL: &str = "vproc_jobs_swept_total";
    pub const QUEUE_DEPTH: &str = "vproc_queue_depth";

    // Side writes
    pub const STATUS_MIRROR_FAILURES_TOTAL: &str = "vproc_status_mirror_failures_total";
}

/// Install the Prometheus recorder with an HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "completed").record(duration_secs);
}

pub fn record_job_failed(duration_secs: f64) {
    counter!(names::JOBS_FAILED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "failed").record(duration_secs);
}

pub fn record_job_retried(attempt: u32) {
    let labels = [("attempt", attempt.to_string())];
    counter!(names::JOBS_RETRIED_TOTAL, &labels).increment(1);
}

pub fn record_stalled_recovered(count: usize) {
    counter!(names::STALLED_JOBS_RECOVERED_TOTAL).increment(count as u64);
}

pub fn record_swept(state: &'static str, count: u64) {
    counter!(names::JOBS_SWEPT_TOTAL, "state" => state).increment(count);
}

pub fn record_status_mirror_failure() {
    counter!(names::STATUS_MIRROR_FAILURES_TOTAL).increment(1);
}

/// Publish per-state queue depth.
pub fn record_queue_depth(stats: &QueueStats) {
    for (state, count) in [
        ("waiting", stats.waiting),
        ("delayed", stats.delayed),
        ("active", stats.active),
        ("completed", stats.completed),
        ("failed", stats.failed),
    ] {
        gauge!(names::QUEUE_DEPTH, "state" => state).set(count as f64);
    }
}

//! Bounded retries for the worker's own job-store calls.
//!
//! Job-level retries go through `JobStore::retry_later`. This covers short
//! store outages when recording an outcome, so a finished job does not sit
//! in `active` until its lease expires.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use vproc_queue::QueueResult;

/// Retry policy for a single store call.
#[derive(Debug, Clone)]
pub struct StoreRetry {
    /// Total calls, including the first
    pub attempts: u32,
    /// Pause after the first failure; doubles after each further failure
    pub first_delay: Duration,
    /// Upper bound for any single pause
    pub max_delay: Duration,
}

impl Default for StoreRetry {
    fn default() -> Self {
        Self {
            attempts: 4,
            first_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl StoreRetry {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }

    pub fn with_first_delay(mut self, first_delay: Duration) -> Self {
        self.first_delay = first_delay;
        self
    }

    /// Pause after the `failures`-th consecutive failure (1-based).
    fn pause_after(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.first_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Call `call` until it succeeds, fails with a non-transient error, or
    /// runs out of attempts. Returns the last error.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> QueueResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = QueueResult<T>>,
    {
        let mut failures = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && failures + 1 < self.attempts => {
                    failures += 1;
                    let pause = self.pause_after(failures);
                    debug!(operation, failures, ?pause, "Store call failed, retrying: {}", e);
                    tokio::time::sleep(pause).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Caps warnings from a background loop that fails on every tick.
#[derive(Debug)]
pub struct WarnBudget {
    streak: u32,
    budget: u32,
}

impl WarnBudget {
    pub fn new(budget: u32) -> Self {
        Self { streak: 0, budget }
    }

    /// Count a failure. Returns `true` while the caller should still warn.
    pub fn failed(&mut self) -> bool {
        self.streak = self.streak.saturating_add(1);
        if self.streak == self.budget + 1 {
            warn!(
                "Suppressing further warnings after {} consecutive failures",
                self.budget
            );
        }
        self.streak <= self.budget
    }

    pub fn succeeded(&mut self) {
        if self.streak > self.budget {
            info!("Recovered after {} consecutive failures", self.streak);
        }
        self.streak = 0;
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }
}

//! Shared retry/rotation primitives: the exponential delay schedule used by
//! the orchestrator's attempt chain, and the consecutive-failure counter the
//! "switch candidate after N failures" rotation pattern is built on.

use std::time::Duration;

use crate::config::RetrySettings;

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Total invocations per top-level call: the first attempt plus retries.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before the n-th retry (1-based): `retry_delay * backoff^(n-1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        debug_assert!(retry >= 1);
        let factor = self.backoff_factor.powi(retry as i32 - 1);
        self.retry_delay.mul_f64(factor)
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            retry_delay: Duration::from_secs_f64(settings.retry_delay_secs),
            backoff_factor: settings.backoff_factor,
        }
    }
}

/// Counts consecutive failures per candidate and reports when a rotation
/// threshold is crossed. A success resets the count.
#[derive(Debug)]
pub struct RotationCounter {
    threshold: u32,
    failures: parking_lot::Mutex<std::collections::HashMap<String, u32>>,
}

impl RotationCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Record one failure for `candidate`; returns true when the threshold
    /// is reached and the caller should rotate to the next candidate.
    pub fn record_failure(&self, candidate: &str) -> bool {
        let mut failures = self.failures.lock();
        let count = failures.entry(candidate.to_string()).or_insert(0);
        *count += 1;
        if *count >= self.threshold {
            *count = 0;
            true
        } else {
            false
        }
    }

    pub fn record_success(&self, candidate: &str) {
        self.failures.lock().remove(candidate);
    }

    pub fn failures(&self, candidate: &str) -> u32 {
        self.failures.lock().get(candidate).copied().unwrap_or(0)
    }
}

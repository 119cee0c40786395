//! # Retry Policy Module
//!
//! Exponential backoff for transient queue service faults.
//!
//! Every call a provider makes to the queue service goes through
//! [`RetryPolicy::execute`]. Only errors that report themselves as transient
//! (see [`QueueError::is_transient`]) are retried; everything else is returned
//! on the first failure.

use crate::error::QueueError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;

/// Retry policy configuration for exponential backoff
///
/// # Examples
///
/// ```rust
/// use storage_queue_transport::RetryPolicy;
/// use std::time::Duration;
///
/// // Default policy: 3 retries, 200ms initial, 5s max, 2.0x multiplier
/// let policy = RetryPolicy::default();
///
/// // Custom policy
/// let policy = RetryPolicy::new(5, Duration::from_millis(500), Duration::from_secs(10), 1.5);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the initial call
    pub max_attempts: u32,

    /// Initial delay before first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Whether to add jitter to delays
    pub use_jitter: bool,

    /// Jitter range as a fraction of the delay (0.25 = ±25%)
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            use_jitter: true,
            jitter_percent: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
            use_jitter: true,
            jitter_percent: 0.25,
        }
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Set custom jitter percentage (0.0 to 1.0)
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for a retry attempt (0-based)
    ///
    /// `delay = initial * multiplier^attempt`, capped at `max_delay`, then jittered.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay_secs = base_delay_secs.min(self.max_delay.as_secs_f64());

        let final_delay_secs = if self.use_jitter {
            Self::add_jitter(capped_delay_secs, self.jitter_percent)
        } else {
            capped_delay_secs
        };

        Duration::from_secs_f64(final_delay_secs)
    }

    /// Delay before retrying after `error`
    ///
    /// The error's [`retry_after`](QueueError::retry_after) hint acts as a
    /// floor, bounded by `max_delay`.
    pub fn delay_for(&self, attempt: u32, error: &QueueError) -> Duration {
        let backoff = self.calculate_delay(attempt);
        match error.retry_after() {
            Some(hint) => backoff.max(hint.min(self.max_delay)),
            None => backoff,
        }
    }

    /// Check if another retry is allowed for this attempt number (0-based)
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Total number of calls made in the worst case (initial + retries)
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts + 1
    }

    fn add_jitter(delay_secs: f64, jitter_percent: f64) -> f64 {
        let jitter_range = delay_secs * jitter_percent;
        if jitter_range <= 0.0 {
            return delay_secs;
        }

        let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
        (delay_secs + jitter).max(0.0)
    }

    /// Run `operation` until it succeeds, fails permanently or runs out of retries
    pub async fn execute<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, QueueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QueueError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && self.should_retry(attempt) => {
                    let delay = self.delay_for(attempt, &e);
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient queue service failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

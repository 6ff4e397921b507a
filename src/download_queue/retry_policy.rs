//! Retry policy for failed jobs.
//!
//! Implements exponential backoff with configurable parameters.

use crate::config::JobSettings;

use super::models::JobError;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total executions allowed, the first one included.
    pub max_attempts: u32,
    /// Initial backoff duration in seconds.
    pub initial_backoff_secs: u64,
    /// Maximum backoff duration in seconds (cap for exponential growth).
    pub max_backoff_secs: u64,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(config: &JobSettings) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff_secs: config.initial_backoff_secs,
            max_backoff_secs: config.max_backoff_secs,
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// Backoff after the `attempts`-th execution failed (1-based).
    ///
    /// `initial_backoff * multiplier^(attempts - 1)`, capped at `max_backoff_secs`.
    pub fn backoff_secs(&self, attempts: u32) -> u64 {
        let exp = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let backoff = self.initial_backoff_secs as f64 * self.backoff_multiplier.powi(exp);
        backoff.min(self.max_backoff_secs as f64) as u64
    }

    /// Unix timestamp at which a job that failed its `attempts`-th execution may run again.
    pub fn next_run_at(&self, attempts: u32) -> i64 {
        chrono::Utc::now().timestamp() + self.backoff_secs(attempts) as i64
    }

    /// True if the error is retryable and the job has attempts left.
    pub fn should_retry(&self, error: &JobError, attempts: u32) -> bool {
        error.is_retryable() && attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&JobSettings::default())
    }
}

//! Exponential backoff for polling a backend that is misbehaving.
//!
//! After a refresh cycle hits transient errors the scheduler stretches that
//! batch's polling interval with [`next_delay`]; a clean cycle resets it to
//! the backend's declared interval.

use std::time::Duration;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Upper bound on the delay between polls.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failing cycle.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

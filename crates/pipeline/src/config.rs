use std::time::Duration;

use reelforge_core::job::{DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_TRANSIENT_ERRORS};

/// Limits applied by the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Explicit retries allowed per job.
    pub max_attempts: u32,
    /// Consecutive transient backend errors before a job is failed.
    pub max_transient_errors: u32,
    /// Backend calls in flight at once per batch operation.
    pub submit_concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_transient_errors: DEFAULT_MAX_TRANSIENT_ERRORS,
            submit_concurrency: 8,
        }
    }
}

impl OrchestratorConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// | Env Var                | Default |
    /// |------------------------|---------|
    /// | `MAX_ATTEMPTS`         | `3`     |
    /// | `MAX_TRANSIENT_ERRORS` | `5`     |
    /// | `SUBMIT_CONCURRENCY`   | `8`     |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_attempts: u32 = std::env::var("MAX_ATTEMPTS")
            .map(|v| v.parse().expect("MAX_ATTEMPTS must be a valid u32"))
            .unwrap_or(defaults.max_attempts);

        let max_transient_errors: u32 = std::env::var("MAX_TRANSIENT_ERRORS")
            .map(|v| v.parse().expect("MAX_TRANSIENT_ERRORS must be a valid u32"))
            .unwrap_or(defaults.max_transient_errors);

        let submit_concurrency: usize = std::env::var("SUBMIT_CONCURRENCY")
            .map(|v| v.parse().expect("SUBMIT_CONCURRENCY must be a valid usize"))
            .unwrap_or(defaults.submit_concurrency);

        Self {
            max_attempts,
            max_transient_errors: max_transient_errors.max(1),
            submit_concurrency: submit_concurrency.max(1),
        }
    }
}

/// Timing of the polling scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the scheduler wakes to look for due batches.
    pub tick_interval: Duration,
    /// Ceiling for the per-batch backoff interval.
    pub max_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// | Env Var             | Default |
    /// |---------------------|---------|
    /// | `SCHEDULER_TICK_MS` | `500`   |
    /// | `MAX_BACKOFF_SECS`  | `30`    |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let tick_interval = std::env::var("SCHEDULER_TICK_MS")
            .map(|v| {
                Duration::from_millis(v.parse().expect("SCHEDULER_TICK_MS must be a valid u64"))
            })
            .unwrap_or(defaults.tick_interval);

        let max_backoff = std::env::var("MAX_BACKOFF_SECS")
            .map(|v| Duration::from_secs(v.parse().expect("MAX_BACKOFF_SECS must be a valid u64")))
            .unwrap_or(defaults.max_backoff);

        Self {
            tick_interval: tick_interval.max(Duration::from_millis(1)),
            max_backoff,
        }
    }
}

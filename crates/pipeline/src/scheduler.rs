//! Polling scheduler.
//!
//! A single timer loop that refreshes every batch with outstanding work.
//! Each batch keeps its own cadence: never faster than the smallest poll
//! interval of the backends its in-flight jobs use, stretched by
//! exponential backoff while refreshes keep hitting transient errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reelforge_core::types::BatchId;
use reelforge_render::backoff::{next_delay, BackoffConfig};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::orchestrator::JobOrchestrator;

#[derive(Debug, Clone, Copy, Default)]
struct PollState {
    last_refresh: Option<Instant>,
    /// Stretched interval while the batch is backing off.
    backoff: Option<Duration>,
}

pub struct PollingScheduler {
    orchestrator: Arc<JobOrchestrator>,
    config: SchedulerConfig,
    backoff: BackoffConfig,
    state: Arc<Mutex<HashMap<BatchId, PollState>>>,
}

impl PollingScheduler {
    pub fn new(orchestrator: Arc<JobOrchestrator>, config: SchedulerConfig) -> Self {
        let backoff = BackoffConfig {
            max_delay: config.max_backoff,
            ..Default::default()
        };
        Self {
            orchestrator,
            config,
            backoff,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run the scheduler loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            max_backoff_secs = self.config.max_backoff.as_secs(),
            "Polling scheduler started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Polling scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One scheduling pass. Spawns a refresh task for every batch that is
    /// due and returns their ids.
    ///
    /// A batch whose previous refresh is still running is skipped.
    pub async fn tick(&self) -> Vec<BatchId> {
        let plans = self.orchestrator.poll_plan().await;
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.retain(|id, _| plans.iter().any(|p| p.batch_id == *id));

        let mut due = Vec::new();
        for plan in plans {
            if plan.refreshing {
                continue;
            }
            let base = plan.min_interval.unwrap_or(Duration::ZERO);
            let entry = state.entry(plan.batch_id).or_default();
            let interval = entry.backoff.unwrap_or(base).max(base);
            if let Some(last) = entry.last_refresh {
                if now.duration_since(last) < interval {
                    continue;
                }
            }
            entry.last_refresh = Some(now);
            due.push(plan.batch_id);
            self.spawn_refresh(plan.batch_id, base);
        }
        due
    }

    fn spawn_refresh(&self, batch_id: BatchId, base: Duration) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let state = Arc::clone(&self.state);
        let backoff = self.backoff.clone();
        let floor = base.max(self.config.tick_interval);

        tokio::spawn(async move {
            let report = match orchestrator.refresh(batch_id).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(batch_id = %batch_id, error = %e, "Batch refresh failed");
                    return;
                }
            };
            if report.skipped {
                return;
            }

            let mut state = state.lock().await;
            let Some(entry) = state.get_mut(&batch_id) else {
                return;
            };
            if report.transient_errors > 0 {
                let current = entry.backoff.unwrap_or(floor).max(floor);
                let next = next_delay(current, &backoff);
                tracing::debug!(
                    batch_id = %batch_id,
                    transient_errors = report.transient_errors,
                    backoff_ms = next.as_millis() as u64,
                    "Backing off batch polling",
                );
                entry.backoff = Some(next);
            } else {
                entry.backoff = None;
            }
        });
    }

    /// Current backoff interval of a batch, if it is backing off.
    pub async fn backoff_for(&self, batch_id: BatchId) -> Option<Duration> {
        self.state
            .lock()
            .await
            .get(&batch_id)
            .and_then(|s| s.backoff)
    }
}

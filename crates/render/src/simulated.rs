//! Simulated render backend.
//!
//! Resolves every job inside `submit` after a fixed or randomized delay,
//! without any external call. Used for local previews and tests.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reelforge_core::variation::JobSpec;

use crate::backend::{
    BackendError, CancelOutcome, CompletionModel, PollStatus, RenderBackend, SubmitResult,
};

/// Registry name used when none is configured.
pub const SIMULATED_BACKEND_NAME: &str = "preview";

/// How long a simulated render takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedDelay {
    Fixed(Duration),
    /// Uniformly sampled from `min..=max` per job.
    Uniform { min: Duration, max: Duration },
}

impl SimulatedDelay {
    fn sample(self) -> Duration {
        match self {
            Self::Fixed(d) => d,
            Self::Uniform { min, max } if max > min => {
                let ms = rand::rng().random_range(min.as_millis() as u64..=max.as_millis() as u64);
                Duration::from_millis(ms)
            }
            Self::Uniform { min, .. } => min,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    pub name: String,
    pub delay: SimulatedDelay,
    /// Probability in `0.0..=1.0` that a job fails.
    pub failure_rate: f64,
    /// Base URL prefixed to the fake output paths.
    pub output_base_url: String,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            name: SIMULATED_BACKEND_NAME.to_string(),
            delay: SimulatedDelay::Fixed(Duration::from_millis(1500)),
            failure_rate: 0.0,
            output_base_url: "https://preview.local/renders".to_string(),
        }
    }
}

pub struct SimulatedBackend {
    config: SimulatedConfig,
}

impl SimulatedBackend {
    pub fn new(config: SimulatedConfig) -> Self {
        Self { config }
    }

    /// A backend that completes every job immediately.
    pub fn instant() -> Self {
        Self::new(SimulatedConfig {
            delay: SimulatedDelay::Fixed(Duration::ZERO),
            ..Default::default()
        })
    }
}

#[async_trait]
impl RenderBackend for SimulatedBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn completion_model(&self) -> CompletionModel {
        CompletionModel::Immediate
    }

    async fn submit(&self, spec: &JobSpec) -> Result<SubmitResult, BackendError> {
        let delay = self.config.delay.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let backend_job_id = format!("sim-{}", uuid::Uuid::new_v4());
        let failure_rate = self.config.failure_rate.clamp(0.0, 1.0);
        let failed = rand::rng().random_bool(failure_rate);

        let outcome = if failed {
            PollStatus::Failed {
                error: "Simulated render failure".to_string(),
            }
        } else {
            let base = format!(
                "{}/{}/{}",
                self.config.output_base_url.trim_end_matches('/'),
                spec.source_ref,
                spec.index
            );
            PollStatus::Completed {
                result_url: Some(format!("{base}.mp4")),
                thumbnail_url: Some(format!("{base}.jpg")),
            }
        };

        tracing::debug!(
            backend = %self.config.name,
            job_index = spec.index,
            delay_ms = delay.as_millis() as u64,
            failed,
            "Simulated render finished",
        );

        Ok(SubmitResult {
            backend_job_id,
            immediate: Some(outcome),
        })
    }

    async fn poll_status(&self, backend_job_id: &str) -> Result<PollStatus, BackendError> {
        Err(BackendError::Terminal(format!(
            "Simulated backend resolves jobs on submit; nothing to poll for {backend_job_id}"
        )))
    }

    async fn cancel(&self, _backend_job_id: &str) -> Result<CancelOutcome, BackendError> {
        Ok(CancelOutcome::Unsupported)
    }
}

//! Asynchronous render farm backend.
//!
//! Jobs are queued over HTTP and resolved later; the orchestrator polls
//! [`RenderBackend::poll_status`] no more often than the configured
//! interval.

pub mod api;

use std::time::Duration;

use async_trait::async_trait;
use reelforge_core::variation::JobSpec;

use crate::backend::{
    BackendError, CancelOutcome, CompletionModel, PollStatus, RenderBackend, SubmitResult,
};
use api::{CreateJobRequest, FarmJob, RenderFarmApi, RenderFarmApiError};

/// Registry name used when none is configured.
pub const RENDER_FARM_BACKEND_NAME: &str = "render_farm";

#[derive(Debug, Clone)]
pub struct RenderFarmConfig {
    pub name: String,
    pub api_url: String,
    pub api_key: Option<String>,
    /// Minimum spacing between status polls for one job.
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl RenderFarmConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            name: RENDER_FARM_BACKEND_NAME.to_string(),
            api_url: api_url.into(),
            api_key: None,
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
        }
    }
}

pub struct RenderFarmBackend {
    name: String,
    poll_interval: Duration,
    api: RenderFarmApi,
}

impl RenderFarmBackend {
    pub fn new(config: RenderFarmConfig) -> Result<Self, BackendError> {
        let api = RenderFarmApi::new(config.api_url, config.api_key, config.request_timeout)
            .map_err(|e| BackendError::Terminal(format!("Invalid render farm client: {e}")))?;
        Ok(Self {
            name: config.name,
            poll_interval: config.poll_interval,
            api,
        })
    }
}

#[async_trait]
impl RenderBackend for RenderFarmBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn completion_model(&self) -> CompletionModel {
        CompletionModel::Polled {
            interval: self.poll_interval,
        }
    }

    async fn submit(&self, spec: &JobSpec) -> Result<SubmitResult, BackendError> {
        let request = CreateJobRequest {
            source_ref: &spec.source_ref,
            variant_index: spec.index,
            parameters: &spec.dimensions,
        };
        let job = self.api.create_job(&request).await.map_err(classify)?;

        tracing::debug!(
            backend = %self.name,
            job_index = spec.index,
            farm_job_id = %job.id,
            "Render farm accepted job",
        );

        Ok(SubmitResult::pending(job.id))
    }

    async fn poll_status(&self, backend_job_id: &str) -> Result<PollStatus, BackendError> {
        let job = self.api.get_job(backend_job_id).await.map_err(classify)?;
        Ok(map_farm_status(job))
    }

    async fn cancel(&self, backend_job_id: &str) -> Result<CancelOutcome, BackendError> {
        self.api
            .cancel_job(backend_job_id)
            .await
            .map_err(classify)?;
        Ok(CancelOutcome::Cancelled)
    }
}

/// Translate a farm status string into the uniform [`PollStatus`].
fn map_farm_status(job: FarmJob) -> PollStatus {
    match job.status.as_str() {
        "queued" | "running" | "processing" => PollStatus::Processing,
        "done" | "completed" => PollStatus::Completed {
            result_url: job.output_url,
            thumbnail_url: job.thumbnail_url,
        },
        "failed" | "error" | "cancelled" => PollStatus::Failed {
            error: job
                .error
                .unwrap_or_else(|| format!("Render farm reported status '{}'", job.status)),
        },
        other => {
            tracing::warn!(farm_job_id = %job.id, status = other, "Unknown render farm status");
            PollStatus::Processing
        }
    }
}

/// Network failures, timeouts, 5xx, 408 and 429 are worth retrying; other
/// client errors and undecodable bodies are not.
fn classify(err: RenderFarmApiError) -> BackendError {
    match &err {
        RenderFarmApiError::Request(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
            BackendError::Transient(err.to_string())
        }
        RenderFarmApiError::Request(_) => BackendError::Terminal(err.to_string()),
        RenderFarmApiError::ApiError { status, .. }
            if *status >= 500 || *status == 408 || *status == 429 =>
        {
            BackendError::Transient(err.to_string())
        }
        RenderFarmApiError::ApiError { .. } => BackendError::Terminal(err.to_string()),
    }
}

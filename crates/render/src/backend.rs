//! The render backend contract shared by every engine.

use std::time::Duration;

use async_trait::async_trait;
use reelforge_core::estimation::estimate_job_cost;
use reelforge_core::variation::JobSpec;

/// How a backend reports job completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionModel {
    /// `submit` returns the final outcome; the backend is never polled.
    Immediate,
    /// `submit` returns a handle that must be polled, no more often than
    /// `interval`.
    Polled { interval: Duration },
}

impl CompletionModel {
    pub fn is_polled(self) -> bool {
        matches!(self, Self::Polled { .. })
    }

    pub fn poll_interval(self) -> Option<Duration> {
        match self {
            Self::Immediate => None,
            Self::Polled { interval } => Some(interval),
        }
    }
}

/// Backend-side state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Processing,
    /// Reported done. A missing `result_url` is an integrity failure that
    /// the orchestrator handles.
    Completed {
        result_url: Option<String>,
        thumbnail_url: Option<String>,
    },
    Failed {
        error: String,
    },
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    pub backend_job_id: String,
    /// Set by immediate backends: the job is already resolved.
    pub immediate: Option<PollStatus>,
}

impl SubmitResult {
    pub fn pending(backend_job_id: impl Into<String>) -> Self {
        Self {
            backend_job_id: backend_job_id.into(),
            immediate: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The backend cannot cancel; results for the handle must be ignored.
    Unsupported,
}

/// Errors surfaced by a backend call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Network failure, timeout or server-side hiccup. Worth retrying.
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// The backend rejected the request. Retrying will not help.
    #[error("Backend rejected request: {0}")]
    Terminal(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Uniform capability set over heterogeneous render engines.
///
/// `poll_status` must be idempotent: the orchestrator may call it any
/// number of times for the same handle.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Registry key; matched against a job's `engine` dimension.
    fn name(&self) -> &str;

    fn completion_model(&self) -> CompletionModel;

    async fn submit(&self, spec: &JobSpec) -> Result<SubmitResult, BackendError>;

    async fn poll_status(&self, backend_job_id: &str) -> Result<PollStatus, BackendError>;

    /// Best-effort cancellation.
    async fn cancel(&self, backend_job_id: &str) -> Result<CancelOutcome, BackendError>;

    /// Estimated credits for rendering `spec` on this backend.
    fn estimate_cost(&self, spec: &JobSpec) -> f64 {
        estimate_job_cost(spec)
    }
}

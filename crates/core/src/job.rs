//! Job record, lifecycle status, and the job state machine.
//!
//! All status changes go through [`JobRecord::transition`], which rejects
//! any edge not listed in [`JobStatus::valid_transitions`].

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};
use crate::variation::JobSpec;

/// Default cap on explicit retries per job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default number of consecutive transient backend errors tolerated before
/// a job is failed.
pub const DEFAULT_MAX_TRANSIENT_ERRORS: u32 = 5;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a single generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Submitted,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        Self::Pending,
        Self::Submitted,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Statuses reachable from `self` in one step.
    ///
    /// `Pending -> Completed/Failed` covers immediate-result backends and
    /// submission failures. `Failed -> Pending` is the explicit retry edge.
    pub fn valid_transitions(self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            Pending => &[Submitted, Completed, Failed, Cancelled],
            Submitted => &[Processing, Failed, Cancelled],
            Processing => &[Completed, Failed, Cancelled],
            Failed => &[Pending],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition(self, to: JobStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Completed, Failed or Cancelled. Failed is terminal for the sweep even
    /// though an explicit retry may reopen it.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Accepted by a backend and not yet resolved.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Submitted | Self::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown job status: '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

/// Why a job ended up `Failed`. Kept alongside the message so diagnostics
/// can tell a backend rejection from an unusable "done" result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The backend reported the job as failed.
    Terminal,
    /// Too many consecutive network/timeout errors.
    TransientExhausted,
    /// The backend reported success without a usable output URL.
    ResultIntegrity,
    /// The job could not be routed to any backend.
    Unroutable,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Terminal => "terminal",
            Self::TransientExhausted => "transient_exhausted",
            Self::ResultIntegrity => "result_integrity",
            Self::Unroutable => "unroutable",
        }
    }
}

impl FromStr for FailureKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "terminal" => Ok(Self::Terminal),
            "transient_exhausted" => Ok(Self::TransientExhausted),
            "result_integrity" => Ok(Self::ResultIntegrity),
            "unroutable" => Ok(Self::Unroutable),
            other => Err(CoreError::Validation(format!(
                "Unknown failure kind: '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Job record
// ---------------------------------------------------------------------------

/// Mutable state of one job. Created once per [`JobSpec`] and never
/// re-created; retries reuse the same `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub spec: JobSpec,
    pub status: JobStatus,
    /// Name of the render backend the job was routed to.
    pub backend: Option<String>,
    /// Opaque handle returned by the backend on acceptance.
    pub backend_job_id: Option<String>,
    pub result_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
    /// Number of explicit retries performed.
    pub attempts: u32,
    /// Consecutive transient errors since the last successful backend call.
    pub transient_errors: u32,
    pub submitted_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub estimated_cost: f64,
}

impl JobRecord {
    pub fn new(spec: JobSpec, estimated_cost: f64) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            spec,
            status: JobStatus::Pending,
            backend: None,
            backend_job_id: None,
            result_url: None,
            thumbnail_url: None,
            error_message: None,
            failure_kind: None,
            attempts: 0,
            transient_errors: 0,
            submitted_at: None,
            completed_at: None,
            estimated_cost,
        }
    }

    /// Move to `to`, rejecting any edge outside the lifecycle graph.
    pub fn transition(&mut self, to: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition(to) {
            return Err(CoreError::Conflict(format!(
                "Invalid job transition: {} -> {} (job {})",
                self.status, to, self.id
            )));
        }
        self.status = to;
        Ok(())
    }

    /// The backend accepted the job and handed back a pollable handle.
    pub fn mark_submitted(&mut self, backend_job_id: String) -> Result<(), CoreError> {
        self.transition(JobStatus::Submitted)?;
        self.backend_job_id = Some(backend_job_id);
        self.submitted_at = Some(Utc::now());
        self.transient_errors = 0;
        Ok(())
    }

    /// First poll confirmed the backend is working on the job.
    pub fn mark_processing(&mut self) -> Result<(), CoreError> {
        self.transition(JobStatus::Processing)?;
        self.transient_errors = 0;
        Ok(())
    }

    /// Record a successful render. A missing or blank `result_url` fails the
    /// job with [`FailureKind::ResultIntegrity`] instead.
    ///
    /// Returns the resulting status.
    pub fn complete(
        &mut self,
        result_url: Option<String>,
        thumbnail_url: Option<String>,
    ) -> Result<JobStatus, CoreError> {
        match result_url.filter(|url| !url.trim().is_empty()) {
            Some(url) => {
                self.transition(JobStatus::Completed)?;
                self.result_url = Some(url);
                self.thumbnail_url = thumbnail_url;
                self.completed_at = Some(Utc::now());
                self.transient_errors = 0;
                Ok(JobStatus::Completed)
            }
            None => {
                self.fail(
                    FailureKind::ResultIntegrity,
                    "Backend reported success but returned no result URL",
                )?;
                Ok(JobStatus::Failed)
            }
        }
    }

    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> Result<(), CoreError> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(message.into());
        self.failure_kind = Some(kind);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), CoreError> {
        self.transition(JobStatus::Cancelled)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Count a transient backend error. Once `limit` consecutive errors have
    /// been seen the job is failed and `true` is returned.
    pub fn record_transient_error(
        &mut self,
        message: &str,
        limit: u32,
    ) -> Result<bool, CoreError> {
        self.transient_errors += 1;
        if self.transient_errors >= limit {
            self.fail(
                FailureKind::TransientExhausted,
                format!(
                    "Gave up after {} consecutive transient errors: {message}",
                    self.transient_errors
                ),
            )?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Reopen a failed job for another attempt.
    ///
    /// Only `Failed` jobs with `attempts < max_attempts` may be retried;
    /// anything else is rejected and the record is left untouched.
    pub fn reset_for_retry(&mut self, max_attempts: u32) -> Result<(), CoreError> {
        if self.status != JobStatus::Failed {
            return Err(CoreError::Conflict(format!(
                "Only failed jobs can be retried; job {} is {}",
                self.id, self.status
            )));
        }
        if self.attempts >= max_attempts {
            return Err(CoreError::Conflict(format!(
                "Job {} has exhausted its {max_attempts} retry attempts",
                self.id
            )));
        }
        self.transition(JobStatus::Pending)?;
        self.attempts += 1;
        self.backend = None;
        self.backend_job_id = None;
        self.result_url = None;
        self.thumbnail_url = None;
        self.error_message = None;
        self.failure_kind = None;
        self.transient_errors = 0;
        self.submitted_at = None;
        self.completed_at = None;
        Ok(())
    }

    /// Whether the job has been resolved at least once. Retried jobs keep
    /// counting so sweep progress never moves backwards.
    pub fn is_swept(&self) -> bool {
        self.status.is_terminal() || self.attempts > 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

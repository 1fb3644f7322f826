//! Batch record and derived batch status.
//!
//! A batch exclusively owns its jobs. Batch status is never stored as
//! truth: [`BatchRecord::status`] recomputes it from the job set plus the
//! three control flags (`started_at`, `paused`, `cancelled_at`).

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::estimation::estimate_job_cost;
use crate::job::{JobRecord, JobStatus};
use crate::types::{BatchId, DbId, JobId, Timestamp};
use crate::variation::{self, VariationRequest};

// ---------------------------------------------------------------------------
// Batch status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Created, never started.
    Draft,
    /// Jobs are in flight or waiting to be (re)submitted.
    Running,
    /// Explicitly paused; excluded from polling.
    Paused,
    /// Every job completed.
    Completed,
    /// Nothing left in flight and at least one job did not complete.
    Failed,
    /// Cancelled before any job produced output.
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Batch record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: BatchId,
    pub owner_id: DbId,
    pub name: String,
    /// The request the jobs were expanded from.
    pub request: VariationRequest,
    pub jobs: Vec<JobRecord>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub paused: bool,
    pub cancelled_at: Option<Timestamp>,
}

impl BatchRecord {
    /// Expand `request` and create one pending job per spec.
    ///
    /// Fails with a validation error (and creates nothing) if the request
    /// cannot be expanded.
    pub fn create(
        owner_id: DbId,
        name: impl Into<String>,
        request: VariationRequest,
    ) -> Result<Self, CoreError> {
        let jobs = variation::expand(&request)?
            .into_iter()
            .map(|spec| {
                let cost = estimate_job_cost(&spec);
                JobRecord::new(spec, cost)
            })
            .collect();

        Ok(Self {
            id: uuid::Uuid::now_v7(),
            owner_id,
            name: name.into(),
            request,
            jobs,
            created_at: Utc::now(),
            started_at: None,
            paused: false,
            cancelled_at: None,
        })
    }

    /// Derive the batch status from its jobs and control flags.
    pub fn status(&self) -> BatchStatus {
        if self.cancelled_at.is_some() {
            return if self.count(JobStatus::Completed) > 0 {
                BatchStatus::Failed
            } else {
                BatchStatus::Cancelled
            };
        }
        if self.started_at.is_some() && self.jobs.iter().all(|j| j.status == JobStatus::Completed)
        {
            return BatchStatus::Completed;
        }
        if self.paused {
            return BatchStatus::Paused;
        }
        if self.jobs.iter().any(|j| j.status.is_in_flight()) {
            return BatchStatus::Running;
        }
        if self.started_at.is_none() {
            return BatchStatus::Draft;
        }
        if self.count(JobStatus::Pending) > 0 {
            return BatchStatus::Running;
        }
        BatchStatus::Failed
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    pub fn job(&self, id: JobId) -> Option<&JobRecord> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn job_mut(&mut self, id: JobId) -> Option<&mut JobRecord> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    /// "N of M failed" style summary for batches with unsuccessful jobs.
    pub fn failure_summary(&self) -> Option<String> {
        let unsuccessful = self.count(JobStatus::Failed) + self.count(JobStatus::Cancelled);
        (unsuccessful > 0).then(|| format!("{unsuccessful} of {} failed", self.jobs.len()))
    }

    /// Check the job count still matches the originating request.
    pub fn check_integrity(&self) -> Result<(), CoreError> {
        if self.jobs.len() != self.request.count as usize {
            return Err(CoreError::Internal(format!(
                "Batch {} has {} jobs but its request asked for {}",
                self.id,
                self.jobs.len(),
                self.request.count
            )));
        }
        Ok(())
    }
}

impl FromStr for BatchStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Draft,
            Self::Running,
            Self::Paused,
            Self::Completed,
            Self::Failed,
            Self::Cancelled,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
        .ok_or_else(|| CoreError::Validation(format!("Unknown batch status: '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

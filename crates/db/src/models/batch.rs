//! Row models for the `batches` and `batch_jobs` tables, and their
//! conversion to and from the domain records.

use std::collections::BTreeMap;

use reelforge_core::batch::BatchRecord;
use reelforge_core::job::{FailureKind, JobRecord, JobStatus};
use reelforge_core::types::{BatchId, DbId, JobId, Timestamp};
use reelforge_core::variation::{JobSpec, VariationRequest};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::repositories::RepoError;

/// A row from the `batches` table.
#[derive(Debug, Clone, FromRow)]
pub struct BatchRow {
    pub id: BatchId,
    pub owner_id: DbId,
    pub name: String,
    pub settings: Json<VariationRequest>,
    pub paused: bool,
    pub started_at: Option<Timestamp>,
    pub cancelled_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// A row from the `batch_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct BatchJobRow {
    pub id: JobId,
    pub batch_id: BatchId,
    pub job_index: i32,
    pub source_ref: String,
    pub dimensions: Json<BTreeMap<String, String>>,
    pub status: String,
    pub backend: Option<String>,
    pub backend_job_id: Option<String>,
    pub result_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error_message: Option<String>,
    pub failure_kind: Option<String>,
    pub attempts: i32,
    pub transient_errors: i32,
    pub estimated_cost: f64,
    pub submitted_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl BatchJobRow {
    pub fn from_record(batch_id: BatchId, job: &JobRecord) -> Self {
        Self {
            id: job.id,
            batch_id,
            job_index: job.spec.index as i32,
            source_ref: job.spec.source_ref.clone(),
            dimensions: Json(job.spec.dimensions.clone()),
            status: job.status.as_str().to_string(),
            backend: job.backend.clone(),
            backend_job_id: job.backend_job_id.clone(),
            result_url: job.result_url.clone(),
            thumbnail_url: job.thumbnail_url.clone(),
            error_message: job.error_message.clone(),
            failure_kind: job.failure_kind.map(|k| k.as_str().to_string()),
            attempts: job.attempts as i32,
            transient_errors: job.transient_errors as i32,
            estimated_cost: job.estimated_cost,
            submitted_at: job.submitted_at,
            completed_at: job.completed_at,
        }
    }

    pub fn into_record(self) -> Result<JobRecord, RepoError> {
        let status: JobStatus = self
            .status
            .parse()
            .map_err(|e| RepoError::Corrupt(format!("job {}: {e}", self.id)))?;
        let failure_kind = self
            .failure_kind
            .as_deref()
            .map(str::parse::<FailureKind>)
            .transpose()
            .map_err(|e| RepoError::Corrupt(format!("job {}: {e}", self.id)))?;

        Ok(JobRecord {
            id: self.id,
            spec: JobSpec {
                index: self.job_index.max(0) as u32,
                dimensions: self.dimensions.0,
                source_ref: self.source_ref,
            },
            status,
            backend: self.backend,
            backend_job_id: self.backend_job_id,
            result_url: self.result_url,
            thumbnail_url: self.thumbnail_url,
            error_message: self.error_message,
            failure_kind,
            attempts: self.attempts.max(0) as u32,
            transient_errors: self.transient_errors.max(0) as u32,
            submitted_at: self.submitted_at,
            completed_at: self.completed_at,
            estimated_cost: self.estimated_cost,
        })
    }
}

impl BatchRow {
    pub fn from_record(batch: &BatchRecord) -> Self {
        Self {
            id: batch.id,
            owner_id: batch.owner_id,
            name: batch.name.clone(),
            settings: Json(batch.request.clone()),
            paused: batch.paused,
            started_at: batch.started_at,
            cancelled_at: batch.cancelled_at,
            created_at: batch.created_at,
        }
    }

    /// Reassemble a batch. `jobs` must be ordered by `job_index`.
    pub fn into_record(self, jobs: Vec<BatchJobRow>) -> Result<BatchRecord, RepoError> {
        let jobs = jobs
            .into_iter()
            .map(BatchJobRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;

        let batch = BatchRecord {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            request: self.settings.0,
            jobs,
            created_at: self.created_at,
            started_at: self.started_at,
            paused: self.paused,
            cancelled_at: self.cancelled_at,
        };
        batch
            .check_integrity()
            .map_err(|e| RepoError::Corrupt(e.to_string()))?;
        Ok(batch)
    }
}

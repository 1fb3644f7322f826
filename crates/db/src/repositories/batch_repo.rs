//! PostgreSQL repository for the `batches` and `batch_jobs` tables.

use std::collections::HashMap;

use async_trait::async_trait;
use reelforge_core::batch::BatchRecord;
use reelforge_core::types::{BatchId, DbId};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{BatchRepository, RepoError};
use crate::models::batch::{BatchJobRow, BatchRow};

/// Column list for `batches` queries.
const BATCH_COLUMNS: &str = "\
    id, owner_id, name, settings, paused, started_at, cancelled_at, created_at";

/// Column list for `batch_jobs` queries.
const JOB_COLUMNS: &str = "\
    id, batch_id, job_index, source_ref, dimensions, status, backend, \
    backend_job_id, result_url, thumbnail_url, error_message, failure_kind, \
    attempts, transient_errors, estimated_cost, submitted_at, completed_at";

/// Rows per multi-row upsert; keeps bind parameters under the Postgres limit.
const JOB_UPSERT_CHUNK: usize = 500;

pub struct PgBatchRepo {
    pool: PgPool,
}

impl PgBatchRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch the jobs of `batch_ids`, grouped by batch and ordered by index.
    async fn jobs_for(
        &self,
        batch_ids: &[BatchId],
    ) -> Result<HashMap<BatchId, Vec<BatchJobRow>>, RepoError> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM batch_jobs \
             WHERE batch_id = ANY($1) \
             ORDER BY batch_id, job_index"
        );
        let rows = sqlx::query_as::<_, BatchJobRow>(&query)
            .bind(batch_ids)
            .fetch_all(&self.pool)
            .await?;

        let mut grouped: HashMap<BatchId, Vec<BatchJobRow>> = HashMap::new();
        for row in rows {
            grouped.entry(row.batch_id).or_default().push(row);
        }
        Ok(grouped)
    }

    async fn assemble(&self, rows: Vec<BatchRow>) -> Result<Vec<BatchRecord>, RepoError> {
        let ids: Vec<BatchId> = rows.iter().map(|r| r.id).collect();
        let mut jobs = self.jobs_for(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let batch_jobs = jobs.remove(&row.id).unwrap_or_default();
                row.into_record(batch_jobs)
            })
            .collect()
    }
}

#[async_trait]
impl BatchRepository for PgBatchRepo {
    async fn save(&self, batch: &BatchRecord) -> Result<(), RepoError> {
        let row = BatchRow::from_record(batch);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO batches \
                 (id, owner_id, name, settings, paused, started_at, cancelled_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 paused = EXCLUDED.paused, \
                 started_at = EXCLUDED.started_at, \
                 cancelled_at = EXCLUDED.cancelled_at, \
                 updated_at = NOW()",
        )
        .bind(row.id)
        .bind(row.owner_id)
        .bind(&row.name)
        .bind(&row.settings)
        .bind(row.paused)
        .bind(row.started_at)
        .bind(row.cancelled_at)
        .bind(row.created_at)
        .execute(&mut *tx)
        .await?;

        for chunk in batch.jobs.chunks(JOB_UPSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO batch_jobs ({JOB_COLUMNS}) "));
            builder.push_values(chunk, |mut b, job| {
                let job = BatchJobRow::from_record(batch.id, job);
                b.push_bind(job.id)
                    .push_bind(job.batch_id)
                    .push_bind(job.job_index)
                    .push_bind(job.source_ref)
                    .push_bind(job.dimensions)
                    .push_bind(job.status)
                    .push_bind(job.backend)
                    .push_bind(job.backend_job_id)
                    .push_bind(job.result_url)
                    .push_bind(job.thumbnail_url)
                    .push_bind(job.error_message)
                    .push_bind(job.failure_kind)
                    .push_bind(job.attempts)
                    .push_bind(job.transient_errors)
                    .push_bind(job.estimated_cost)
                    .push_bind(job.submitted_at)
                    .push_bind(job.completed_at);
            });
            builder.push(
                " ON CONFLICT (id) DO UPDATE SET \
                     status = EXCLUDED.status, \
                     backend = EXCLUDED.backend, \
                     backend_job_id = EXCLUDED.backend_job_id, \
                     result_url = EXCLUDED.result_url, \
                     thumbnail_url = EXCLUDED.thumbnail_url, \
                     error_message = EXCLUDED.error_message, \
                     failure_kind = EXCLUDED.failure_kind, \
                     attempts = EXCLUDED.attempts, \
                     transient_errors = EXCLUDED.transient_errors, \
                     submitted_at = EXCLUDED.submitted_at, \
                     completed_at = EXCLUDED.completed_at",
            );
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        tracing::trace!(batch_id = %batch.id, jobs = batch.jobs.len(), "Saved batch");
        Ok(())
    }

    async fn load(&self, id: BatchId) -> Result<Option<BatchRecord>, RepoError> {
        let query = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = $1");
        let Some(row) = sqlx::query_as::<_, BatchRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        Ok(self.assemble(vec![row]).await?.pop())
    }

    async fn list(&self, owner_id: DbId) -> Result<Vec<BatchRecord>, RepoError> {
        let query = format!(
            "SELECT {BATCH_COLUMNS} FROM batches \
             WHERE owner_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, BatchRow>(&query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        self.assemble(rows).await
    }

    async fn list_active(&self) -> Result<Vec<BatchRecord>, RepoError> {
        let query = format!(
            "SELECT {BATCH_COLUMNS} FROM batches \
             WHERE started_at IS NOT NULL AND cancelled_at IS NULL \
             ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, BatchRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        self.assemble(rows).await
    }

    async fn delete(&self, id: BatchId) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM batches WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

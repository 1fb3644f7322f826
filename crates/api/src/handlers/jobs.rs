//! Handlers for the `/jobs` resource.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use reelforge_core::types::JobId;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/jobs/{id}/retry
///
/// Reopen a failed job; it is resubmitted on the batch's next refresh.
/// Returns 409 for jobs that are not failed or have no attempts left.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.orchestrator.retry(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

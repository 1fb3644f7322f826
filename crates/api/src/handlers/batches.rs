//! Handlers for the `/batches` resource.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use reelforge_core::batch::{BatchRecord, BatchStatus};
use reelforge_core::progress::{self, ProgressSummary};
use reelforge_core::types::{BatchId, DbId, Timestamp};
use reelforge_core::variation::VariationRequest;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBatch {
    #[validate(range(min = 1))]
    pub owner_id: DbId,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(nested)]
    pub request: VariationRequest,
}

#[derive(Debug, Deserialize)]
pub struct BatchListQuery {
    pub owner_id: DbId,
}

/// A batch with its derived status and progress.
#[derive(Debug, Serialize)]
pub struct BatchDetail {
    #[serde(flatten)]
    pub batch: BatchRecord,
    pub status: BatchStatus,
    pub progress: ProgressSummary,
}

impl From<BatchRecord> for BatchDetail {
    fn from(batch: BatchRecord) -> Self {
        Self {
            status: batch.status(),
            progress: progress::summarize(&batch),
            batch,
        }
    }
}

/// List entry: everything but the job records.
#[derive(Debug, Serialize)]
pub struct BatchListItem {
    pub id: BatchId,
    pub owner_id: DbId,
    pub name: String,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub status: BatchStatus,
    pub progress: ProgressSummary,
}

impl From<BatchRecord> for BatchListItem {
    fn from(batch: BatchRecord) -> Self {
        Self {
            status: batch.status(),
            progress: progress::summarize(&batch),
            id: batch.id,
            owner_id: batch.owner_id,
            name: batch.name,
            created_at: batch.created_at,
            started_at: batch.started_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Create / read / delete
// ---------------------------------------------------------------------------

/// POST /api/v1/batches
///
/// Expand a variation request into a draft batch. Returns 201; nothing is
/// submitted until the batch is started.
pub async fn create_batch(
    State(state): State<AppState>,
    Json(input): Json<CreateBatch>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let batch = state
        .orchestrator
        .create(input.owner_id, input.name, input.request)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: BatchDetail::from(batch),
        }),
    ))
}

/// GET /api/v1/batches?owner_id=
pub async fn list_batches(
    State(state): State<AppState>,
    Query(params): Query<BatchListQuery>,
) -> AppResult<impl IntoResponse> {
    let batches: Vec<BatchListItem> = state
        .orchestrator
        .list(params.owner_id)
        .await?
        .into_iter()
        .map(BatchListItem::from)
        .collect();
    Ok(Json(DataResponse { data: batches }))
}

/// GET /api/v1/batches/{id}
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<BatchId>,
) -> AppResult<impl IntoResponse> {
    let batch = state.orchestrator.get(batch_id).await?;
    Ok(Json(DataResponse {
        data: BatchDetail::from(batch),
    }))
}

/// DELETE /api/v1/batches/{id}
///
/// Returns 204. A running batch must be cancelled first (409).
pub async fn delete_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<BatchId>,
) -> AppResult<impl IntoResponse> {
    state.orchestrator.delete(batch_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/batches/{id}/progress
pub async fn get_progress(
    State(state): State<AppState>,
    Path(batch_id): Path<BatchId>,
) -> AppResult<impl IntoResponse> {
    let summary = state.orchestrator.summarize(batch_id).await?;
    Ok(Json(DataResponse { data: summary }))
}

// ---------------------------------------------------------------------------
// Controls
// ---------------------------------------------------------------------------

/// POST /api/v1/batches/{id}/start
///
/// Marks the batch started and returns 202 right away; submissions run in
/// the background and show up through progress polling.
pub async fn start_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<BatchId>,
) -> AppResult<impl IntoResponse> {
    let batch = state.orchestrator.launch(batch_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: BatchDetail::from(batch),
        }),
    ))
}

/// POST /api/v1/batches/{id}/refresh
///
/// Poll in-flight jobs now instead of waiting for the scheduler.
pub async fn refresh_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<BatchId>,
) -> AppResult<impl IntoResponse> {
    state.orchestrator.refresh(batch_id).await?;
    let batch = state.orchestrator.get(batch_id).await?;
    Ok(Json(DataResponse {
        data: BatchDetail::from(batch),
    }))
}

/// POST /api/v1/batches/{id}/pause
pub async fn pause_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<BatchId>,
) -> AppResult<impl IntoResponse> {
    let batch = state.orchestrator.pause(batch_id).await?;
    Ok(Json(DataResponse {
        data: BatchDetail::from(batch),
    }))
}

/// POST /api/v1/batches/{id}/resume
pub async fn resume_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<BatchId>,
) -> AppResult<impl IntoResponse> {
    let batch = state.orchestrator.resume(batch_id).await?;
    Ok(Json(DataResponse {
        data: BatchDetail::from(batch),
    }))
}

/// POST /api/v1/batches/{id}/cancel
///
/// Jobs are marked cancelled immediately; backend cancellation requests
/// are not awaited.
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<BatchId>,
) -> AppResult<impl IntoResponse> {
    let batch = state.orchestrator.cancel(batch_id).await?;
    tracing::info!(batch_id = %batch_id, "Batch cancelled via API");
    Ok(Json(DataResponse {
        data: BatchDetail::from(batch),
    }))
}

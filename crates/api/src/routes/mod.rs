pub mod batches;
pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /batches                      list (?owner_id=), create
/// /batches/{id}                 get, delete
/// /batches/{id}/progress        progress summary
/// /batches/{id}/start           start (submission runs in background)
/// /batches/{id}/refresh         poll in-flight jobs now
/// /batches/{id}/pause           pause
/// /batches/{id}/resume          resume
/// /batches/{id}/cancel          cancel
///
/// /jobs/{id}/retry              retry a failed job
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/batches", batches::router())
        .nest("/jobs", jobs::router())
}

//! Route definitions for the `/batches` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::batches;
use crate::state::AppState;

/// Routes mounted at `/batches`.
///
/// ```text
/// GET    /                  -> list_batches
/// POST   /                  -> create_batch
/// GET    /{id}              -> get_batch
/// DELETE /{id}              -> delete_batch
/// GET    /{id}/progress     -> get_progress
/// POST   /{id}/start        -> start_batch
/// POST   /{id}/refresh      -> refresh_batch
/// POST   /{id}/pause        -> pause_batch
/// POST   /{id}/resume       -> resume_batch
/// POST   /{id}/cancel       -> cancel_batch
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(batches::list_batches).post(batches::create_batch))
        .route(
            "/{id}",
            get(batches::get_batch).delete(batches::delete_batch),
        )
        .route("/{id}/progress", get(batches::get_progress))
        .route("/{id}/start", post(batches::start_batch))
        .route("/{id}/refresh", post(batches::refresh_batch))
        .route("/{id}/pause", post(batches::pause_batch))
        .route("/{id}/resume", post(batches::resume_batch))
        .route("/{id}/cancel", post(batches::cancel_batch))
}

//! Route definitions for the `/jobs` resource.

use axum::routing::post;
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// POST   /{id}/retry        -> retry_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/{id}/retry", post(jobs::retry_job))
}

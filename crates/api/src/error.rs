use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reelforge_db::repositories::RepoError;
use reelforge_pipeline::OrchestratorError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`OrchestratorError`] for domain errors and request-body
/// validation failures. Renders as `{ "error": ..., "code": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// Request body failed field validation.
    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Orchestrator(err) => match err {
                OrchestratorError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                OrchestratorError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                OrchestratorError::Conflict(msg) => {
                    (StatusCode::CONFLICT, "CONFLICT", msg.clone())
                }
                OrchestratorError::Repository(repo) => classify_repo_error(repo),
                OrchestratorError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal orchestrator error");
                    internal()
                }
            },

            AppError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                errors.to_string(),
            ),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Storage failures never leak details to the caller.
fn classify_repo_error(err: &RepoError) -> (StatusCode, &'static str, String) {
    match err {
        RepoError::Corrupt(msg) => {
            tracing::error!(error = %msg, "Stored batch is corrupt");
        }
        RepoError::Database(db) => {
            tracing::error!(error = %db, "Database error");
        }
    }
    internal()
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

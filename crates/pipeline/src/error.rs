use reelforge_core::error::CoreError;
use reelforge_db::repositories::RepoError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// The operation is not allowed in the current batch or job state.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Repository(#[from] RepoError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CoreError> for OrchestratorError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            CoreError::Validation(msg) => Self::Validation(msg),
            CoreError::Conflict(msg) => Self::Conflict(msg),
            CoreError::Internal(msg) => Self::Internal(msg),
        }
    }
}

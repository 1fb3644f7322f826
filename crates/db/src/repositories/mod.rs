//! Batch repository trait and its implementations.

mod batch_repo;
mod memory;

use async_trait::async_trait;
use reelforge_core::batch::BatchRecord;
use reelforge_core::types::{BatchId, DbId};

pub use batch_repo::PgBatchRepo;
pub use memory::InMemoryBatchRepo;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be turned back into a valid record.
    #[error("Corrupt batch data: {0}")]
    Corrupt(String),
}

/// Durable storage for batches and their jobs.
///
/// `save` writes the whole batch (control flags and every job) atomically,
/// replacing any previous version.
#[async_trait]
pub trait BatchRepository: Send + Sync {
    async fn save(&self, batch: &BatchRecord) -> Result<(), RepoError>;

    async fn load(&self, id: BatchId) -> Result<Option<BatchRecord>, RepoError>;

    /// All batches for an owner, newest first.
    async fn list(&self, owner_id: DbId) -> Result<Vec<BatchRecord>, RepoError>;

    /// Batches that were started and never cancelled, for re-adoption after
    /// a restart.
    async fn list_active(&self) -> Result<Vec<BatchRecord>, RepoError>;

    /// Returns `false` if no batch had that id.
    async fn delete(&self, id: BatchId) -> Result<bool, RepoError>;
}

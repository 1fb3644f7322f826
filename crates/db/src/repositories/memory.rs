//! Process-local batch store.

use std::collections::HashMap;

use async_trait::async_trait;
use reelforge_core::batch::BatchRecord;
use reelforge_core::types::{BatchId, DbId};
use tokio::sync::RwLock;

use super::{BatchRepository, RepoError};

/// Keeps batches in a `RwLock<HashMap>`. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryBatchRepo {
    batches: RwLock<HashMap<BatchId, BatchRecord>>,
}

impl InMemoryBatchRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BatchRepository for InMemoryBatchRepo {
    async fn save(&self, batch: &BatchRecord) -> Result<(), RepoError> {
        self.batches.write().await.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn load(&self, id: BatchId) -> Result<Option<BatchRecord>, RepoError> {
        Ok(self.batches.read().await.get(&id).cloned())
    }

    async fn list(&self, owner_id: DbId) -> Result<Vec<BatchRecord>, RepoError> {
        let mut batches: Vec<BatchRecord> = self
            .batches
            .read()
            .await
            .values()
            .filter(|b| b.owner_id == owner_id)
            .cloned()
            .collect();
        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(batches)
    }

    async fn list_active(&self) -> Result<Vec<BatchRecord>, RepoError> {
        Ok(self
            .batches
            .read()
            .await
            .values()
            .filter(|b| b.started_at.is_some() && b.cancelled_at.is_none())
            .cloned()
            .collect())
    }

    async fn delete(&self, id: BatchId) -> Result<bool, RepoError> {
        Ok(self.batches.write().await.remove(&id).is_some())
    }
}

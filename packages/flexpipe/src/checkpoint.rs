//! Checkpoint index - restart-without-duplicate-work, derived from the
//! durable store.
//!
//! A checkpoint commit is the final step of completing an item at a stage.
//! A crash between "side effect applied" and "checkpoint written" reads as
//! "not yet done" on retry; stage bodies are idempotent, so the rare
//! duplicate external call is accepted.

use std::sync::Arc;

use crate::error::StoreResult;
use crate::traits::store::{DurableStore, PutOutcome, StoreKey};
use crate::types::checkpoint::CheckpointRecord;
use crate::types::stage::StageName;

/// Outcome of committing a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// This commit created the record; the committer owns forwarding.
    Committed,

    /// Another delivery got there first; do not forward again.
    Duplicate,
}

/// "Has item X already been processed by stage S in execution E?"
#[derive(Clone)]
pub struct CheckpointIndex {
    store: Arc<dyn DurableStore>,
}

impl CheckpointIndex {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Look up the checkpoint for (execution, stage, item), if any.
    pub async fn find(
        &self,
        execution_id: &str,
        stage: StageName,
        item_id: &str,
    ) -> StoreResult<Option<CheckpointRecord>> {
        let key = StoreKey::new(execution_id, stage, item_id);
        self.store.get(&key).await
    }

    /// True when the item has any terminal record at the stage.
    pub async fn exists(
        &self,
        execution_id: &str,
        stage: StageName,
        item_id: &str,
    ) -> StoreResult<bool> {
        Ok(self.find(execution_id, stage, item_id).await?.is_some())
    }

    /// Commit a checkpoint record. First write wins; concurrent deliveries
    /// of the same item see `Duplicate` and must not forward downstream.
    pub async fn commit(&self, record: &CheckpointRecord) -> StoreResult<CommitOutcome> {
        let key = StoreKey::new(record.execution_id.clone(), record.stage, record.item_id.clone());
        match self.store.put(&key, record).await? {
            PutOutcome::Created => Ok(CommitOutcome::Committed),
            PutOutcome::AlreadyExists => Ok(CommitOutcome::Duplicate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::types::item::{DiscoveredUrl, ProductRecord};
    use chrono::Utc;

    fn checkpoint(item: &str) -> CheckpointRecord {
        let record = ProductRecord::new(DiscoveredUrl::new(
            format!("https://shop.example.com/p/{item}"),
            item,
            "https://shop.example.com",
        ));
        CheckpointRecord::succeeded("exec_1", StageName::Extraction, item, record, true, 1, Utc::now())
    }

    #[tokio::test]
    async fn commit_is_first_write_wins() {
        let index = CheckpointIndex::new(Arc::new(MemoryStore::new()));
        let record = checkpoint("item_a");

        assert_eq!(index.commit(&record).await.unwrap(), CommitOutcome::Committed);
        assert_eq!(index.commit(&record).await.unwrap(), CommitOutcome::Duplicate);
        assert!(index
            .exists("exec_1", StageName::Extraction, "item_a")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn find_is_scoped_to_stage_and_execution() {
        let index = CheckpointIndex::new(Arc::new(MemoryStore::new()));
        index.commit(&checkpoint("item_a")).await.unwrap();

        assert!(index
            .find("exec_1", StageName::Categorization, "item_a")
            .await
            .unwrap()
            .is_none());
        assert!(index
            .find("exec_2", StageName::Extraction, "item_a")
            .await
            .unwrap()
            .is_none());
        assert!(index
            .find("exec_1", StageName::Extraction, "item_a")
            .await
            .unwrap()
            .is_some());
    }
}

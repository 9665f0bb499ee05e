//! In-memory store implementation for testing and development.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::traits::store::{DurableStore, KeyPrefix, ListPage, PageRequest, PutOutcome, StoreKey};
use crate::types::checkpoint::CheckpointRecord;

/// In-memory store for checkpoint records and artifacts.
///
/// Records live in a sorted map keyed by the canonical key string, which
/// gives deterministic prefix listing and stable page tokens. Not durable -
/// data is lost on restart - so only suitable for tests and development.
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, CheckpointRecord>>,
    artifacts: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            artifacts: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of checkpoint records held.
    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Number of artifacts held.
    pub fn artifact_count(&self) -> usize {
        self.artifacts.read().unwrap().len()
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        self.records.write().unwrap().clear();
        self.artifacts.write().unwrap().clear();
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn put(&self, key: &StoreKey, record: &CheckpointRecord) -> StoreResult<PutOutcome> {
        let mut records = self.records.write().unwrap();
        match records.entry(key.canonical()) {
            std::collections::btree_map::Entry::Occupied(_) => Ok(PutOutcome::AlreadyExists),
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(record.clone());
                Ok(PutOutcome::Created)
            }
        }
    }

    async fn get(&self, key: &StoreKey) -> StoreResult<Option<CheckpointRecord>> {
        Ok(self.records.read().unwrap().get(&key.canonical()).cloned())
    }

    async fn list(&self, prefix: &KeyPrefix, page: PageRequest) -> StoreResult<ListPage> {
        use std::ops::Bound;

        let records = self.records.read().unwrap();
        let prefix_str = prefix.canonical();
        let size = page.size.max(1);

        // Page tokens are the canonical key of the last record returned.
        let lower = match &page.token {
            Some(token) => Bound::Excluded(token.clone()),
            None => Bound::Included(prefix_str.clone()),
        };

        let mut out = Vec::with_capacity(size);
        let mut more = false;
        for (key, record) in records.range((lower, Bound::Unbounded)) {
            if !key.starts_with(&prefix_str) {
                break;
            }
            if out.len() == size {
                more = true;
                break;
            }
            out.push(record.clone());
        }

        let next_token = if more {
            out.last().map(|r| {
                StoreKey::new(r.execution_id.clone(), r.stage, r.item_id.clone()).canonical()
            })
        } else {
            None
        };

        Ok(ListPage {
            records: out,
            next_token,
        })
    }

    async fn put_artifact(
        &self,
        execution_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> StoreResult<()> {
        let key = format!("{}/results/{}", execution_id, name);
        self.artifacts.write().unwrap().insert(key, bytes.to_vec());
        Ok(())
    }

    async fn get_artifact(&self, execution_id: &str, name: &str) -> StoreResult<Option<Vec<u8>>> {
        let key = format!("{}/results/{}", execution_id, name);
        Ok(self.artifacts.read().unwrap().get(&key).cloned())
    }
}

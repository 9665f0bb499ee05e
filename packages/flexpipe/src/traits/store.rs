//! Durable store interface - the single source of truth for checkpoints
//! and final artifacts.
//!
//! Keys are structured as `{execution}/{stage}/{item}` so the checkpoint
//! index and consolidator can enumerate by prefix. Artifacts (CSV tables,
//! JSON reports) live beside the records under a per-execution `results`
//! area and use overwrite semantics; checkpoint records are create-only.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::checkpoint::CheckpointRecord;
use crate::types::stage::StageName;

/// Fully qualified key for one checkpoint record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub execution_id: String,
    pub stage: StageName,
    pub item_id: String,
}

impl StoreKey {
    pub fn new(
        execution_id: impl Into<String>,
        stage: StageName,
        item_id: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            stage,
            item_id: item_id.into(),
        }
    }

    /// Canonical string form used for ordering and page tokens.
    pub fn canonical(&self) -> String {
        format!("{}/{}/{}", self.execution_id, self.stage, self.item_id)
    }
}

/// Prefix selecting all records of one execution's stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPrefix {
    pub execution_id: String,
    pub stage: StageName,
}

impl KeyPrefix {
    pub fn new(execution_id: impl Into<String>, stage: StageName) -> Self {
        Self {
            execution_id: execution_id.into(),
            stage,
        }
    }

    pub fn canonical(&self) -> String {
        format!("{}/{}/", self.execution_id, self.stage)
    }
}

/// Pagination request for prefix listing.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    /// Continue after this token (from a previous `ListPage`)
    pub token: Option<String>,

    /// Maximum records per page
    pub size: usize,
}

impl PageRequest {
    pub fn first(size: usize) -> Self {
        Self { token: None, size }
    }

    pub fn after(token: impl Into<String>, size: usize) -> Self {
        Self {
            token: Some(token.into()),
            size,
        }
    }
}

/// One page of records from a prefix listing.
#[derive(Debug, Clone)]
pub struct ListPage {
    pub records: Vec<CheckpointRecord>,

    /// Present when more records remain past this page
    pub next_token: Option<String>,
}

/// Result of a conditional put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was written
    Created,
    /// A record already existed at this key; nothing was written
    AlreadyExists,
}

/// Content-addressable persistent storage keyed by execution/stage/item.
///
/// `put` is create-only: the first write wins and later writes for the same
/// key are no-ops reporting `AlreadyExists`. That conditional write is what
/// makes checkpoint commits idempotent under redelivery.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Write a checkpoint record unless one already exists at this key.
    async fn put(&self, key: &StoreKey, record: &CheckpointRecord) -> StoreResult<PutOutcome>;

    /// Fetch the record at a key, if any.
    async fn get(&self, key: &StoreKey) -> StoreResult<Option<CheckpointRecord>>;

    /// List records under a prefix, in stable key order, one page at a time.
    async fn list(&self, prefix: &KeyPrefix, page: PageRequest) -> StoreResult<ListPage>;

    /// Write (or overwrite) a named artifact for an execution.
    async fn put_artifact(
        &self,
        execution_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> StoreResult<()>;

    /// Fetch a named artifact, if present.
    async fn get_artifact(&self, execution_id: &str, name: &str) -> StoreResult<Option<Vec<u8>>>;
}

//! Execution identity - one end-to-end run against one target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One run of the pipeline against one target site.
///
/// Every checkpoint record and queue item carries the execution id, so a
/// subsequent run with the same id resumes instead of redoing work.
/// Executions are never deleted by the pipeline; retention is external.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Unique, time-ordered id, e.g. `exec_1756400000_3fa8b2c1`
    pub id: String,

    /// Environment tag (dev, prod) used as the store key root
    pub environment: String,

    /// Target site URL this run scrapes
    pub target: String,

    /// Cap on items entering the pipeline
    pub max_items: Option<usize>,

    /// When the execution was created
    pub created_at: DateTime<Utc>,
}

impl Execution {
    /// Create a new execution with a generated id.
    pub fn new(target: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            id: Self::generate_id(),
            environment: environment.into(),
            target: target.into(),
            max_items: None,
            created_at: Utc::now(),
        }
    }

    /// Resume an existing execution by id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Cap the number of items processed.
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    /// Generate a time-ordered execution id.
    pub fn generate_id() -> String {
        let timestamp = Utc::now().timestamp();
        let unique = Uuid::new_v4().simple().to_string();
        format!("exec_{}_{}", timestamp, &unique[..8])
    }
}

/// Terminal status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

//! Checkpoint records - durable proof an item finished a stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::types::item::ProductRecord;
use crate::types::stage::StageName;

/// Persisted proof that an item reached a terminal state at one stage.
///
/// Written at most meaningfully once per (execution, stage, item); the
/// worker checks for it before doing work and commits it as the final step
/// of completing an item. The payload snapshot lets a restarted run forward
/// the stored result downstream without re-invoking the stage body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub execution_id: String,
    pub stage: StageName,
    pub item_id: String,

    /// Terminal outcome at this stage
    pub status: CheckpointStatus,

    /// Error detail when status is `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,

    /// Payload snapshot at completion (input snapshot on failure)
    pub record: ProductRecord,

    /// Whether the item was forwarded to the next stage
    pub advanced: bool,

    /// Stage-body invocations it took to reach this outcome
    pub attempts: u32,

    /// When the worker started on this item
    pub entered_at: DateTime<Utc>,

    /// When the terminal outcome was reached
    pub completed_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Record a successful stage completion.
    pub fn succeeded(
        execution_id: impl Into<String>,
        stage: StageName,
        item_id: impl Into<String>,
        record: ProductRecord,
        advanced: bool,
        attempts: u32,
        entered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            stage,
            item_id: item_id.into(),
            status: CheckpointStatus::Succeeded,
            error: None,
            record,
            advanced,
            attempts,
            entered_at,
            completed_at: Utc::now(),
        }
    }

    /// Record a terminal per-item failure; the item stops at this stage.
    pub fn failed(
        execution_id: impl Into<String>,
        stage: StageName,
        item_id: impl Into<String>,
        record: ProductRecord,
        error: &StageError,
        attempts: u32,
        entered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            stage,
            item_id: item_id.into(),
            status: CheckpointStatus::Failed,
            error: Some(ErrorDetail::from_stage_error(error)),
            record,
            advanced: false,
            attempts,
            entered_at,
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CheckpointStatus::Succeeded
    }

    /// Wall-clock time the item spent in this stage.
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.entered_at
    }
}

/// Terminal outcome of an item at one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Succeeded,
    Failed,
}

/// Error kind and message stored with a failed checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error kind, e.g. `scrape`, `timeout`, `rate_limited`
    pub kind: String,

    /// Human-readable message
    pub message: String,
}

impl ErrorDetail {
    pub fn from_stage_error(error: &StageError) -> Self {
        Self {
            kind: error.name().to_string(),
            message: error.to_string(),
        }
    }
}

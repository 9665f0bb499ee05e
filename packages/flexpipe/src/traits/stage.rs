//! The stage body interface - the enrichment function a worker invokes.

use async_trait::async_trait;

use crate::error::StageResult;
use crate::types::item::{ProductRecord, WorkItem};
use crate::types::stage::StageName;

/// Context handed to a stage body alongside the item.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub execution_id: String,
    pub stage: StageName,

    /// Environment tag (dev, prod)
    pub environment: String,
}

/// What a stage body produced for one item.
#[derive(Debug, Clone)]
pub enum StageOutput {
    /// Enriched record continues to the next stage's input queue.
    Forward(ProductRecord),

    /// Record reached its terminal state at this stage and does not
    /// advance (e.g. an excluded category skips classification).
    Done(ProductRecord),
}

impl StageOutput {
    pub fn record(&self) -> &ProductRecord {
        match self {
            StageOutput::Forward(record) | StageOutput::Done(record) => record,
        }
    }

    pub fn into_record(self) -> ProductRecord {
        match self {
            StageOutput::Forward(record) | StageOutput::Done(record) => record,
        }
    }

    pub fn advances(&self) -> bool {
        matches!(self, StageOutput::Forward(_))
    }
}

/// One stage's enrichment function.
///
/// Must be safely callable more than once for the same item: at-least-once
/// queue delivery means a body can be re-invoked after a crash between the
/// side effect and the checkpoint commit. Bodies should be pure
/// transformations plus idempotent external calls.
#[async_trait]
pub trait StageBody: Send + Sync {
    /// Process one item and return the enriched record, or a per-item error.
    async fn process(&self, ctx: &StageContext, item: &WorkItem) -> StageResult<StageOutput>;
}

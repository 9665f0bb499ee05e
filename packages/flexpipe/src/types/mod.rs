//! Data model: executions, work items, checkpoint records, reports.

pub mod checkpoint;
pub mod execution;
pub mod item;
pub mod report;
pub mod stage;

pub use checkpoint::{CheckpointRecord, CheckpointStatus, ErrorDetail};
pub use execution::{Execution, ExecutionStatus};
pub use item::{
    CategoryFields, DiscoveredUrl, EligibilityFields, EligibilityLikelihood, EligibilityStatus,
    ExtractedFields, IndexFields, ProductRecord, WorkItem,
};
pub use report::{ExecutionReport, ProgressSnapshot, StageOutcome, StageProgress, WorkerTally};
pub use stage::StageName;

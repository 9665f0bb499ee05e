//! Staged product-enrichment pipeline with durable checkpoints.
//!
//! flexpipe discovers product URLs on a target site and pushes them through
//! enrichment stages (extraction → categorization → eligibility
//! classification → vector indexing), then consolidates per-item records
//! into final artifacts.
//!
//! The core is the stage-orchestration engine:
//! - [`queue::WorkQueue`] - bounded MPMC hand-off between stages with a
//!   completion sentinel
//! - [`worker`] - per-stage worker loops competing for one input queue
//! - [`orchestrator::StageOrchestrator`] - pool lifecycle and completion
//!   detection for one stage
//! - [`controller::PipelineController`] - overlapped stage schedule, the
//!   fatal/non-fatal policy, and progress snapshots
//! - [`checkpoint::CheckpointIndex`] - durable proof an item finished a
//!   stage; the source of restart-without-duplicate-work
//! - [`consolidate::Consolidator`] - read-only aggregation of checkpoint
//!   records into result tables and a summary report
//!
//! Stage bodies are swappable behind [`traits::StageBody`]; reference
//! implementations live in [`stages`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use flexpipe::config::PipelineConfig;
//! use flexpipe::controller::PipelineController;
//! use flexpipe::stores::MemoryStore;
//! use flexpipe::types::Execution;
//!
//! let store = Arc::new(MemoryStore::new());
//! let controller = PipelineController::new(
//!     PipelineConfig::new("dev"),
//!     store,
//!     discovery,
//!     stages,
//! );
//!
//! let execution = Execution::new("https://shop.example.com", "dev");
//! let report = controller.run(&execution).await?;
//! println!("{} items reached the final stage", report.completed_items());
//! ```

pub mod checkpoint;
pub mod config;
pub mod consolidate;
pub mod controller;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod queue;
pub mod security;
pub mod stages;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;
pub mod worker;

pub use checkpoint::{CheckpointIndex, CommitOutcome};
pub use config::{PipelineConfig, RetryPolicy, StageSpec};
pub use consolidate::{Consolidation, Consolidator};
pub use controller::PipelineController;
pub use error::{ErrorKind, PipelineError, Result, StageError, StageResult};
pub use progress::ProgressTracker;
pub use queue::{QueueEntry, WorkQueue};
pub use types::{Execution, ProductRecord, ProgressSnapshot, StageName, WorkItem};

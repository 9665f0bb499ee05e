//! Typed errors for the pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`). Two tiers:
//! [`PipelineError`] halts an execution, [`StageError`] terminates only the
//! item it occurred on.

use std::time::Duration;

use thiserror::Error;

/// Errors that halt a whole execution.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Discovery produced zero items; nothing for any stage to do
    #[error("discovery produced no items for {target}")]
    EmptyDiscovery { target: String },

    /// Discovery itself failed
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// Durable store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Execution wall-clock ceiling exceeded
    #[error("execution deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// A worker task panicked or was cancelled
    #[error("worker task failed: {0}")]
    WorkerTask(String),

    /// A stage input queue closed before its producer finished
    #[error("queue closed for stage {stage}")]
    QueueClosed { stage: String },

    /// Consolidation failed
    #[error("consolidation error: {0}")]
    Consolidation(String),
}

/// Errors that terminate a single item at the stage that raised them.
///
/// Siblings are unaffected; the worker records the error and keeps polling.
#[derive(Debug, Error)]
pub enum StageError {
    /// Page fetch or parse failed
    #[error("scrape failed for {url}: {message}")]
    Scrape { url: String, message: String },

    /// Classification model call failed
    #[error("model error: {0}")]
    Model(String),

    /// Vector index upsert failed
    #[error("index error: {0}")]
    Index(String),

    /// External service rejected the call for rate limiting
    #[error("rate limit exceeded")]
    RateLimited,

    /// Per-item deadline exceeded
    #[error("stage deadline exceeded after {0:?}")]
    Timeout(Duration),

    /// Network-level failure reaching an external service
    #[error("connection error: {0}")]
    Connection(String),

    /// Stage body returned output the pipeline cannot use
    #[error("malformed stage output: {0}")]
    Malformed(String),
}

/// Whether a per-item failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Likely recoverable; retried under the configured policy
    Transient,
    /// Recorded immediately as a terminal per-item failure
    Terminal,
}

impl StageError {
    /// Classify this error for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::RateLimited | StageError::Timeout(_) | StageError::Connection(_) => {
                ErrorKind::Transient
            }
            StageError::Scrape { .. } | StageError::Model(_) | StageError::Index(_)
            | StageError::Malformed(_) => ErrorKind::Terminal,
        }
    }

    /// Stable name for error records and reports.
    pub fn name(&self) -> &'static str {
        match self {
            StageError::Scrape { .. } => "scrape",
            StageError::Model(_) => "model",
            StageError::Index(_) => "index",
            StageError::RateLimited => "rate_limited",
            StageError::Timeout(_) => "timeout",
            StageError::Connection(_) => "connection",
            StageError::Malformed(_) => "malformed",
        }
    }
}

/// Durable store failures.
///
/// These are fatal to the worker that hits them: without the store there is
/// no way to checkpoint, so the orchestrator must surface the loss.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Record failed to serialize or deserialize
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Key or page token was not in the expected shape
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Store backend unreachable
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for pipeline-level operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result alias for per-item stage operations.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Result alias for durable store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

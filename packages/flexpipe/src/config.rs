//! Pipeline configuration, threaded through the controller at construction.
//!
//! No ambient lookups: worker counts, deadlines, and the retry policy all
//! live here, and secrets reach stage bodies as constructor parameters.

use std::sync::Arc;
use std::time::Duration;

use crate::traits::stage::StageBody;
use crate::types::stage::StageName;

/// Bounded retry with exponential backoff for transient per-item errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total stage-body invocations allowed per item (first try included)
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_backoff: Duration,

    /// Backoff multiplier per subsequent retry
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries: every error is terminal on the first failure.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        self.initial_backoff.mul_f64(factor)
    }
}

/// One stage's slot in the descriptor table: name, worker count, body.
#[derive(Clone)]
pub struct StageSpec {
    pub name: StageName,
    pub workers: usize,
    pub body: Arc<dyn StageBody>,
}

impl StageSpec {
    pub fn new(name: StageName, workers: usize, body: Arc<dyn StageBody>) -> Self {
        Self {
            name,
            workers: workers.max(1),
            body,
        }
    }
}

/// Tunables for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Environment tag carried into store keys and stage contexts
    pub environment: String,

    /// Bound on each stage's input queue; also the overlap lead cap
    pub queue_depth: usize,

    /// How long a worker waits on one dequeue before re-polling
    pub dequeue_timeout: Duration,

    /// Consecutive empty polls before an idle worker self-terminates
    pub max_idle_polls: u32,

    /// Per-item stage-body deadline; exceeding it is a per-item error
    pub item_deadline: Duration,

    /// Hard wall-clock ceiling for the whole execution
    pub execution_deadline: Duration,

    /// Retry policy for transient per-item errors
    pub retry: RetryPolicy,

    /// Records per page when listing checkpoints
    pub page_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            queue_depth: 256,
            dequeue_timeout: Duration::from_secs(5),
            max_idle_polls: 60,
            item_deadline: Duration::from_secs(120),
            execution_deadline: Duration::from_secs(2 * 60 * 60),
            retry: RetryPolicy::default(),
            page_size: 500,
        }
    }
}

impl PipelineConfig {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            ..Default::default()
        }
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    pub fn with_max_idle_polls(mut self, polls: u32) -> Self {
        self.max_idle_polls = polls;
        self
    }

    pub fn with_item_deadline(mut self, deadline: Duration) -> Self {
        self.item_deadline = deadline;
        self
    }

    pub fn with_execution_deadline(mut self, deadline: Duration) -> Self {
        self.execution_deadline = deadline;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }
}

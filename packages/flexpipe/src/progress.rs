//! Live progress counters, readable at any point during a run.
//!
//! Counters are observability only. All coordination goes through the
//! queues and the durable store; nothing reads these atomics to make a
//! scheduling decision.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::types::report::{ProgressSnapshot, StageProgress};
use crate::types::stage::StageName;

#[derive(Default)]
struct StageCounters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    in_flight: AtomicU64,
}

/// Shared per-stage counters updated by workers.
pub struct ProgressTracker {
    execution_id: String,
    expected_items: Option<u64>,
    started_at: Instant,
    stages: BTreeMap<StageName, StageCounters>,
}

impl ProgressTracker {
    pub fn new(execution_id: impl Into<String>, stages: &[StageName]) -> Self {
        Self {
            execution_id: execution_id.into(),
            expected_items: None,
            started_at: Instant::now(),
            stages: stages.iter().map(|s| (*s, StageCounters::default())).collect(),
        }
    }

    /// Set once discovery finishes, for the completion estimate.
    pub fn set_expected_items(&mut self, count: u64) {
        self.expected_items = Some(count);
    }

    pub fn item_started(&self, stage: StageName) {
        if let Some(c) = self.stages.get(&stage) {
            c.in_flight.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn item_succeeded(&self, stage: StageName) {
        if let Some(c) = self.stages.get(&stage) {
            c.in_flight.fetch_sub(1, Ordering::Relaxed);
            c.processed.fetch_add(1, Ordering::Relaxed);
            c.succeeded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn item_failed(&self, stage: StageName) {
        if let Some(c) = self.stages.get(&stage) {
            c.in_flight.fetch_sub(1, Ordering::Relaxed);
            c.processed.fetch_add(1, Ordering::Relaxed);
            c.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn item_skipped(&self, stage: StageName) {
        if let Some(c) = self.stages.get(&stage) {
            c.in_flight.fetch_sub(1, Ordering::Relaxed);
            c.processed.fetch_add(1, Ordering::Relaxed);
            c.skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Point-in-time snapshot of all stage counters.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let stages: Vec<StageProgress> = self
            .stages
            .iter()
            .map(|(stage, c)| StageProgress {
                stage: *stage,
                processed: c.processed.load(Ordering::Relaxed),
                succeeded: c.succeeded.load(Ordering::Relaxed),
                failed: c.failed.load(Ordering::Relaxed),
                skipped: c.skipped.load(Ordering::Relaxed),
                in_flight: c.in_flight.load(Ordering::Relaxed),
            })
            .collect();

        let estimated_remaining_secs = self.estimate_remaining(&stages, elapsed);

        ProgressSnapshot {
            execution_id: self.execution_id.clone(),
            stages,
            elapsed_secs: elapsed,
            estimated_remaining_secs,
        }
    }

    // Throughput-based estimate from the final stage's completion count.
    fn estimate_remaining(&self, stages: &[StageProgress], elapsed: f64) -> Option<f64> {
        let expected = self.expected_items?;
        let done = stages.last()?.processed;
        if done == 0 || elapsed <= 0.0 || done >= expected {
            return None;
        }
        let rate = done as f64 / elapsed;
        Some((expected - done) as f64 / rate)
    }
}

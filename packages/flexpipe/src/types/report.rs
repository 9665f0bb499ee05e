//! Stage outcomes, progress snapshots, and the final execution report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::execution::ExecutionStatus;
use crate::types::stage::StageName;

/// Per-worker counters, summed into a stage outcome by the pool.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WorkerTally {
    /// Items dequeued and handled (including checkpoint skips)
    pub processed: u64,

    /// Items that reached a successful checkpoint in this run
    pub succeeded: u64,

    /// Items that reached a failed checkpoint in this run
    pub failed: u64,

    /// Items already checkpointed by a previous run or delivery
    pub skipped: u64,
}

impl WorkerTally {
    pub fn merge(&mut self, other: &WorkerTally) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// Outcome of one stage orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: StageName,
    pub workers: usize,
    pub tally: WorkerTally,
    pub elapsed_secs: f64,
}

impl StageOutcome {
    /// Success rate over items handled in this run, excluding skips.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.tally.succeeded + self.tally.failed;
        if attempted == 0 {
            return 1.0;
        }
        self.tally.succeeded as f64 / attempted as f64
    }
}

/// Live counters for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageProgress {
    pub stage: StageName,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub in_flight: u64,
}

/// Read-only view of a running (or finished) execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub execution_id: String,
    pub stages: Vec<StageProgress>,
    pub elapsed_secs: f64,

    /// Naive completion estimate from current throughput, if computable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_secs: Option<f64>,
}

impl ProgressSnapshot {
    /// Total items that reached any terminal checkpoint so far.
    pub fn total_terminal(&self) -> u64 {
        self.stages.iter().map(|s| s.succeeded + s.failed).sum()
    }
}

/// Final report returned by the controller when a run finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub target: String,
    pub status: ExecutionStatus,

    /// Items discovery produced (after the max-items cap)
    pub discovered: usize,

    pub stage_outcomes: Vec<StageOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,

    /// Names of artifacts written by consolidation
    pub artifacts: Vec<String>,
}

impl ExecutionReport {
    /// Items that reached a successful checkpoint at the final stage.
    pub fn completed_items(&self) -> u64 {
        self.stage_outcomes
            .last()
            .map(|o| o.tally.succeeded + o.tally.skipped)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_ignores_skipped_items() {
        let outcome = StageOutcome {
            stage: StageName::Extraction,
            workers: 4,
            tally: WorkerTally {
                processed: 13,
                succeeded: 7,
                failed: 3,
                skipped: 3,
            },
            elapsed_secs: 1.0,
        };
        assert!((outcome.success_rate() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn success_rate_is_full_when_nothing_attempted() {
        let outcome = StageOutcome {
            stage: StageName::Indexing,
            workers: 1,
            tally: WorkerTally::default(),
            elapsed_secs: 0.1,
        };
        assert_eq!(outcome.success_rate(), 1.0);
    }
}

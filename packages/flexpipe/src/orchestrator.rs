//! Per-stage orchestration: pool lifecycle and completion propagation.
//!
//! One orchestrator owns one stage. It runs the stage's worker pool to
//! completion, then tells the downstream stage that no further input will
//! arrive by enqueueing one sentinel per downstream consumer. Because the
//! pool only exits after every one of its own sentinels has been drawn,
//! the downstream sentinels are guaranteed to trail every forwarded item.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::checkpoint::CheckpointIndex;
use crate::config::{PipelineConfig, StageSpec};
use crate::error::{PipelineError, Result};
use crate::progress::ProgressTracker;
use crate::queue::WorkQueue;
use crate::types::item::WorkItem;
use crate::types::report::StageOutcome;
use crate::worker::{run_pool, StageWorker};

/// Runs one stage's worker pool and signals downstream completion.
pub struct StageOrchestrator {
    spec: StageSpec,
    input: WorkQueue<WorkItem>,

    /// Next stage's input queue; `None` for the final stage
    output: Option<WorkQueue<WorkItem>>,

    /// Workers in the downstream pool; one sentinel each
    downstream_consumers: usize,

    checkpoints: CheckpointIndex,
    progress: Arc<ProgressTracker>,
    config: PipelineConfig,
}

impl StageOrchestrator {
    pub fn new(
        spec: StageSpec,
        input: WorkQueue<WorkItem>,
        output: Option<WorkQueue<WorkItem>>,
        downstream_consumers: usize,
        checkpoints: CheckpointIndex,
        progress: Arc<ProgressTracker>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            spec,
            input,
            output,
            downstream_consumers,
            checkpoints,
            progress,
            config,
        }
    }

    /// Run the pool to completion, then propagate completion downstream.
    pub async fn run(self, execution_id: &str) -> Result<StageOutcome> {
        let started = Instant::now();
        info!(stage = %self.spec.name, workers = self.spec.workers, "stage started");

        let tally = run_pool(self.spec.workers, execution_id, || {
            StageWorker::new(
                self.spec.name,
                self.spec.body.clone(),
                self.input.clone(),
                self.output.clone(),
                self.checkpoints.clone(),
                self.progress.clone(),
                self.config.clone(),
            )
        })
        .await?;

        // Our pool has exited, so every item we will ever forward is
        // already enqueued; the sentinels land behind all of them.
        if let Some(output) = &self.output {
            for _ in 0..self.downstream_consumers {
                output.finish().await.map_err(|_| PipelineError::QueueClosed {
                    stage: self
                        .spec
                        .name
                        .next()
                        .map(|s| s.to_string())
                        .unwrap_or_default(),
                })?;
            }
        }

        let elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            stage = %self.spec.name,
            succeeded = tally.succeeded,
            failed = tally.failed,
            skipped = tally.skipped,
            elapsed_secs,
            "stage finished"
        );

        Ok(StageOutcome {
            stage: self.spec.name,
            workers: self.spec.workers,
            tally,
            elapsed_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::queue::QueueEntry;
    use crate::stores::MemoryStore;
    use crate::testing::{test_item, MockStageBody, StageBehavior};
    use crate::types::stage::StageName;
    use std::time::Duration;

    fn test_config() -> PipelineConfig {
        PipelineConfig::new("test")
            .with_dequeue_timeout(Duration::from_millis(50))
            .with_max_idle_polls(3)
            .with_retry(RetryPolicy::none())
    }

    #[tokio::test]
    async fn drains_input_and_signals_downstream_per_consumer() {
        let checkpoints = CheckpointIndex::new(Arc::new(MemoryStore::new()));
        let progress = Arc::new(ProgressTracker::new("exec_1", &StageName::ALL));
        let input = WorkQueue::bounded(32);
        let output = WorkQueue::bounded(32);

        for i in 0..5 {
            input.enqueue(test_item("exec_1", &format!("p{i}"))).await.unwrap();
        }
        // One sentinel per worker in this stage's pool.
        input.finish().await.unwrap();
        input.finish().await.unwrap();

        let spec = StageSpec::new(StageName::Extraction, 2, Arc::new(MockStageBody::new()));
        let outcome = StageOrchestrator::new(
            spec,
            input,
            Some(output.clone()),
            3,
            checkpoints,
            progress,
            test_config(),
        )
        .run("exec_1")
        .await
        .unwrap();

        assert_eq!(outcome.tally.succeeded, 5);
        assert_eq!(outcome.workers, 2);

        // Five forwarded items, then exactly three sentinels.
        let mut items = 0;
        let mut sentinels = 0;
        while let Some(entry) = output.dequeue(Duration::from_millis(50)).await {
            match entry {
                QueueEntry::Item(_) => {
                    assert_eq!(sentinels, 0, "sentinel arrived before an item");
                    items += 1;
                }
                QueueEntry::Done => {
                    sentinels += 1;
                    if sentinels == 3 {
                        break;
                    }
                }
            }
        }
        assert_eq!(items, 5);
        assert_eq!(sentinels, 3);
    }

    #[tokio::test]
    async fn final_stage_has_no_downstream_to_signal() {
        let checkpoints = CheckpointIndex::new(Arc::new(MemoryStore::new()));
        let progress = Arc::new(ProgressTracker::new("exec_1", &StageName::ALL));
        let input = WorkQueue::bounded(8);

        input.enqueue(test_item("exec_1", "serum")).await.unwrap();
        input.finish().await.unwrap();

        let spec = StageSpec::new(StageName::Indexing, 1, Arc::new(MockStageBody::new()));
        let outcome = StageOrchestrator::new(
            spec,
            input,
            None,
            0,
            checkpoints,
            progress,
            test_config(),
        )
        .run("exec_1")
        .await
        .unwrap();

        assert_eq!(outcome.tally.succeeded, 1);
    }

    #[tokio::test]
    async fn partial_failures_do_not_fail_the_stage() {
        let checkpoints = CheckpointIndex::new(Arc::new(MemoryStore::new()));
        let progress = Arc::new(ProgressTracker::new("exec_1", &StageName::ALL));
        let input = WorkQueue::bounded(32);
        let output = WorkQueue::bounded(32);

        let bad = test_item("exec_1", "broken");
        let body = MockStageBody::new()
            .with_behavior(&bad.item_id, StageBehavior::FailTerminal("bad".into()));

        input.enqueue(test_item("exec_1", "serum")).await.unwrap();
        input.enqueue(bad).await.unwrap();
        input.enqueue(test_item("exec_1", "cream")).await.unwrap();
        input.finish().await.unwrap();

        let spec = StageSpec::new(StageName::Extraction, 1, Arc::new(body));
        let outcome = StageOrchestrator::new(
            spec,
            input,
            Some(output),
            1,
            checkpoints,
            progress,
            test_config(),
        )
        .run("exec_1")
        .await
        .unwrap();

        assert_eq!(outcome.tally.succeeded, 2);
        assert_eq!(outcome.tally.failed, 1);
        assert!((outcome.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }
}

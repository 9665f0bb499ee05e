//! Pipeline controller - discovery, the overlapped stage schedule, and the
//! fatal/non-fatal policy.
//!
//! A run proceeds in three phases:
//! 1. Discovery runs to completion. Zero items is fatal and no stage ever
//!    starts.
//! 2. Every stage orchestrator launches at once; a seeder task feeds the
//!    first queue. Stages overlap: an item can be in classification while
//!    later discoveries of the same run are still being extracted. The
//!    bounded queues cap how far any stage runs ahead.
//! 3. When the final orchestrator exits, consolidation aggregates all
//!    checkpoints into result artifacts.
//!
//! Per-item errors never reach this layer; they end as failed checkpoints
//! inside the workers. What does reach it - store failures, worker panics,
//! the execution deadline - aborts the whole run.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::checkpoint::CheckpointIndex;
use crate::config::{PipelineConfig, StageSpec};
use crate::consolidate::Consolidator;
use crate::error::{PipelineError, Result};
use crate::orchestrator::StageOrchestrator;
use crate::progress::ProgressTracker;
use crate::queue::WorkQueue;
use crate::traits::discovery::Discovery;
use crate::traits::store::DurableStore;
use crate::types::execution::{Execution, ExecutionStatus};
use crate::types::item::WorkItem;
use crate::types::report::{ExecutionReport, ProgressSnapshot, StageOutcome};

/// Owns one pipeline topology and runs executions through it.
pub struct PipelineController {
    config: PipelineConfig,
    store: Arc<dyn DurableStore>,
    discovery: Arc<dyn Discovery>,
    stages: Vec<StageSpec>,
    checkpoints: CheckpointIndex,
    progress: RwLock<Option<Arc<ProgressTracker>>>,
}

impl PipelineController {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn DurableStore>,
        discovery: Arc<dyn Discovery>,
        stages: Vec<StageSpec>,
    ) -> Self {
        let checkpoints = CheckpointIndex::new(store.clone());
        Self {
            config,
            store,
            discovery,
            stages,
            checkpoints,
            progress: RwLock::new(None),
        }
    }

    /// Run one execution end to end under the execution deadline.
    ///
    /// Re-running with the same execution id resumes it: checkpointed items
    /// are skipped and previously stranded items are forwarded from their
    /// stored results.
    pub async fn run(&self, execution: &Execution) -> Result<ExecutionReport> {
        let deadline = self.config.execution_deadline;
        match tokio::time::timeout(deadline, self.run_inner(execution)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(execution_id = %execution.id, ?deadline, "execution deadline exceeded");
                Err(PipelineError::DeadlineExceeded(deadline))
            }
        }
    }

    /// Snapshot of the current (or most recent) run's progress counters.
    pub fn progress(&self) -> Option<ProgressSnapshot> {
        self.progress
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().map(|tracker| tracker.snapshot()))
    }

    async fn run_inner(&self, execution: &Execution) -> Result<ExecutionReport> {
        let started_at = Utc::now();
        let started = Instant::now();
        info!(
            execution_id = %execution.id,
            target = %execution.target,
            environment = %self.config.environment,
            "execution started"
        );

        // Phase 1: discovery, to completion, before any stage starts.
        let items = self.discover(execution).await?;
        let discovered = items.len();
        info!(execution_id = %execution.id, discovered, "discovery finished");

        let mut tracker =
            ProgressTracker::new(&execution.id, &stage_names(&self.stages));
        tracker.set_expected_items(discovered as u64);
        let tracker = Arc::new(tracker);
        if let Ok(mut slot) = self.progress.write() {
            *slot = Some(tracker.clone());
        }

        // Phase 2: all stages at once, chained by bounded queues.
        let stage_outcomes = self.run_stages(execution, items, tracker).await?;

        // Phase 3: aggregate every checkpoint into result artifacts.
        let consolidation = Consolidator::new(self.store.clone(), self.config.page_size)
            .run(&execution.id)
            .await?;

        let finished_at = Utc::now();
        let report = ExecutionReport {
            execution_id: execution.id.clone(),
            target: execution.target.clone(),
            status: ExecutionStatus::Completed,
            discovered,
            stage_outcomes,
            started_at,
            finished_at,
            elapsed_secs: started.elapsed().as_secs_f64(),
            artifacts: consolidation.artifacts,
        };
        info!(
            execution_id = %execution.id,
            completed = report.completed_items(),
            elapsed_secs = report.elapsed_secs,
            "execution finished"
        );
        Ok(report)
    }

    /// Discover, dedup by item id, and enforce the item cap.
    async fn discover(&self, execution: &Execution) -> Result<Vec<WorkItem>> {
        let urls = self
            .discovery
            .discover(&execution.target, execution.max_items)
            .await?;

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for url in urls {
            let item = WorkItem::from_discovery(&execution.id, url);
            if seen.insert(item.item_id.clone()) {
                items.push(item);
            }
        }
        if let Some(max) = execution.max_items {
            items.truncate(max);
        }

        if items.is_empty() {
            return Err(PipelineError::EmptyDiscovery {
                target: execution.target.clone(),
            });
        }
        Ok(items)
    }

    async fn run_stages(
        &self,
        execution: &Execution,
        items: Vec<WorkItem>,
        tracker: Arc<ProgressTracker>,
    ) -> Result<Vec<StageOutcome>> {
        let queues: Vec<WorkQueue<WorkItem>> = self
            .stages
            .iter()
            .map(|_| WorkQueue::bounded(self.config.queue_depth))
            .collect();

        let mut set: JoinSet<(usize, Result<StageOutcome>)> = JoinSet::new();
        for (idx, spec) in self.stages.iter().enumerate() {
            let orchestrator = StageOrchestrator::new(
                spec.clone(),
                queues[idx].clone(),
                queues.get(idx + 1).cloned(),
                self.stages.get(idx + 1).map(|next| next.workers).unwrap_or(0),
                self.checkpoints.clone(),
                tracker.clone(),
                self.config.clone(),
            );
            let execution_id = execution.id.clone();
            set.spawn(async move { (idx, orchestrator.run(&execution_id).await) });
        }

        // The seeder runs beside the pools so first-queue backpressure can
        // drain while later items are still being enqueued.
        let first_queue = queues[0].clone();
        let first_stage_workers = self.stages[0].workers;
        let first_stage = self.stages[0].name.to_string();
        let seeder = tokio::spawn(async move {
            for item in items {
                first_queue.enqueue(item).await.map_err(|_| {
                    PipelineError::QueueClosed {
                        stage: first_stage.clone(),
                    }
                })?;
            }
            for _ in 0..first_stage_workers {
                first_queue.finish().await.map_err(|_| PipelineError::QueueClosed {
                    stage: first_stage.clone(),
                })?;
            }
            Ok::<(), PipelineError>(())
        });

        let mut outcomes: Vec<Option<StageOutcome>> = vec![None; self.stages.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, Ok(outcome))) => outcomes[idx] = Some(outcome),
                Ok((_, Err(error))) => {
                    set.abort_all();
                    seeder.abort();
                    return Err(error);
                }
                Err(join_error) => {
                    set.abort_all();
                    seeder.abort();
                    return Err(PipelineError::WorkerTask(join_error.to_string()));
                }
            }
        }

        match seeder.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => return Err(error),
            Err(join_error) => return Err(PipelineError::WorkerTask(join_error.to_string())),
        }

        Ok(outcomes.into_iter().flatten().collect())
    }
}

fn stage_names(stages: &[StageSpec]) -> Vec<crate::types::stage::StageName> {
    stages.iter().map(|s| s.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::consolidate::{ConsolidationSummary, SUMMARY_JSON};
    use crate::stores::MemoryStore;
    use crate::testing::{MockDiscovery, MockStageBody, StageBehavior};
    use crate::types::item::WorkItem;
    use crate::types::stage::StageName;
    use std::time::Duration;

    fn test_config() -> PipelineConfig {
        PipelineConfig::new("test")
            .with_queue_depth(4)
            .with_dequeue_timeout(Duration::from_millis(50))
            .with_max_idle_polls(5)
            .with_retry(RetryPolicy::none())
            .with_page_size(3)
    }

    fn all_forward_stages() -> (Vec<StageSpec>, Vec<Arc<MockStageBody>>) {
        let bodies: Vec<Arc<MockStageBody>> = StageName::ALL
            .iter()
            .map(|stage| {
                // The final stage terminates items instead of forwarding.
                if stage.next().is_none() {
                    Arc::new(MockStageBody::new().with_default(StageBehavior::Done))
                } else {
                    Arc::new(MockStageBody::new())
                }
            })
            .collect();
        let specs = StageName::ALL
            .iter()
            .zip(&bodies)
            .map(|(stage, body)| StageSpec::new(*stage, 2, body.clone()))
            .collect();
        (specs, bodies)
    }

    fn controller(
        store: Arc<MemoryStore>,
        discovery: MockDiscovery,
        stages: Vec<StageSpec>,
    ) -> PipelineController {
        PipelineController::new(test_config(), store, Arc::new(discovery), stages)
    }

    #[tokio::test]
    async fn runs_all_items_through_every_stage() {
        let store = Arc::new(MemoryStore::new());
        let (stages, bodies) = all_forward_stages();
        let controller = controller(
            store.clone(),
            MockDiscovery::with_products("https://shop.example.com", 6),
            stages,
        );

        let execution = Execution::new("https://shop.example.com", "test");
        let report = controller.run(&execution).await.unwrap();

        assert_eq!(report.status, ExecutionStatus::Completed);
        assert_eq!(report.discovered, 6);
        assert_eq!(report.stage_outcomes.len(), 4);
        for outcome in &report.stage_outcomes {
            assert_eq!(outcome.tally.succeeded, 6, "stage {}", outcome.stage);
        }
        assert_eq!(report.completed_items(), 6);
        for body in &bodies {
            assert_eq!(body.call_count(), 6);
        }
        assert!(!report.artifacts.is_empty());
    }

    #[tokio::test]
    async fn empty_discovery_is_fatal_and_no_stage_runs() {
        let store = Arc::new(MemoryStore::new());
        let (stages, bodies) = all_forward_stages();
        let controller = controller(store, MockDiscovery::new(), stages);

        let execution = Execution::new("https://empty.example.com", "test");
        let error = controller.run(&execution).await.unwrap_err();

        assert!(matches!(error, PipelineError::EmptyDiscovery { .. }));
        for body in &bodies {
            assert_eq!(body.call_count(), 0);
        }
    }

    #[tokio::test]
    async fn per_item_failures_do_not_halt_the_run() {
        let store = Arc::new(MemoryStore::new());
        let (mut stages, _bodies) = all_forward_stages();

        // Three of ten items fail categorization.
        let failing: Vec<String> = (0..3)
            .map(|i| WorkItem::derive_id(&format!("https://shop.example.com/p/product-{i}")))
            .collect();
        let mut body = MockStageBody::new();
        for item_id in &failing {
            body = body.with_behavior(item_id, StageBehavior::FailTerminal("bad".into()));
        }
        stages[1] = StageSpec::new(StageName::Categorization, 2, Arc::new(body));

        let controller = controller(
            store,
            MockDiscovery::with_products("https://shop.example.com", 10),
            stages,
        );
        let execution = Execution::new("https://shop.example.com", "test");
        let report = controller.run(&execution).await.unwrap();

        assert_eq!(report.status, ExecutionStatus::Completed);
        assert_eq!(report.stage_outcomes[0].tally.succeeded, 10);
        assert_eq!(report.stage_outcomes[1].tally.succeeded, 7);
        assert_eq!(report.stage_outcomes[1].tally.failed, 3);
        // Failed items never reach later stages.
        assert_eq!(report.stage_outcomes[2].tally.succeeded, 7);
        assert_eq!(report.stage_outcomes[3].tally.succeeded, 7);
    }

    #[tokio::test]
    async fn slow_first_stage_does_not_strand_downstream_items() {
        let store = Arc::new(MemoryStore::new());
        let (mut stages, bodies) = all_forward_stages();

        // Extraction takes far longer per item than a downstream
        // worker's idle budget (dequeue timeout times max idle polls).
        // Downstream pools must keep polling until their input is
        // sealed instead of idling out with items still upstream.
        let slow = MockStageBody::new().with_delay(Duration::from_millis(150));
        stages[0] = StageSpec::new(StageName::Extraction, 2, Arc::new(slow));

        let controller = controller(
            store,
            MockDiscovery::with_products("https://shop.example.com", 4),
            stages,
        );
        let execution = Execution::new("https://shop.example.com", "test");
        let report = controller.run(&execution).await.unwrap();

        for outcome in &report.stage_outcomes {
            assert_eq!(outcome.tally.succeeded, 4, "stage {}", outcome.stage);
            assert_eq!(outcome.tally.failed, 0, "stage {}", outcome.stage);
        }
        assert_eq!(report.completed_items(), 4);
        assert_eq!(bodies[3].call_count(), 4);
    }

    #[tokio::test]
    async fn mixed_failures_yield_per_stage_success_rates() {
        let store = Arc::new(MemoryStore::new());
        let (mut stages, _) = all_forward_stages();

        // Of three items, one fails extraction and another fails
        // categorization; only the third reaches the end.
        let fails_extraction = WorkItem::derive_id("https://shop.example.com/p/product-2");
        let fails_categorization = WorkItem::derive_id("https://shop.example.com/p/product-1");
        stages[0] = StageSpec::new(
            StageName::Extraction,
            2,
            Arc::new(MockStageBody::new().with_behavior(
                &fails_extraction,
                StageBehavior::FailTerminal("unreadable page".into()),
            )),
        );
        stages[1] = StageSpec::new(
            StageName::Categorization,
            2,
            Arc::new(MockStageBody::new().with_behavior(
                &fails_categorization,
                StageBehavior::FailTerminal("no category fits".into()),
            )),
        );

        let controller = controller(
            store.clone(),
            MockDiscovery::with_products("https://shop.example.com", 3),
            stages,
        );
        let execution = Execution::new("https://shop.example.com", "test");
        let report = controller.run(&execution).await.unwrap();

        assert_eq!(report.stage_outcomes[0].tally.succeeded, 2);
        assert_eq!(report.stage_outcomes[0].tally.failed, 1);
        assert_eq!(report.stage_outcomes[1].tally.succeeded, 1);
        assert_eq!(report.stage_outcomes[1].tally.failed, 1);
        assert_eq!(report.stage_outcomes[2].tally.succeeded, 1);
        assert_eq!(report.stage_outcomes[3].tally.succeeded, 1);
        assert_eq!(report.completed_items(), 1);

        let summary = store
            .get_artifact(&execution.id, SUMMARY_JSON)
            .await
            .unwrap()
            .unwrap();
        let summary: ConsolidationSummary = serde_json::from_slice(&summary).unwrap();
        let extraction = summary
            .stages
            .iter()
            .find(|s| s.stage == StageName::Extraction)
            .unwrap();
        assert!((extraction.success_rate - 2.0 / 3.0).abs() < 1e-9);
        let categorization = summary
            .stages
            .iter()
            .find(|s| s.stage == StageName::Categorization)
            .unwrap();
        assert!((categorization.success_rate - 0.5).abs() < 1e-9);
        assert_eq!(summary.errors.get("model"), Some(&2));
    }

    #[tokio::test]
    async fn rerunning_an_execution_skips_checkpointed_items() {
        let store = Arc::new(MemoryStore::new());
        let execution = Execution::new("https://shop.example.com", "test");

        {
            let (stages, _) = all_forward_stages();
            let controller = controller(
                store.clone(),
                MockDiscovery::with_products("https://shop.example.com", 5),
                stages,
            );
            controller.run(&execution).await.unwrap();
        }

        // Same execution id, fresh bodies: everything is already done.
        let (stages, bodies) = all_forward_stages();
        let controller = controller(
            store,
            MockDiscovery::with_products("https://shop.example.com", 5),
            stages,
        );
        let report = controller.run(&execution).await.unwrap();

        for body in &bodies {
            assert_eq!(body.call_count(), 0);
        }
        for outcome in &report.stage_outcomes {
            assert_eq!(outcome.tally.skipped, 5);
            assert_eq!(outcome.tally.succeeded, 0);
        }
        assert_eq!(report.completed_items(), 5);
    }

    #[tokio::test]
    async fn rerun_retries_only_previously_failed_items() {
        let store = Arc::new(MemoryStore::new());
        let execution = Execution::new("https://shop.example.com", "test");
        let flaky_id = WorkItem::derive_id("https://shop.example.com/p/product-2");

        {
            let (mut stages, _) = all_forward_stages();
            let body = MockStageBody::new()
                .with_behavior(&flaky_id, StageBehavior::FailTerminal("flaky".into()));
            stages[0] = StageSpec::new(StageName::Extraction, 2, Arc::new(body));
            let controller = controller(
                store.clone(),
                MockDiscovery::with_products("https://shop.example.com", 5),
                stages,
            );
            let report = controller.run(&execution).await.unwrap();
            assert_eq!(report.stage_outcomes[0].tally.failed, 1);
        }

        // The failed item has a terminal checkpoint, so the rerun skips it
        // too; a retry would need a new execution id.
        let (stages, bodies) = all_forward_stages();
        let controller = controller(
            store,
            MockDiscovery::with_products("https://shop.example.com", 5),
            stages,
        );
        let report = controller.run(&execution).await.unwrap();
        assert_eq!(bodies[0].call_count(), 0);
        assert_eq!(report.stage_outcomes[0].tally.skipped, 5);
        // Downstream stages only ever saw the four successful items.
        assert_eq!(report.stage_outcomes[1].tally.skipped, 4);
    }

    #[tokio::test]
    async fn duplicate_discoveries_collapse_to_one_item() {
        let store = Arc::new(MemoryStore::new());
        let (stages, bodies) = all_forward_stages();
        let url = crate::types::item::DiscoveredUrl::new(
            "https://shop.example.com/p/serum",
            "Serum",
            "https://shop.example.com",
        );
        let controller = controller(
            store,
            MockDiscovery::with_urls(vec![url.clone(), url.clone(), url]),
            stages,
        );

        let execution = Execution::new("https://shop.example.com", "test");
        let report = controller.run(&execution).await.unwrap();
        assert_eq!(report.discovered, 1);
        assert_eq!(bodies[0].call_count(), 1);
    }

    #[tokio::test]
    async fn max_items_caps_the_seeded_set() {
        let store = Arc::new(MemoryStore::new());
        let (stages, bodies) = all_forward_stages();
        let controller = controller(
            store,
            MockDiscovery::with_products("https://shop.example.com", 20),
            stages,
        );

        let execution =
            Execution::new("https://shop.example.com", "test").with_max_items(5);
        let report = controller.run(&execution).await.unwrap();
        assert_eq!(report.discovered, 5);
        assert_eq!(bodies[0].call_count(), 5);
    }

    #[tokio::test]
    async fn excluded_items_stop_without_reaching_later_stages() {
        let store = Arc::new(MemoryStore::new());
        let (mut stages, bodies) = all_forward_stages();

        // Two items terminate at categorization.
        let excluded: Vec<String> = (0..2)
            .map(|i| WorkItem::derive_id(&format!("https://shop.example.com/p/product-{i}")))
            .collect();
        let mut body = MockStageBody::new();
        for item_id in &excluded {
            body = body.with_behavior(item_id, StageBehavior::Done);
        }
        stages[1] = StageSpec::new(StageName::Categorization, 2, Arc::new(body));

        let controller = controller(
            store,
            MockDiscovery::with_products("https://shop.example.com", 6),
            stages,
        );
        let execution = Execution::new("https://shop.example.com", "test");
        let report = controller.run(&execution).await.unwrap();

        assert_eq!(report.stage_outcomes[1].tally.succeeded, 6);
        assert_eq!(report.stage_outcomes[2].tally.processed, 4);
        assert_eq!(bodies[3].call_count(), 4);
    }

    #[tokio::test]
    async fn small_queue_depth_still_completes() {
        let store = Arc::new(MemoryStore::new());
        let (stages, _) = all_forward_stages();
        let config = test_config().with_queue_depth(1);
        let controller = PipelineController::new(
            config,
            store,
            Arc::new(MockDiscovery::with_products("https://shop.example.com", 12)),
            stages,
        );

        let execution = Execution::new("https://shop.example.com", "test");
        let report = controller.run(&execution).await.unwrap();
        assert_eq!(report.completed_items(), 12);
    }

    #[tokio::test]
    async fn progress_is_observable_after_a_run() {
        let store = Arc::new(MemoryStore::new());
        let (stages, _) = all_forward_stages();
        let controller = controller(
            store,
            MockDiscovery::with_products("https://shop.example.com", 3),
            stages,
        );

        assert!(controller.progress().is_none());
        let execution = Execution::new("https://shop.example.com", "test");
        controller.run(&execution).await.unwrap();

        let snapshot = controller.progress().unwrap();
        assert_eq!(snapshot.execution_id, execution.id);
        assert_eq!(snapshot.total_terminal(), 12);
    }
}

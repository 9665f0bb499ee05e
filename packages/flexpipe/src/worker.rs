//! Stage workers - the loops that drain a stage's input queue.
//!
//! Every worker in a pool competes for the same input queue. For each item
//! it checks the checkpoint index, invokes the stage body under the
//! per-item deadline and retry policy, commits a checkpoint, and forwards
//! the enriched record downstream only when its commit actually created the
//! record. Per-item errors are recorded and the loop keeps polling; only
//! store failures take the worker down.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::checkpoint::{CheckpointIndex, CommitOutcome};
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, PipelineError, Result, StageError};
use crate::progress::ProgressTracker;
use crate::queue::{QueueEntry, WorkQueue};
use crate::traits::stage::{StageBody, StageContext, StageOutput};
use crate::types::checkpoint::CheckpointRecord;
use crate::types::item::WorkItem;
use crate::types::report::WorkerTally;
use crate::types::stage::StageName;

/// One worker loop for one stage.
pub struct StageWorker {
    stage: StageName,
    body: Arc<dyn StageBody>,
    input: WorkQueue<WorkItem>,

    /// Next stage's input queue; `None` for the final stage
    output: Option<WorkQueue<WorkItem>>,

    checkpoints: CheckpointIndex,
    progress: Arc<ProgressTracker>,
    config: PipelineConfig,
}

impl StageWorker {
    pub fn new(
        stage: StageName,
        body: Arc<dyn StageBody>,
        input: WorkQueue<WorkItem>,
        output: Option<WorkQueue<WorkItem>>,
        checkpoints: CheckpointIndex,
        progress: Arc<ProgressTracker>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            stage,
            body,
            input,
            output,
            checkpoints,
            progress,
            config,
        }
    }

    /// Poll the input queue until a completion sentinel arrives (or the
    /// idle limit trips), handling one item at a time.
    pub async fn run(self, execution_id: String) -> Result<WorkerTally> {
        let ctx = StageContext {
            execution_id: execution_id.clone(),
            stage: self.stage,
            environment: self.config.environment.clone(),
        };
        let mut tally = WorkerTally::default();
        let mut idle_polls = 0u32;

        loop {
            match self.input.dequeue(self.config.dequeue_timeout).await {
                Some(QueueEntry::Done) => break,
                None => {
                    // An empty queue before the producer seals it just
                    // means the upstream stage is slow; idle polls only
                    // count toward the exit limit after sealing.
                    if !self.input.is_sealed() {
                        continue;
                    }
                    idle_polls += 1;
                    if idle_polls >= self.config.max_idle_polls {
                        warn!(stage = %self.stage, idle_polls, "worker idle limit reached, exiting");
                        break;
                    }
                }
                Some(QueueEntry::Item(item)) => {
                    idle_polls = 0;
                    self.handle_item(&ctx, item, &mut tally).await?;
                }
            }
        }

        Ok(tally)
    }

    /// Take one item through check-skip, process, commit, forward.
    ///
    /// Per-item errors end up in a failed checkpoint and return `Ok`; the
    /// `Err` path is reserved for store and queue failures, which are fatal.
    async fn handle_item(
        &self,
        ctx: &StageContext,
        item: WorkItem,
        tally: &mut WorkerTally,
    ) -> Result<()> {
        tally.processed += 1;
        self.progress.item_started(self.stage);

        // Redelivered or resumed item: trust the stored outcome.
        if let Some(existing) = self
            .checkpoints
            .find(&item.execution_id, self.stage, &item.item_id)
            .await?
        {
            debug!(stage = %self.stage, item_id = %item.item_id, "checkpoint hit, skipping");
            tally.skipped += 1;
            self.progress.item_skipped(self.stage);
            if existing.is_success() && existing.advanced {
                self.forward_stored(&item, existing).await?;
            }
            return Ok(());
        }

        let entered_at = Utc::now();
        let (outcome, attempts) = self.process_with_retry(ctx, &item).await;

        match outcome {
            Ok(output) => {
                let advances = output.advances() && self.output.is_some();
                let record = CheckpointRecord::succeeded(
                    &item.execution_id,
                    self.stage,
                    &item.item_id,
                    output.into_record(),
                    advances,
                    attempts,
                    entered_at,
                );
                match self.checkpoints.commit(&record).await? {
                    CommitOutcome::Committed => {
                        tally.succeeded += 1;
                        self.progress.item_succeeded(self.stage);
                        if advances {
                            self.forward(WorkItem::from_record(
                                &item.execution_id,
                                &item.item_id,
                                record.record,
                            ))
                            .await?;
                        }
                    }
                    // Another delivery committed first; it owns forwarding.
                    CommitOutcome::Duplicate => {
                        tally.skipped += 1;
                        self.progress.item_skipped(self.stage);
                    }
                }
            }
            Err(error) => {
                warn!(
                    stage = %self.stage,
                    item_id = %item.item_id,
                    attempts,
                    error = %error,
                    "item failed, recording checkpoint"
                );
                let record = CheckpointRecord::failed(
                    &item.execution_id,
                    self.stage,
                    &item.item_id,
                    item.record,
                    &error,
                    attempts,
                    entered_at,
                );
                // Duplicate here just means another delivery already
                // recorded a terminal state; either way the item stops.
                self.checkpoints.commit(&record).await?;
                tally.failed += 1;
                self.progress.item_failed(self.stage);
            }
        }

        Ok(())
    }

    /// Invoke the stage body under the item deadline, retrying transient
    /// errors with backoff. Returns the final outcome and attempt count.
    async fn process_with_retry(
        &self,
        ctx: &StageContext,
        item: &WorkItem,
    ) -> (std::result::Result<StageOutput, StageError>, u32) {
        let retry = &self.config.retry;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let result =
                match tokio::time::timeout(self.config.item_deadline, self.body.process(ctx, item))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StageError::Timeout(self.config.item_deadline)),
                };

            match result {
                Ok(output) => return (Ok(output), attempts),
                Err(error) => {
                    if error.kind() == ErrorKind::Transient && attempts < retry.max_attempts {
                        let delay = retry.delay(attempts);
                        warn!(
                            stage = %self.stage,
                            item_id = %item.item_id,
                            attempt = attempts,
                            error = %error,
                            ?delay,
                            "transient error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return (Err(error), attempts);
                }
            }
        }
    }

    /// Forward a previously checkpointed result, unless the next stage
    /// already has its own checkpoint (so redelivery forwards at most once
    /// into already-covered territory).
    async fn forward_stored(&self, item: &WorkItem, existing: CheckpointRecord) -> Result<()> {
        let Some(next) = self.stage.next() else {
            return Ok(());
        };
        if self.output.is_none() {
            return Ok(());
        }
        if self
            .checkpoints
            .exists(&item.execution_id, next, &item.item_id)
            .await?
        {
            return Ok(());
        }
        self.forward(WorkItem::from_record(
            &item.execution_id,
            &item.item_id,
            existing.record,
        ))
        .await
    }

    async fn forward(&self, item: WorkItem) -> Result<()> {
        let Some(output) = &self.output else {
            return Ok(());
        };
        output.enqueue(item).await.map_err(|_| PipelineError::QueueClosed {
            stage: self
                .stage
                .next()
                .map(|s| s.to_string())
                .unwrap_or_else(|| self.stage.to_string()),
        })
    }
}

/// Run `count` workers against one stage and merge their tallies.
///
/// The first fatal worker error aborts the rest of the pool and propagates.
pub async fn run_pool(
    count: usize,
    execution_id: &str,
    make_worker: impl Fn() -> StageWorker,
) -> Result<WorkerTally> {
    let mut set = JoinSet::new();
    for _ in 0..count.max(1) {
        let worker = make_worker();
        let execution_id = execution_id.to_string();
        set.spawn(async move { worker.run(execution_id).await });
    }

    let mut tally = WorkerTally::default();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(worker_tally)) => tally.merge(&worker_tally),
            Ok(Err(error)) => {
                set.abort_all();
                return Err(error);
            }
            Err(join_error) => {
                set.abort_all();
                return Err(PipelineError::WorkerTask(join_error.to_string()));
            }
        }
    }
    Ok(tally)
}

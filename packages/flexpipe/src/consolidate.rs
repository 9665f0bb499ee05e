//! Consolidation - read-only aggregation of checkpoint records into final
//! artifacts.
//!
//! Runs after the last stage finishes (or standalone against a past
//! execution). Every stage's checkpoints are paged out of the store and
//! merged per item to the furthest stage each item reached, then written
//! back as two CSV tables and a JSON summary. The inputs are immutable
//! checkpoint records and artifact writes are overwrites, so consolidation
//! is idempotent and safe to re-run.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::traits::store::{DurableStore, KeyPrefix, PageRequest};
use crate::types::checkpoint::{CheckpointRecord, CheckpointStatus};
use crate::types::stage::StageName;

/// Names of the artifacts one consolidation writes.
pub const ALL_PRODUCTS_CSV: &str = "all_products.csv";
pub const ELIGIBLE_PRODUCTS_CSV: &str = "eligible_products.csv";
pub const SUMMARY_JSON: &str = "summary.json";

/// Aggregate statistics for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: StageName,
    pub succeeded: usize,
    pub failed: usize,
    pub success_rate: f64,

    /// Median per-item time in the stage, seconds
    pub p50_secs: f64,

    /// 95th percentile per-item time in the stage, seconds
    pub p95_secs: f64,
}

/// The JSON summary artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationSummary {
    pub execution_id: String,

    /// Distinct items that reached any checkpoint
    pub total_items: usize,

    /// Items that reached a terminal success (excluded or fully indexed)
    pub completed_items: usize,

    /// Items judged reimbursable
    pub eligible_items: usize,

    pub stages: Vec<StageSummary>,

    /// Eligibility status distribution over classified items
    pub eligibility: BTreeMap<String, usize>,

    /// Primary category distribution over categorized items
    pub categories: BTreeMap<String, usize>,

    /// Failure distribution by error kind, over items whose furthest
    /// checkpoint is a failure
    #[serde(default)]
    pub errors: BTreeMap<String, usize>,
}

/// What one consolidation produced.
#[derive(Debug, Clone)]
pub struct Consolidation {
    pub summary: ConsolidationSummary,

    /// Artifact names written to the store
    pub artifacts: Vec<String>,
}

/// Builds the final artifacts for one execution.
pub struct Consolidator {
    store: Arc<dyn DurableStore>,
    page_size: usize,
}

impl Consolidator {
    pub fn new(store: Arc<dyn DurableStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Aggregate all of an execution's checkpoints and write the artifacts.
    pub async fn run(&self, execution_id: &str) -> Result<Consolidation> {
        let (merged, per_stage) = self.collect(execution_id).await?;
        let summary = build_summary(execution_id, &merged, &per_stage);
        let all_csv = render_all_products(&merged)?;
        let eligible_csv = render_eligible_products(&merged)?;
        let summary_json = serde_json::to_vec_pretty(&summary)
            .map_err(|e| PipelineError::Consolidation(e.to_string()))?;

        self.store
            .put_artifact(execution_id, ALL_PRODUCTS_CSV, &all_csv)
            .await?;
        self.store
            .put_artifact(execution_id, ELIGIBLE_PRODUCTS_CSV, &eligible_csv)
            .await?;
        self.store
            .put_artifact(execution_id, SUMMARY_JSON, &summary_json)
            .await?;

        info!(
            execution_id,
            total_items = summary.total_items,
            completed_items = summary.completed_items,
            eligible_items = summary.eligible_items,
            "consolidation finished"
        );

        Ok(Consolidation {
            summary,
            artifacts: vec![
                ALL_PRODUCTS_CSV.to_string(),
                ELIGIBLE_PRODUCTS_CSV.to_string(),
                SUMMARY_JSON.to_string(),
            ],
        })
    }

    /// Build the summary without writing any artifacts.
    ///
    /// Used to inspect an execution that has not been consolidated yet
    /// (or is still running).
    pub async fn snapshot(&self, execution_id: &str) -> Result<ConsolidationSummary> {
        let (merged, per_stage) = self.collect(execution_id).await?;
        Ok(build_summary(execution_id, &merged, &per_stage))
    }

    /// Page out every stage's checkpoints, merging each item to the
    /// furthest record it reached.
    ///
    /// Stage order matters: later stages overwrite earlier ones in the
    /// merged map.
    async fn collect(
        &self,
        execution_id: &str,
    ) -> Result<(
        BTreeMap<String, CheckpointRecord>,
        BTreeMap<StageName, Vec<CheckpointRecord>>,
    )> {
        let mut merged: BTreeMap<String, CheckpointRecord> = BTreeMap::new();
        let mut per_stage: BTreeMap<StageName, Vec<CheckpointRecord>> = BTreeMap::new();

        for stage in StageName::ALL {
            let records = self.load_stage(execution_id, stage).await?;
            for record in &records {
                merged.insert(record.item_id.clone(), record.clone());
            }
            per_stage.insert(stage, records);
        }
        Ok((merged, per_stage))
    }

    /// Page through every checkpoint of one stage.
    async fn load_stage(
        &self,
        execution_id: &str,
        stage: StageName,
    ) -> Result<Vec<CheckpointRecord>> {
        let prefix = KeyPrefix::new(execution_id, stage);
        let mut records = Vec::new();
        let mut page = PageRequest::first(self.page_size);

        loop {
            let listed = self.store.list(&prefix, page).await?;
            records.extend(listed.records);
            match listed.next_token {
                Some(token) => page = PageRequest::after(token, self.page_size),
                None => break,
            }
        }
        Ok(records)
    }
}

fn build_summary(
    execution_id: &str,
    merged: &BTreeMap<String, CheckpointRecord>,
    per_stage: &BTreeMap<StageName, Vec<CheckpointRecord>>,
) -> ConsolidationSummary {
    let stages = per_stage
        .iter()
        .map(|(stage, records)| {
            let succeeded = records.iter().filter(|r| r.is_success()).count();
            let failed = records.len() - succeeded;
            let mut durations: Vec<f64> = records
                .iter()
                .map(|r| r.duration().num_milliseconds() as f64 / 1000.0)
                .collect();
            durations.sort_by(|a, b| a.total_cmp(b));
            StageSummary {
                stage: *stage,
                succeeded,
                failed,
                success_rate: if records.is_empty() {
                    1.0
                } else {
                    succeeded as f64 / records.len() as f64
                },
                p50_secs: percentile(&durations, 50.0),
                p95_secs: percentile(&durations, 95.0),
            }
        })
        .collect();

    let mut eligibility: BTreeMap<String, usize> = BTreeMap::new();
    let mut categories: BTreeMap<String, usize> = BTreeMap::new();
    let mut errors: BTreeMap<String, usize> = BTreeMap::new();
    let mut completed_items = 0;
    let mut eligible_items = 0;

    for record in merged.values() {
        if record.is_success() && !record.advanced {
            completed_items += 1;
        }
        if let Some(error) = &record.error {
            *errors.entry(error.kind.clone()).or_insert(0) += 1;
        }
        if let Some(classification) = &record.record.classification {
            *eligibility
                .entry(classification.status.as_str().to_string())
                .or_insert(0) += 1;
            if classification.status.is_eligible() {
                eligible_items += 1;
            }
        }
        if let Some(categorization) = &record.record.categorization {
            *categories
                .entry(categorization.primary_category.clone())
                .or_insert(0) += 1;
        }
    }

    ConsolidationSummary {
        execution_id: execution_id.to_string(),
        total_items: merged.len(),
        completed_items,
        eligible_items,
        stages,
        eligibility,
        categories,
        errors,
    }
}

/// Percentile over an ascending-sorted slice (nearest-rank).
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

/// Disposition of an item in the full table.
fn item_state(record: &CheckpointRecord) -> &'static str {
    match (record.status, record.advanced) {
        (CheckpointStatus::Failed, _) => "failed",
        (CheckpointStatus::Succeeded, false) => "completed",
        // Checkpointed as advanced but no later record: stranded mid-run.
        (CheckpointStatus::Succeeded, true) => "in_progress",
    }
}

fn render_all_products(merged: &BTreeMap<String, CheckpointRecord>) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "item_id",
            "url",
            "name",
            "price",
            "brand",
            "primary_category",
            "likelihood",
            "priority",
            "eligibility_status",
            "rationale",
            "furthest_stage",
            "state",
            "error",
        ])
        .map_err(|e| PipelineError::Consolidation(e.to_string()))?;

    for record in merged.values() {
        let product = &record.record;
        let extraction = product.extraction.as_ref();
        let categorization = product.categorization.as_ref();
        let classification = product.classification.as_ref();
        writer
            .write_record([
                record.item_id.as_str(),
                product.url.as_str(),
                product.name(),
                extraction.map(|e| e.price.as_str()).unwrap_or(""),
                extraction.map(|e| e.brand.as_str()).unwrap_or(""),
                categorization
                    .map(|c| c.primary_category.as_str())
                    .unwrap_or(""),
                categorization
                    .map(|c| c.likelihood.as_str())
                    .unwrap_or(""),
                categorization
                    .map(|c| c.priority.to_string())
                    .unwrap_or_default()
                    .as_str(),
                classification.map(|c| c.status.as_str()).unwrap_or(""),
                classification.map(|c| c.rationale.as_str()).unwrap_or(""),
                record.stage.as_str(),
                item_state(record),
                record
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or(""),
            ])
            .map_err(|e| PipelineError::Consolidation(e.to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|e| PipelineError::Consolidation(e.to_string()))
}

fn render_eligible_products(merged: &BTreeMap<String, CheckpointRecord>) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "item_id",
            "name",
            "url",
            "price",
            "brand",
            "primary_category",
            "eligibility_status",
            "rationale",
        ])
        .map_err(|e| PipelineError::Consolidation(e.to_string()))?;

    for record in merged.values() {
        let product = &record.record;
        let Some(classification) = product.classification.as_ref() else {
            continue;
        };
        if !classification.status.is_eligible() {
            continue;
        }
        let extraction = product.extraction.as_ref();
        writer
            .write_record([
                record.item_id.as_str(),
                product.name(),
                product.url.as_str(),
                extraction.map(|e| e.price.as_str()).unwrap_or(""),
                extraction.map(|e| e.brand.as_str()).unwrap_or(""),
                product
                    .categorization
                    .as_ref()
                    .map(|c| c.primary_category.as_str())
                    .unwrap_or(""),
                classification.status.as_str(),
                classification.rationale.as_str(),
            ])
            .map_err(|e| PipelineError::Consolidation(e.to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|e| PipelineError::Consolidation(e.to_string()))
}

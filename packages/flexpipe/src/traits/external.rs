//! External service seams consumed by the reference stage bodies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StageResult;
use crate::types::item::{EligibilityFields, ExtractedFields};

/// A scraped product page: structured fields plus the raw page text.
#[derive(Debug, Clone, Default)]
pub struct ScrapedPage {
    /// Whatever structured fields the scraper could pull out
    pub fields: ExtractedFields,

    /// Page body as markdown/plain text, used to pad thin descriptions
    pub markdown: String,
}

/// Fetches and parses one product page.
#[async_trait]
pub trait PageScraper: Send + Sync {
    async fn scrape(&self, url: &str) -> StageResult<ScrapedPage>;
}

/// Input to the eligibility model for one product.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationRequest {
    pub name: String,
    pub description: String,
    pub category: String,
}

/// Judges reimbursement eligibility for one product.
///
/// Implementations wrap an LLM or a rules service; the mock in
/// `flexpipe::testing` returns canned judgments.
#[async_trait]
pub trait EligibilityModel: Send + Sync {
    async fn classify(&self, request: &ClassificationRequest) -> StageResult<EligibilityFields>;
}

/// Produces an embedding vector for a piece of text.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> StageResult<Vec<f32>>;
}

/// One document for the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDoc {
    pub id: String,
    pub vector: Vec<f32>,
    pub attributes: serde_json::Value,
}

/// Upserts documents into a vector index namespace.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, namespace: &str, docs: &[IndexDoc]) -> StageResult<()>;
}

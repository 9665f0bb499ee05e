//! Reference stage bodies for the product-enrichment pipeline.
//!
//! Each stage implements [`crate::traits::StageBody`] over a trait seam to
//! its external service, so any of them can be swapped for a different
//! implementation (or a mock) without touching the engine:
//! - [`discovery::LinkDiscovery`] - seed-page link harvesting (not a stage
//!   body; runs before the stages)
//! - [`extract::ExtractStage`] - page scraping and description assembly
//! - [`categorize::CategorizeStage`] - keyword-rule categorization, no
//!   external calls
//! - [`classify::ClassifyStage`] - model-backed eligibility judgment
//! - [`index::IndexStage`] - embedding and vector-index upload

pub mod categorize;
pub mod classify;
pub mod discovery;
pub mod extract;
pub mod index;

pub use categorize::CategorizeStage;
pub use classify::{ClassifyStage, OpenAiModel};
pub use discovery::LinkDiscovery;
pub use extract::{ExtractStage, HttpScraper};
pub use index::{HttpVectorIndex, IndexStage, OpenAiEmbedder};

use std::sync::Arc;

use crate::config::StageSpec;
use crate::traits::external::{Embedder, EligibilityModel, PageScraper, VectorIndex};
use crate::types::stage::StageName;

/// Default worker counts per stage, sized to each stage's bottleneck:
/// extraction and classification wait on external services, categorization
/// is pure CPU, indexing batches uploads.
pub const EXTRACTION_WORKERS: usize = 30;
pub const CATEGORIZATION_WORKERS: usize = 50;
pub const CLASSIFICATION_WORKERS: usize = 15;
pub const INDEXING_WORKERS: usize = 10;

/// Wire the four reference stages into a descriptor table with default
/// worker counts.
pub fn standard_stages(
    scraper: Arc<dyn PageScraper>,
    model: Arc<dyn EligibilityModel>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    namespace: impl Into<String>,
) -> Vec<StageSpec> {
    vec![
        StageSpec::new(
            StageName::Extraction,
            EXTRACTION_WORKERS,
            Arc::new(ExtractStage::new(scraper)),
        ),
        StageSpec::new(
            StageName::Categorization,
            CATEGORIZATION_WORKERS,
            Arc::new(CategorizeStage::new()),
        ),
        StageSpec::new(
            StageName::Classification,
            CLASSIFICATION_WORKERS,
            Arc::new(ClassifyStage::new(model)),
        ),
        StageSpec::new(
            StageName::Indexing,
            INDEXING_WORKERS,
            Arc::new(IndexStage::new(embedder, index, namespace)),
        ),
    ]
}

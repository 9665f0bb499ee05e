//! Trait seams between the orchestration core and its collaborators.
//!
//! The engine only ever talks to the outside world through these traits:
//! - [`store::DurableStore`] - checkpoint and artifact persistence
//! - [`stage::StageBody`] - the per-stage enrichment function
//! - [`discovery::Discovery`] - the initial item source
//! - [`external`] - page scraping, the eligibility model, embeddings, and
//!   the vector index consumed by the reference stage bodies

pub mod discovery;
pub mod external;
pub mod stage;
pub mod store;

pub use discovery::Discovery;
pub use external::{
    ClassificationRequest, Embedder, EligibilityModel, IndexDoc, PageScraper, ScrapedPage,
    VectorIndex,
};
pub use stage::{StageBody, StageContext, StageOutput};
pub use store::{DurableStore, KeyPrefix, ListPage, PageRequest, PutOutcome, StoreKey};

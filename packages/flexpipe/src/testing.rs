//! Call-tracking mocks for the engine's trait seams.
//!
//! Every mock records the calls it received behind a mutex so tests can
//! assert on invocation counts and ordering as well as outcomes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Result, StageError, StageResult};
use crate::traits::discovery::Discovery;
use crate::traits::external::{
    ClassificationRequest, Embedder, EligibilityModel, IndexDoc, PageScraper, ScrapedPage,
    VectorIndex,
};
use crate::traits::stage::{StageBody, StageContext, StageOutput};
use crate::types::item::{
    DiscoveredUrl, EligibilityFields, EligibilityStatus, ExtractedFields, WorkItem,
};

/// How a [`MockStageBody`] treats an item.
#[derive(Debug, Clone)]
pub enum StageBehavior {
    /// Return `StageOutput::Forward` with the record unchanged.
    Forward,

    /// Return `StageOutput::Done` with the record unchanged.
    Done,

    /// Fail immediately with a terminal error.
    FailTerminal(String),

    /// Fail every attempt with a transient error.
    FailTransient,

    /// Fail transiently until attempt `n`, then forward.
    SucceedAfter(u32),
}

/// Stage body with per-item scripted behavior and call tracking.
#[derive(Default)]
pub struct MockStageBody {
    default: Option<StageBehavior>,
    overrides: HashMap<String, StageBehavior>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl MockStageBody {
    /// Forward every item unless told otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the behavior for one item id.
    pub fn with_behavior(mut self, item_id: impl Into<String>, behavior: StageBehavior) -> Self {
        self.overrides.insert(item_id.into(), behavior);
        self
    }

    /// Change the behavior applied to unscripted items.
    pub fn with_default(mut self, behavior: StageBehavior) -> Self {
        self.default = Some(behavior);
        self
    }

    /// Sleep this long before every invocation, to simulate a slow stage.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Item ids this body was invoked with, in order (retries included).
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl StageBody for MockStageBody {
    async fn process(&self, _ctx: &StageContext, item: &WorkItem) -> StageResult<StageOutput> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(item.item_id.clone());
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let counter = attempts.entry(item.item_id.clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        let behavior = self
            .overrides
            .get(&item.item_id)
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or(StageBehavior::Forward);

        match behavior {
            StageBehavior::Forward => Ok(StageOutput::Forward(item.record.clone())),
            StageBehavior::Done => Ok(StageOutput::Done(item.record.clone())),
            StageBehavior::FailTerminal(message) => Err(StageError::Model(message)),
            StageBehavior::FailTransient => Err(StageError::RateLimited),
            StageBehavior::SucceedAfter(n) => {
                if attempt >= n {
                    Ok(StageOutput::Forward(item.record.clone()))
                } else {
                    Err(StageError::RateLimited)
                }
            }
        }
    }
}

/// Discovery returning a canned URL list.
#[derive(Default)]
pub struct MockDiscovery {
    urls: Vec<DiscoveredUrl>,
    calls: Mutex<Vec<String>>,
}

impl MockDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with `count` distinct product URLs under `base`.
    pub fn with_products(base: &str, count: usize) -> Self {
        let urls = (0..count)
            .map(|i| {
                DiscoveredUrl::new(format!("{base}/p/product-{i}"), format!("Product {i}"), base)
            })
            .collect();
        Self {
            urls,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_urls(urls: Vec<DiscoveredUrl>) -> Self {
        Self {
            urls,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Targets this discovery was invoked with.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Discovery for MockDiscovery {
    async fn discover(
        &self,
        target: &str,
        max_items: Option<usize>,
    ) -> Result<Vec<DiscoveredUrl>> {
        self.calls.lock().unwrap().push(target.to_string());
        let mut urls = self.urls.clone();
        if let Some(max) = max_items {
            urls.truncate(max);
        }
        Ok(urls)
    }
}

/// Scraper returning synthetic structured fields derived from the URL.
#[derive(Default)]
pub struct MockScraper {
    fail_on: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl MockScraper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail scrapes of URLs containing this fragment.
    pub fn failing_on(mut self, url_fragment: impl Into<String>) -> Self {
        self.fail_on.push(url_fragment.into());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageScraper for MockScraper {
    async fn scrape(&self, url: &str) -> StageResult<ScrapedPage> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.fail_on.iter().any(|fragment| url.contains(fragment)) {
            return Err(StageError::Scrape {
                url: url.to_string(),
                message: "mock scrape failure".into(),
            });
        }
        let slug = url.rsplit('/').next().unwrap_or("product").to_string();
        Ok(ScrapedPage {
            fields: ExtractedFields {
                name: slug.replace('-', " "),
                description: format!("Mock description for {slug}"),
                price: "$9.99".into(),
                brand: "MockBrand".into(),
                ..Default::default()
            },
            markdown: format!("# {slug}\n\nMock page body."),
        })
    }
}

/// Eligibility model with per-product canned judgments.
#[derive(Default)]
pub struct MockModel {
    judgments: HashMap<String, EligibilityStatus>,
    default_status: Option<EligibilityStatus>,
    rate_limit_first: u32,
    calls: Mutex<Vec<ClassificationRequest>>,
    call_counter: Mutex<u32>,
}

impl MockModel {
    /// Classify everything as eligible.
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned judgment for products whose name matches exactly.
    pub fn with_judgment(mut self, name: impl Into<String>, status: EligibilityStatus) -> Self {
        self.judgments.insert(name.into(), status);
        self
    }

    pub fn with_default_status(mut self, status: EligibilityStatus) -> Self {
        self.default_status = Some(status);
        self
    }

    /// Rate-limit the first `n` calls, for retry tests.
    pub fn rate_limiting_first(mut self, n: u32) -> Self {
        self.rate_limit_first = n;
        self
    }

    pub fn calls(&self) -> Vec<ClassificationRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl EligibilityModel for MockModel {
    async fn classify(&self, request: &ClassificationRequest) -> StageResult<EligibilityFields> {
        self.calls.lock().unwrap().push(request.clone());
        let call = {
            let mut counter = self.call_counter.lock().unwrap();
            *counter += 1;
            *counter
        };
        if call <= self.rate_limit_first {
            return Err(StageError::RateLimited);
        }
        let status = self
            .judgments
            .get(&request.name)
            .copied()
            .or(self.default_status)
            .unwrap_or(EligibilityStatus::Eligible);
        Ok(EligibilityFields {
            status,
            rationale: format!("mock judgment for {}", request.name),
        })
    }
}

/// Deterministic embedder: vector derived from the text bytes.
#[derive(Default)]
pub struct MockEmbedder {
    calls: Mutex<Vec<String>>,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> StageResult<Vec<f32>> {
        self.calls.lock().unwrap().push(text.to_string());
        // Same text, same vector; different text, almost surely different.
        let sum: u32 = text.bytes().map(u32::from).sum();
        Ok((0..8).map(|i| ((sum + i) % 997) as f32 / 997.0).collect())
    }
}

/// Vector index that records every upserted document.
#[derive(Default)]
pub struct MockIndex {
    docs: Mutex<Vec<(String, IndexDoc)>>,
    fail_on: Vec<String>,
}

impl MockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail upserts of documents with this id.
    pub fn failing_on(mut self, doc_id: impl Into<String>) -> Self {
        self.fail_on.push(doc_id.into());
        self
    }

    /// All upserted documents as (namespace, doc) pairs.
    pub fn upserted(&self) -> Vec<(String, IndexDoc)> {
        self.docs.lock().unwrap().clone()
    }

    pub fn doc_count(&self) -> usize {
        self.docs.lock().unwrap().len()
    }
}

#[async_trait]
impl VectorIndex for MockIndex {
    async fn upsert(&self, namespace: &str, docs: &[IndexDoc]) -> StageResult<()> {
        for doc in docs {
            if self.fail_on.contains(&doc.id) {
                return Err(StageError::Index(format!("mock upsert failure for {}", doc.id)));
            }
        }
        let mut stored = self.docs.lock().unwrap();
        for doc in docs {
            stored.push((namespace.to_string(), doc.clone()));
        }
        Ok(())
    }
}

/// Stage body that fails every item with a given terminal error message.
pub struct FailingStageBody {
    message: String,
}

impl FailingStageBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl StageBody for FailingStageBody {
    async fn process(&self, _ctx: &StageContext, _item: &WorkItem) -> StageResult<StageOutput> {
        Err(StageError::Model(self.message.clone()))
    }
}

/// Build a work item for tests without going through discovery.
pub fn test_item(execution_id: &str, slug: &str) -> WorkItem {
    WorkItem::from_discovery(
        execution_id,
        DiscoveredUrl::new(
            format!("https://shop.example.com/p/{slug}"),
            slug,
            "https://shop.example.com",
        ),
    )
}

/// Build a succeeded checkpoint for tests.
pub fn test_checkpoint(
    execution_id: &str,
    stage: crate::types::stage::StageName,
    item: &WorkItem,
    advanced: bool,
) -> crate::types::checkpoint::CheckpointRecord {
    crate::types::checkpoint::CheckpointRecord::succeeded(
        execution_id,
        stage,
        &item.item_id,
        item.record.clone(),
        advanced,
        1,
        Utc::now(),
    )
}

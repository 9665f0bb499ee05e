//! Indexing stage - embed the enriched product and upsert it into the
//! vector index. The final stage: items terminate here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{StageError, StageResult};
use crate::security::{ModelCredentials, SecretString};
use crate::traits::external::{Embedder, IndexDoc, VectorIndex};
use crate::traits::stage::{StageBody, StageContext, StageOutput};
use crate::types::item::{IndexFields, ProductRecord, WorkItem};

/// Stage body that uploads one document per product.
pub struct IndexStage {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    namespace: String,
}

impl IndexStage {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl StageBody for IndexStage {
    async fn process(&self, _ctx: &StageContext, item: &WorkItem) -> StageResult<StageOutput> {
        let text = embedding_text(&item.record);
        let vector = self.embedder.embed(&text).await?;

        let doc = IndexDoc {
            id: item.item_id.clone(),
            vector,
            attributes: document_attributes(&item.record),
        };
        // Upsert keyed by item id, so redelivery overwrites in place.
        self.index.upsert(&self.namespace, &[doc]).await?;
        debug!(item_id = %item.item_id, namespace = %self.namespace, "indexed product");

        let fields = IndexFields {
            vector_id: item.item_id.clone(),
            namespace: self.namespace.clone(),
            uploaded_at: Utc::now(),
        };
        Ok(StageOutput::Done(item.record.clone().with_indexing(fields)))
    }
}

/// Text the embedding is computed over: everything a search query might
/// mention about the product.
fn embedding_text(record: &ProductRecord) -> String {
    let mut parts = vec![record.name().to_string()];
    if let Some(extraction) = &record.extraction {
        if !extraction.description.is_empty() {
            parts.push(extraction.description.clone());
        }
        if !extraction.brand.is_empty() {
            parts.push(format!("Brand: {}", extraction.brand));
        }
    }
    if let Some(categorization) = &record.categorization {
        parts.push(format!("Category: {}", categorization.primary_category));
    }
    if let Some(classification) = &record.classification {
        parts.push(format!("Eligibility: {}", classification.status.as_str()));
    }
    parts.join("\n")
}

fn document_attributes(record: &ProductRecord) -> serde_json::Value {
    json!({
        "name": record.name(),
        "url": record.url,
        "price": record.extraction.as_ref().map(|e| e.price.as_str()).unwrap_or(""),
        "brand": record.extraction.as_ref().map(|e| e.brand.as_str()).unwrap_or(""),
        "category": record
            .categorization
            .as_ref()
            .map(|c| c.primary_category.as_str())
            .unwrap_or(""),
        "eligibility_status": record
            .classification
            .as_ref()
            .map(|c| c.status.as_str())
            .unwrap_or(""),
        "rationale": record
            .classification
            .as_ref()
            .map(|c| c.rationale.as_str())
            .unwrap_or(""),
    })
}

/// [`Embedder`] backed by an OpenAI-compatible embeddings API.
pub struct OpenAiEmbedder {
    http: reqwest::Client,
    credentials: ModelCredentials,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(credentials: ModelCredentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
        }
    }

    fn endpoint(&self) -> String {
        let base = self
            .credentials
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        format!("{}/embeddings", base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> StageResult<Vec<f32>> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(self.credentials.api_key.expose())
            .json(&json!({ "model": self.credentials.model, "input": text }))
            .send()
            .await
            .map_err(|e| StageError::Connection(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(StageError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(StageError::Index(format!(
                "embeddings API returned {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| StageError::Index(format!("malformed embeddings response: {e}")))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| StageError::Index("embeddings response was empty".into()))
    }
}

/// [`VectorIndex`] speaking a turbopuffer-style HTTP upsert API.
pub struct HttpVectorIndex {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl HttpVectorIndex {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: SecretString::new(api_key),
        }
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn upsert(&self, namespace: &str, docs: &[IndexDoc]) -> StageResult<()> {
        let upserts: Vec<_> = docs
            .iter()
            .map(|doc| {
                json!({
                    "id": doc.id,
                    "vector": doc.vector,
                    "attributes": doc.attributes,
                })
            })
            .collect();
        let url = format!(
            "{}/v1/namespaces/{namespace}",
            self.base_url.trim_end_matches('/')
        );

        let response = self
            .http
            .post(url)
            .bearer_auth(self.api_key.expose())
            .json(&json!({ "upserts": upserts }))
            .send()
            .await
            .map_err(|e| StageError::Connection(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(StageError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(StageError::Index(format!(
                "vector index returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

//! Classification stage - model-backed eligibility judgment.
//!
//! The only stage that pays per call, so it sits behind the categorizer's
//! filter and its own rate limiter. The model seam is
//! [`EligibilityModel`]; [`OpenAiModel`] is the HTTP implementation.

use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{StageError, StageResult};
use crate::security::ModelCredentials;
use crate::stages::categorize::SKIP_CLASSIFICATION_PRIORITY;
use crate::traits::external::{ClassificationRequest, EligibilityModel};
use crate::traits::stage::{StageBody, StageContext, StageOutput};
use crate::types::item::{EligibilityFields, EligibilityStatus, WorkItem};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Keep stored rationales from ballooning checkpoint records.
const RATIONALE_MAX_LEN: usize = 1000;

/// Stage body that asks the eligibility model about each product.
pub struct ClassifyStage {
    model: Arc<dyn EligibilityModel>,
    limiter: Option<Arc<DirectRateLimiter>>,
}

impl ClassifyStage {
    pub fn new(model: Arc<dyn EligibilityModel>) -> Self {
        Self {
            model,
            limiter: None,
        }
    }

    /// Cap outbound model calls across all workers sharing this stage.
    pub fn with_rate_limit(mut self, requests_per_second: NonZeroU32) -> Self {
        let quota = Quota::per_second(requests_per_second);
        self.limiter = Some(Arc::new(RateLimiter::direct(quota)));
        self
    }
}

#[async_trait]
impl StageBody for ClassifyStage {
    async fn process(&self, _ctx: &StageContext, item: &WorkItem) -> StageResult<StageOutput> {
        // Excluded products normally never reach this queue; if one does,
        // terminate it here rather than spend a model call.
        if let Some(categorization) = &item.record.categorization {
            if categorization.priority >= SKIP_CLASSIFICATION_PRIORITY {
                return Ok(StageOutput::Done(item.record.clone()));
            }
        }

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let request = ClassificationRequest {
            name: item.record.name().to_string(),
            description: item
                .record
                .extraction
                .as_ref()
                .map(|e| e.description.clone())
                .unwrap_or_default(),
            category: item
                .record
                .categorization
                .as_ref()
                .map(|c| c.primary_category.clone())
                .unwrap_or_default(),
        };

        let mut fields = self.model.classify(&request).await?;
        if fields.rationale.len() > RATIONALE_MAX_LEN {
            let mut cut = RATIONALE_MAX_LEN;
            while !fields.rationale.is_char_boundary(cut) {
                cut -= 1;
            }
            fields.rationale.truncate(cut);
        }
        debug!(
            item_id = %item.item_id,
            status = fields.status.as_str(),
            "classified product"
        );

        Ok(StageOutput::Forward(
            item.record.clone().with_classification(fields),
        ))
    }
}

/// Eligibility model backed by an OpenAI-compatible chat completions API.
pub struct OpenAiModel {
    http: reqwest::Client,
    credentials: ModelCredentials,
    system_prompt: String,
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct Judgment {
    #[serde(rename = "eligibilityStatus")]
    eligibility_status: String,
    #[serde(default)]
    explanation: String,
    #[serde(default, rename = "additionalConsiderations")]
    additional_considerations: String,
}

impl OpenAiModel {
    pub fn new(credentials: ModelCredentials, system_prompt: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            system_prompt: system_prompt.into(),
        }
    }

    fn endpoint(&self) -> String {
        let base = self
            .credentials
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL);
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }
}

#[async_trait]
impl EligibilityModel for OpenAiModel {
    async fn classify(&self, request: &ClassificationRequest) -> StageResult<EligibilityFields> {
        let context = format!(
            "Product: {}\nCategory: {}\nDescription: {}",
            request.name, request.category, request.description
        );
        let body = json!({
            "model": self.credentials.model,
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": context},
            ],
            "temperature": 0.1,
            "max_tokens": 800,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(self.credentials.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| StageError::Connection(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(StageError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(StageError::Model(format!(
                "model API returned {}",
                response.status()
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| StageError::Model(format!("malformed chat response: {e}")))?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| StageError::Model("chat response had no choices".into()))?;
        let judgment: Judgment = serde_json::from_str(content)
            .map_err(|e| StageError::Model(format!("malformed judgment JSON: {e}")))?;

        let mut rationale = judgment.explanation;
        if !judgment.additional_considerations.is_empty() {
            rationale.push_str(" | ");
            rationale.push_str(&judgment.additional_considerations);
        }

        Ok(EligibilityFields {
            status: parse_status(&judgment.eligibility_status)?,
            rationale,
        })
    }
}

fn parse_status(raw: &str) -> StageResult<EligibilityStatus> {
    match raw.trim().to_lowercase().as_str() {
        "eligible" => Ok(EligibilityStatus::Eligible),
        "not_eligible" | "not eligible" | "ineligible" => Ok(EligibilityStatus::NotEligible),
        "prescription_required" | "prescription required" => {
            Ok(EligibilityStatus::PrescriptionRequired)
        }
        "unclear" | "unknown" => Ok(EligibilityStatus::Unclear),
        other => Err(StageError::Model(format!(
            "unrecognized eligibility status: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_item, MockModel};
    use crate::types::item::{CategoryFields, EligibilityLikelihood, ExtractedFields};
    use crate::types::stage::StageName;

    fn ctx() -> StageContext {
        StageContext {
            execution_id: "exec_1".into(),
            stage: StageName::Classification,
            environment: "test".into(),
        }
    }

    fn categorized_item(priority: u8) -> WorkItem {
        let mut item = test_item("exec_1", "serum");
        item.record = item
            .record
            .with_extraction(ExtractedFields {
                name: "Vitamin C Serum".into(),
                description: "Clinically proven acne treatment".into(),
                ..Default::default()
            })
            .with_categorization(CategoryFields {
                primary_category: "skincare".into(),
                secondary_category: "primary".into(),
                likelihood: EligibilityLikelihood::High,
                confidence: 0.8,
                priority,
            });
        item
    }

    #[tokio::test]
    async fn forwards_with_the_model_judgment() {
        let model = Arc::new(
            MockModel::new()
                .with_judgment("Vitamin C Serum", EligibilityStatus::PrescriptionRequired),
        );
        let stage = ClassifyStage::new(model.clone());

        let output = stage.process(&ctx(), &categorized_item(1)).await.unwrap();
        assert!(output.advances());
        let classification = output.record().classification.as_ref().unwrap();
        assert_eq!(classification.status, EligibilityStatus::PrescriptionRequired);
        assert!(classification.status.is_eligible());
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn model_sees_name_category_and_description() {
        let model = Arc::new(MockModel::new());
        let stage = ClassifyStage::new(model.clone());
        stage.process(&ctx(), &categorized_item(1)).await.unwrap();

        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "Vitamin C Serum");
        assert_eq!(calls[0].category, "skincare");
        assert!(calls[0].description.contains("acne treatment"));
    }

    #[tokio::test]
    async fn stray_excluded_item_terminates_without_a_model_call() {
        let model = Arc::new(MockModel::new());
        let stage = ClassifyStage::new(model.clone());

        let output = stage
            .process(&ctx(), &categorized_item(SKIP_CLASSIFICATION_PRIORITY))
            .await
            .unwrap();
        assert!(!output.advances());
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn model_rate_limit_surfaces_as_transient() {
        let model = Arc::new(MockModel::new().rate_limiting_first(1));
        let stage = ClassifyStage::new(model);

        let error = stage.process(&ctx(), &categorized_item(1)).await.unwrap_err();
        assert_eq!(error.kind(), crate::error::ErrorKind::Transient);
    }

    #[test]
    fn status_strings_parse_with_aliases() {
        assert_eq!(parse_status("eligible").unwrap(), EligibilityStatus::Eligible);
        assert_eq!(
            parse_status("Not Eligible").unwrap(),
            EligibilityStatus::NotEligible
        );
        assert_eq!(
            parse_status("prescription_required").unwrap(),
            EligibilityStatus::PrescriptionRequired
        );
        assert_eq!(parse_status("unknown").unwrap(), EligibilityStatus::Unclear);
        assert!(parse_status("definitely maybe").is_err());
    }
}

//! Work items and the product record that accumulates stage fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The unit of data flowing through the pipeline.
///
/// The item id is derived from the URL, so the same product gets the same
/// id on every run of the same execution - that is what checkpoint dedup
/// keys on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable id: hex SHA-256 of the product URL
    pub item_id: String,

    /// Execution this item belongs to
    pub execution_id: String,

    /// Accumulated product data
    pub record: ProductRecord,
}

impl WorkItem {
    /// Create a work item from a discovered URL.
    pub fn from_discovery(execution_id: impl Into<String>, discovered: DiscoveredUrl) -> Self {
        let item_id = Self::derive_id(&discovered.url);
        Self {
            item_id,
            execution_id: execution_id.into(),
            record: ProductRecord::new(discovered),
        }
    }

    /// Rebuild an item from a checkpointed record (resume path).
    pub fn from_record(
        execution_id: impl Into<String>,
        item_id: impl Into<String>,
        record: ProductRecord,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            execution_id: execution_id.into(),
            record,
        }
    }

    /// Derive the stable item id from a product URL.
    pub fn derive_id(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A product URL found by discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredUrl {
    /// Product page URL
    pub url: String,

    /// Name guessed from the link text or URL path
    pub estimated_name: String,

    /// Seed page the link was found on
    pub discovered_from: String,
}

impl DiscoveredUrl {
    pub fn new(
        url: impl Into<String>,
        estimated_name: impl Into<String>,
        discovered_from: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            estimated_name: estimated_name.into(),
            discovered_from: discovered_from.into(),
        }
    }
}

/// Product data accumulated as an item passes stages.
///
/// Each stage fills in its own field group and leaves the rest untouched,
/// so a record checkpointed at stage N carries everything stages 1..=N
/// produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Product page URL
    pub url: String,

    /// Name guessed at discovery time
    pub estimated_name: String,

    /// Seed page the URL was discovered on
    pub discovered_from: String,

    /// Filled by the extraction stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractedFields>,

    /// Filled by the categorization stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categorization: Option<CategoryFields>,

    /// Filled by the classification stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<EligibilityFields>,

    /// Filled by the indexing stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexing: Option<IndexFields>,
}

impl ProductRecord {
    /// Create a record holding only discovery data.
    pub fn new(discovered: DiscoveredUrl) -> Self {
        Self {
            url: discovered.url,
            estimated_name: discovered.estimated_name,
            discovered_from: discovered.discovered_from,
            extraction: None,
            categorization: None,
            classification: None,
            indexing: None,
        }
    }

    /// Best available product name.
    pub fn name(&self) -> &str {
        self.extraction
            .as_ref()
            .map(|e| e.name.as_str())
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.estimated_name)
    }

    pub fn with_extraction(mut self, fields: ExtractedFields) -> Self {
        self.extraction = Some(fields);
        self
    }

    pub fn with_categorization(mut self, fields: CategoryFields) -> Self {
        self.categorization = Some(fields);
        self
    }

    pub fn with_classification(mut self, fields: EligibilityFields) -> Self {
        self.classification = Some(fields);
        self
    }

    pub fn with_indexing(mut self, fields: IndexFields) -> Self {
        self.indexing = Some(fields);
        self
    }
}

/// Structured product data pulled from the page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedFields {
    /// Product name or title
    pub name: String,

    /// Comprehensive description assembled from all available fields
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub price: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub brand: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ingredients: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub features: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub usage: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub specifications: String,

    /// Health, medical, therapeutic, or wellness claims on the page
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub medical_claims: String,

    /// Category or type as stated on the page
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
}

/// Rule-based category assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryFields {
    /// Best matching category, e.g. `skincare`
    pub primary_category: String,

    /// Tier the category belongs to: primary, secondary, or excluded
    pub secondary_category: String,

    /// How likely this category is reimbursable
    pub likelihood: EligibilityLikelihood,

    /// Keyword-match confidence in [0, 1]
    pub confidence: f64,

    /// 1 = classify first, 5 = skip classification entirely
    pub priority: u8,
}

/// How likely a category is to contain reimbursable products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityLikelihood {
    High,
    Medium,
    Low,
    Excluded,
}

impl EligibilityLikelihood {
    pub fn as_str(&self) -> &'static str {
        match self {
            EligibilityLikelihood::High => "high",
            EligibilityLikelihood::Medium => "medium",
            EligibilityLikelihood::Low => "low",
            EligibilityLikelihood::Excluded => "excluded",
        }
    }
}

/// Model-assigned eligibility judgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityFields {
    /// Terminal eligibility status
    pub status: EligibilityStatus,

    /// Model's stated reasoning, truncated for storage
    pub rationale: String,
}

/// Whether a product qualifies for reimbursement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityStatus {
    Eligible,
    NotEligible,
    PrescriptionRequired,
    Unclear,
}

impl EligibilityStatus {
    /// Eligible and prescription-required products count as reimbursable.
    pub fn is_eligible(&self) -> bool {
        matches!(
            self,
            EligibilityStatus::Eligible | EligibilityStatus::PrescriptionRequired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EligibilityStatus::Eligible => "eligible",
            EligibilityStatus::NotEligible => "not_eligible",
            EligibilityStatus::PrescriptionRequired => "prescription_required",
            EligibilityStatus::Unclear => "unclear",
        }
    }
}

/// Vector index upload result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFields {
    /// Document id in the vector index (the item id)
    pub vector_id: String,

    /// Namespace the document was upserted into
    pub namespace: String,

    /// When the upsert completed
    pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_id_is_stable_for_same_url() {
        let a = WorkItem::derive_id("https://shop.example.com/p/serum");
        let b = WorkItem::derive_id("https://shop.example.com/p/serum");
        let c = WorkItem::derive_id("https://shop.example.com/p/cream");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn name_prefers_extracted_over_estimated() {
        let discovered = DiscoveredUrl::new(
            "https://shop.example.com/p/serum",
            "Serum (estimated)",
            "https://shop.example.com",
        );
        let mut record = ProductRecord::new(discovered);
        assert_eq!(record.name(), "Serum (estimated)");

        record.extraction = Some(ExtractedFields {
            name: "Vitamin C Serum".into(),
            description: "A serum".into(),
            ..Default::default()
        });
        assert_eq!(record.name(), "Vitamin C Serum");
    }

    #[test]
    fn record_roundtrips_through_json() {
        let record = ProductRecord::new(DiscoveredUrl::new(
            "https://shop.example.com/p/serum",
            "Serum",
            "https://shop.example.com",
        ))
        .with_classification(EligibilityFields {
            status: EligibilityStatus::Eligible,
            rationale: "medical claim".into(),
        });

        let json = serde_json::to_string(&record).unwrap();
        let back: ProductRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.url, record.url);
        assert!(back.classification.unwrap().status.is_eligible());
        assert!(back.extraction.is_none());
    }
}

//! Categorization stage - keyword-rule category assignment.
//!
//! Pure text analysis, no external calls. Its job is to keep obviously
//! ineligible products (clothing, electronics, food, furniture) away from
//! the paid classification stage: an excluded match terminates the item
//! here with a checkpoint instead of forwarding it.

use async_trait::async_trait;
use tracing::debug;

use crate::error::StageResult;
use crate::traits::stage::{StageBody, StageContext, StageOutput};
use crate::types::item::{CategoryFields, EligibilityLikelihood, ProductRecord, WorkItem};

/// Priority at or above which an item skips classification entirely.
pub const SKIP_CLASSIFICATION_PRIORITY: u8 = 5;

/// Exclusion-indicator density above which a product is excluded outright.
const EXCLUSION_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Primary,
    Secondary,
    Excluded,
}

impl Tier {
    fn as_str(&self) -> &'static str {
        match self {
            Tier::Primary => "primary",
            Tier::Secondary => "secondary",
            Tier::Excluded => "excluded",
        }
    }

    fn score_boost(&self) -> f64 {
        match self {
            Tier::Primary => 1.5,
            Tier::Secondary => 1.2,
            Tier::Excluded => 1.0,
        }
    }
}

struct CategoryRule {
    name: &'static str,
    tier: Tier,
    keywords: &'static [&'static str],
    likelihood: EligibilityLikelihood,
    priority: u8,
}

const CATEGORY_RULES: [CategoryRule; 13] = [
    CategoryRule {
        name: "skincare",
        tier: Tier::Primary,
        keywords: &[
            "cream", "serum", "moisturizer", "cleanser", "acne", "anti-aging", "sunscreen",
            "treatment",
        ],
        likelihood: EligibilityLikelihood::High,
        priority: 1,
    },
    CategoryRule {
        name: "supplements",
        tier: Tier::Primary,
        keywords: &["vitamin", "mineral", "supplement", "probiotic", "omega", "calcium", "iron"],
        likelihood: EligibilityLikelihood::High,
        priority: 1,
    },
    CategoryRule {
        name: "medical_devices",
        tier: Tier::Primary,
        keywords: &["monitor", "thermometer", "blood pressure", "glucose", "tens", "massager"],
        likelihood: EligibilityLikelihood::High,
        priority: 1,
    },
    CategoryRule {
        name: "first_aid",
        tier: Tier::Primary,
        keywords: &["bandage", "antiseptic", "pain relief", "aspirin", "ibuprofen", "wound care"],
        likelihood: EligibilityLikelihood::High,
        priority: 1,
    },
    CategoryRule {
        name: "vision_care",
        tier: Tier::Primary,
        keywords: &["glasses", "reading glasses", "contact lens", "eye drops", "vision"],
        likelihood: EligibilityLikelihood::High,
        priority: 1,
    },
    CategoryRule {
        name: "oral_care",
        tier: Tier::Primary,
        keywords: &["toothbrush", "whitening", "dental", "oral", "teeth", "gum"],
        likelihood: EligibilityLikelihood::Medium,
        priority: 2,
    },
    CategoryRule {
        name: "beauty",
        tier: Tier::Secondary,
        keywords: &["makeup", "cosmetic", "lipstick", "foundation", "mascara"],
        likelihood: EligibilityLikelihood::Low,
        priority: 3,
    },
    CategoryRule {
        name: "fitness",
        tier: Tier::Secondary,
        keywords: &["recovery", "muscle", "therapy", "foam roller", "compression"],
        likelihood: EligibilityLikelihood::Medium,
        priority: 2,
    },
    CategoryRule {
        name: "baby_care",
        tier: Tier::Secondary,
        keywords: &["baby", "infant", "formula", "diaper", "pediatric"],
        likelihood: EligibilityLikelihood::Medium,
        priority: 2,
    },
    CategoryRule {
        name: "clothing",
        tier: Tier::Excluded,
        keywords: &["shirt", "pants", "dress", "fashion", "apparel", "clothing"],
        likelihood: EligibilityLikelihood::Excluded,
        priority: 5,
    },
    CategoryRule {
        name: "electronics",
        tier: Tier::Excluded,
        keywords: &["phone", "computer", "headphones", "speaker", "gaming"],
        likelihood: EligibilityLikelihood::Excluded,
        priority: 5,
    },
    CategoryRule {
        name: "food",
        tier: Tier::Excluded,
        keywords: &["snack", "beverage", "candy", "chocolate", "cookie"],
        likelihood: EligibilityLikelihood::Excluded,
        priority: 5,
    },
    CategoryRule {
        name: "home",
        tier: Tier::Excluded,
        keywords: &["furniture", "decoration", "kitchen", "bedding", "lighting"],
        likelihood: EligibilityLikelihood::Excluded,
        priority: 5,
    },
];

/// Phrases that signal genuine medical or therapeutic benefit.
const MEDICAL_INDICATORS: [&str; 13] = [
    "fda approved",
    "clinically proven",
    "therapeutic",
    "medical grade",
    "doctor recommended",
    "prescription",
    "treatment",
    "therapy",
    "relief",
    "healing",
    "pain",
    "inflammation",
    "infection",
];

/// Phrases that signal a lifestyle product with no eligibility case.
const EXCLUSION_INDICATORS: [&str; 9] = [
    "fashion",
    "style",
    "trendy",
    "decorative",
    "cosmetic only",
    "recreational",
    "entertainment",
    "gaming",
    "luxury",
];

/// Stage body assigning a category, likelihood, and classification priority.
#[derive(Default)]
pub struct CategorizeStage;

impl CategorizeStage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageBody for CategorizeStage {
    async fn process(&self, _ctx: &StageContext, item: &WorkItem) -> StageResult<StageOutput> {
        let fields = categorize(&item.record);
        debug!(
            item_id = %item.item_id,
            category = %fields.primary_category,
            likelihood = fields.likelihood.as_str(),
            priority = fields.priority,
            "categorized product"
        );

        let skip = fields.priority >= SKIP_CLASSIFICATION_PRIORITY;
        let record = item.record.clone().with_categorization(fields);
        if skip {
            Ok(StageOutput::Done(record))
        } else {
            Ok(StageOutput::Forward(record))
        }
    }
}

/// Categorize one product from its combined text.
pub fn categorize(record: &ProductRecord) -> CategoryFields {
    let text = combined_text(record).to_lowercase();

    // Lifestyle products bail out before any category matching.
    let exclusion_score = indicator_score(&text, &EXCLUSION_INDICATORS);
    if exclusion_score > EXCLUSION_THRESHOLD {
        let category = CATEGORY_RULES
            .iter()
            .filter(|rule| rule.tier == Tier::Excluded)
            .find(|rule| rule.keywords.iter().any(|k| text.contains(k)))
            .map(|rule| rule.name)
            .unwrap_or("general_excluded");
        return CategoryFields {
            primary_category: category.to_string(),
            secondary_category: "excluded".to_string(),
            likelihood: EligibilityLikelihood::Excluded,
            confidence: exclusion_score,
            priority: SKIP_CLASSIFICATION_PRIORITY,
        };
    }

    let medical_score = indicator_score(&text, &MEDICAL_INDICATORS);
    let best = best_match(&text);

    match best {
        Some((rule, confidence)) => {
            let (likelihood, priority) = adjust_for_medical_score(rule, medical_score);
            CategoryFields {
                primary_category: rule.name.to_string(),
                secondary_category: rule.tier.as_str().to_string(),
                likelihood,
                confidence,
                priority,
            }
        }
        None => {
            // No keyword matched at all; let the medical score decide
            // whether a human-priced classification is worth it.
            let (likelihood, priority) = if medical_score > 0.3 {
                (EligibilityLikelihood::Medium, 2)
            } else {
                (EligibilityLikelihood::Low, 3)
            };
            CategoryFields {
                primary_category: "uncategorized".to_string(),
                secondary_category: "unknown".to_string(),
                likelihood,
                confidence: 0.5,
                priority,
            }
        }
    }
}

fn combined_text(record: &ProductRecord) -> String {
    let mut parts = vec![record.name().to_string()];
    if let Some(extraction) = &record.extraction {
        for value in [
            &extraction.description,
            &extraction.features,
            &extraction.ingredients,
            &extraction.medical_claims,
            &extraction.usage,
            &extraction.specifications,
            &extraction.category,
        ] {
            if !value.is_empty() {
                parts.push(value.clone());
            }
        }
    }
    parts.join(" ")
}

/// Fraction of the indicator list present in the text.
fn indicator_score(text: &str, indicators: &[&str]) -> f64 {
    let matches = indicators.iter().filter(|i| text.contains(*i)).count();
    matches as f64 / indicators.len() as f64
}

fn best_match(text: &str) -> Option<(&'static CategoryRule, f64)> {
    let mut best: Option<(&CategoryRule, f64)> = None;
    for rule in &CATEGORY_RULES {
        let matches = rule.keywords.iter().filter(|k| text.contains(*k)).count();
        if matches == 0 {
            continue;
        }
        let score = (matches as f64 / rule.keywords.len() as f64) * rule.tier.score_boost();
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((rule, score));
        }
    }
    best
}

/// Shift the rule's baseline likelihood and priority by how medical the
/// product text reads.
fn adjust_for_medical_score(
    rule: &CategoryRule,
    medical_score: f64,
) -> (EligibilityLikelihood, u8) {
    if medical_score > 0.5 {
        match rule.likelihood {
            EligibilityLikelihood::Medium => {
                return (EligibilityLikelihood::High, rule.priority.saturating_sub(1).max(1))
            }
            EligibilityLikelihood::Low => {
                return (EligibilityLikelihood::Medium, rule.priority.saturating_sub(1).max(2))
            }
            _ => {}
        }
    } else if medical_score < 0.1 && rule.likelihood == EligibilityLikelihood::High {
        return (EligibilityLikelihood::Medium, (rule.priority + 1).min(3));
    }
    (rule.likelihood, rule.priority)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_item;
    use crate::types::item::{DiscoveredUrl, ExtractedFields};
    use crate::types::stage::StageName;

    fn record(name: &str, description: &str) -> ProductRecord {
        ProductRecord::new(DiscoveredUrl::new(
            "https://shop.example.com/p/x",
            name,
            "https://shop.example.com",
        ))
        .with_extraction(ExtractedFields {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        })
    }

    fn ctx() -> StageContext {
        StageContext {
            execution_id: "exec_1".into(),
            stage: StageName::Categorization,
            environment: "test".into(),
        }
    }

    #[test]
    fn skincare_with_medical_claims_stays_high_priority() {
        let fields = categorize(&record(
            "Vitamin C Serum",
            "Anti-aging serum, clinically proven treatment for acne relief and inflammation",
        ));
        assert_eq!(fields.primary_category, "skincare");
        assert_eq!(fields.secondary_category, "primary");
        assert_eq!(fields.likelihood, EligibilityLikelihood::High);
        assert_eq!(fields.priority, 1);
    }

    #[test]
    fn high_likelihood_without_medical_signals_is_demoted() {
        let fields = categorize(&record("Face Cream", "A nice cream for your face"));
        assert_eq!(fields.primary_category, "skincare");
        // No medical indicators at all drops the likelihood a notch.
        assert_eq!(fields.likelihood, EligibilityLikelihood::Medium);
        assert_eq!(fields.priority, 2);
    }

    #[test]
    fn strong_medical_signals_promote_medium_categories() {
        let fields = categorize(&record(
            "Electric Toothbrush",
            "Dental care, doctor recommended therapy, clinically proven treatment for gum \
             inflammation, pain relief and healing, fda approved, therapeutic, medical grade",
        ));
        assert_eq!(fields.primary_category, "oral_care");
        assert_eq!(fields.likelihood, EligibilityLikelihood::High);
        assert_eq!(fields.priority, 1);
    }

    #[test]
    fn excluded_category_gets_skip_priority() {
        let fields = categorize(&record(
            "Gaming Headphones",
            "Wireless headphones for gaming on your phone or computer",
        ));
        assert_eq!(fields.primary_category, "electronics");
        assert_eq!(fields.likelihood, EligibilityLikelihood::Excluded);
        assert_eq!(fields.priority, SKIP_CLASSIFICATION_PRIORITY);
    }

    #[test]
    fn unmatched_product_lands_in_uncategorized() {
        let fields = categorize(&record("Mystery Object", "An object of mysterious provenance"));
        assert_eq!(fields.primary_category, "uncategorized");
        assert_eq!(fields.secondary_category, "unknown");
        assert_eq!(fields.likelihood, EligibilityLikelihood::Low);
        assert_eq!(fields.priority, 3);
    }

    #[tokio::test]
    async fn excluded_items_terminate_instead_of_forwarding() {
        let stage = CategorizeStage::new();
        let mut item = test_item("exec_1", "tv");
        item.record = record("Gaming Speaker", "A speaker for gaming and entertainment");

        let output = stage.process(&ctx(), &item).await.unwrap();
        assert!(!output.advances());
        assert!(output.record().categorization.is_some());
    }

    #[tokio::test]
    async fn eligible_looking_items_forward_with_category_fields() {
        let stage = CategorizeStage::new();
        let mut item = test_item("exec_1", "serum");
        item.record = record("Serum", "Clinically proven acne treatment serum for pain relief");

        let output = stage.process(&ctx(), &item).await.unwrap();
        assert!(output.advances());
        let fields = output.record().categorization.as_ref().unwrap();
        assert_eq!(fields.primary_category, "skincare");
    }
}

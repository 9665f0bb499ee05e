//! Extraction stage - scrape the product page and assemble a description
//! rich enough for downstream categorization and classification.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::error::{StageError, StageResult};
use crate::traits::external::{PageScraper, ScrapedPage};
use crate::traits::stage::{StageBody, StageContext, StageOutput};
use crate::types::item::{ExtractedFields, WorkItem};

/// Description shorter than this gets padded from the page markdown.
const DESCRIPTION_TARGET_LEN: usize = 1500;

/// Description shorter than this falls back to name/brand/price assembly.
const DESCRIPTION_MIN_LEN: usize = 200;

/// Markdown lines matching these are boilerplate, not product content.
const SKIP_PATTERNS: [&str; 16] = [
    "navigation",
    "menu",
    "header",
    "footer",
    "cart",
    "checkout",
    "login",
    "account",
    "shipping",
    "returns",
    "privacy",
    "terms",
    "subscribe",
    "newsletter",
    "follow us",
    "contact",
];

/// Markdown lines matching these likely describe the product.
const PRODUCT_PATTERNS: [&str; 16] = [
    "product",
    "benefit",
    "feature",
    "ingredient",
    "use",
    "apply",
    "helps",
    "support",
    "improve",
    "reduce",
    "enhance",
    "provide",
    "formula",
    "blend",
    "vitamin",
    "supplement",
];

/// Stage body that scrapes one product page per item.
pub struct ExtractStage {
    scraper: Arc<dyn PageScraper>,
}

impl ExtractStage {
    pub fn new(scraper: Arc<dyn PageScraper>) -> Self {
        Self { scraper }
    }
}

#[async_trait]
impl StageBody for ExtractStage {
    async fn process(&self, _ctx: &StageContext, item: &WorkItem) -> StageResult<StageOutput> {
        let page = self.scraper.scrape(&item.record.url).await?;

        let mut fields = page.fields.clone();
        if fields.name.trim().is_empty() {
            fields.name = item.record.estimated_name.clone();
        }
        fields.description = build_description(&page, &fields);
        debug!(
            url = %item.record.url,
            description_len = fields.description.len(),
            "extracted product"
        );

        Ok(StageOutput::Forward(
            item.record.clone().with_extraction(fields),
        ))
    }
}

/// Assemble one comprehensive description from every extracted field, then
/// pad thin results from the page markdown and fall back to basic facts.
fn build_description(page: &ScrapedPage, fields: &ExtractedFields) -> String {
    let mut parts: Vec<String> = Vec::new();
    let main = fields.description.trim();
    if !main.is_empty() {
        parts.push(main.to_string());
    }
    for (label, value) in [
        ("Key Features", &fields.features),
        ("Ingredients/Components", &fields.ingredients),
        ("Usage Instructions", &fields.usage),
        ("Specifications", &fields.specifications),
        ("Health & Medical Claims", &fields.medical_claims),
    ] {
        let value = value.trim();
        if !value.is_empty() {
            parts.push(format!("{label}: {value}"));
        }
    }

    let mut description = parts.join(" | ");

    if description.len() < DESCRIPTION_TARGET_LEN && !page.markdown.is_empty() {
        let supplement = markdown_supplement(&page.markdown);
        if !supplement.is_empty() {
            if description.is_empty() {
                description = supplement;
            } else {
                description = format!("{description} | Additional Details: {supplement}");
            }
        }
    }

    if description.len() < DESCRIPTION_MIN_LEN {
        description = fallback_description(fields, main);
    }

    description.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pick the ten most product-relevant lines out of the page markdown.
fn markdown_supplement(markdown: &str) -> String {
    markdown
        .lines()
        .map(str::trim)
        .filter(|line| line.len() > 20)
        .filter(|line| {
            let lower = line.to_lowercase();
            !SKIP_PATTERNS.iter().any(|skip| lower.contains(skip))
                && PRODUCT_PATTERNS.iter().any(|hint| lower.contains(hint))
        })
        .take(10)
        .collect::<Vec<_>>()
        .join(" | ")
}

fn fallback_description(fields: &ExtractedFields, main: &str) -> String {
    let mut description = if fields.name.is_empty() {
        "Product".to_string()
    } else {
        fields.name.clone()
    };
    if !fields.brand.is_empty() {
        description.push_str(&format!(" by {}", fields.brand));
    }
    if !fields.category.is_empty() {
        description.push_str(&format!(" - {}", fields.category));
    }
    if !fields.price.is_empty() {
        description.push_str(&format!(" - Price: {}", fields.price));
    }
    if !main.is_empty() {
        description.push_str(&format!(" - {main}"));
    }
    description
}

/// Plain-HTTP [`PageScraper`]: fetches the page and pulls fields out of
/// the title, meta tags, and body text. A structured extraction service
/// can replace it behind the same trait.
pub struct HttpScraper {
    http: reqwest::Client,
    timeout: Duration,
    title: Regex,
    meta_description: Regex,
    price: Regex,
    tags: Regex,
}

impl Default for HttpScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpScraper {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout: Duration::from_secs(30),
            title: Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap(),
            meta_description: Regex::new(
                r#"(?is)<meta\s[^>]*name\s*=\s*["']description["'][^>]*content\s*=\s*["']([^"']*)["']"#,
            )
            .unwrap(),
            price: Regex::new(r"\$\d+(?:\.\d{2})?").unwrap(),
            tags: Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>|<[^>]+>").unwrap(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl PageScraper for HttpScraper {
    async fn scrape(&self, url: &str) -> StageResult<ScrapedPage> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StageError::Timeout(self.timeout)
                } else {
                    StageError::Connection(e.to_string())
                }
            })?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(StageError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(StageError::Scrape {
                url: url.to_string(),
                message: format!("status {}", response.status()),
            });
        }
        let html = response.text().await.map_err(|e| StageError::Scrape {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let name = self
            .title
            .captures(&html)
            .map(|c| c[1].split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        let description = self
            .meta_description
            .captures(&html)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default();
        let price = self
            .price
            .find(&html)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let text = self.tags.replace_all(&html, "\n");
        let markdown = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ScrapedPage {
            fields: ExtractedFields {
                name,
                description,
                price,
                ..Default::default()
            },
            markdown,
        })
    }
}

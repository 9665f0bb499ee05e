//! Seed-page link discovery.
//!
//! Fetches the target page and harvests anchors that look like product
//! links. Deliberately simple: the stages downstream tolerate junk URLs
//! (a non-product page just fails extraction for that one item), so the
//! heuristics favor recall over precision.

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::USER_AGENT;
use std::time::Duration;
use url::Url;

use crate::error::{PipelineError, Result};
use crate::traits::discovery::Discovery;
use crate::types::item::DiscoveredUrl;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// URL fragments that mark a link as a likely product page.
const PRODUCT_PATH_HINTS: [&str; 5] = ["product", "item", "shop", "buy", "p/"];

/// HTTP-backed [`Discovery`] that scrapes anchors off the target page.
pub struct LinkDiscovery {
    http: reqwest::Client,
    timeout: Duration,
}

impl Default for LinkDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkDiscovery {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Discovery for LinkDiscovery {
    async fn discover(
        &self,
        target: &str,
        max_items: Option<usize>,
    ) -> Result<Vec<DiscoveredUrl>> {
        let response = self
            .http
            .get(target)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PipelineError::Discovery(format!("fetch {target}: {e}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::Discovery(format!(
                "fetch {target}: status {}",
                response.status()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| PipelineError::Discovery(format!("read {target}: {e}")))?;

        let mut links = extract_product_links(&html, target);
        if let Some(max) = max_items {
            links.truncate(max);
        }
        Ok(links)
    }
}

/// Pull product-looking links out of a page, resolved against `base`.
///
/// Duplicate URLs within the page collapse to the first occurrence.
pub fn extract_product_links(html: &str, base: &str) -> Vec<DiscoveredUrl> {
    // Unparseable base means nothing relative can be resolved.
    let Ok(base_url) = Url::parse(base) else {
        return Vec::new();
    };
    let anchor =
        Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#).unwrap();
    let tags = Regex::new(r"<[^>]+>").unwrap();

    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for capture in anchor.captures_iter(html) {
        let href = capture[1].trim();
        let hint_target = href.to_lowercase();
        if !PRODUCT_PATH_HINTS.iter().any(|hint| hint_target.contains(hint)) {
            continue;
        }

        let Ok(resolved) = base_url.join(href) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        let url = resolved.to_string();
        if !seen.insert(url.clone()) {
            continue;
        }

        let text = tags.replace_all(&capture[2], " ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let estimated_name = if text.is_empty() {
            name_from_url(&resolved)
        } else {
            text.chars().take(100).collect()
        };

        links.push(DiscoveredUrl::new(url, estimated_name, base));
    }

    links
}

/// Guess a product name from the last path segment of its URL.
fn name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        .unwrap_or("product")
        .replace('-', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
        <nav><a href="/about">About us</a></nav>
        <a href="/products/vitamin-c-serum">Vitamin C Serum</a>
        <a href="https://shop.example.com/p/thermometer"><b>Digital</b> Thermometer</a>
        <a href="/shop/bandages"></a>
        <a href="/products/vitamin-c-serum">Vitamin C Serum (duplicate)</a>
        <a href="mailto:help@example.com">product questions</a>
        <a href="/blog/post-1">Read more</a>
        </body></html>
    "#;

    #[test]
    fn finds_product_links_and_resolves_relative_urls() {
        let links = extract_product_links(PAGE, "https://shop.example.com");
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://shop.example.com/products/vitamin-c-serum",
                "https://shop.example.com/p/thermometer",
                "https://shop.example.com/shop/bandages",
            ]
        );
    }

    #[test]
    fn estimates_names_from_link_text_or_url() {
        let links = extract_product_links(PAGE, "https://shop.example.com");
        assert_eq!(links[0].estimated_name, "Vitamin C Serum");
        // Inner tags are stripped from the text.
        assert_eq!(links[1].estimated_name, "Digital Thermometer");
        // Empty link text falls back to the URL slug.
        assert_eq!(links[2].estimated_name, "bandages");
    }

    #[test]
    fn ignores_non_product_and_non_http_links() {
        let links = extract_product_links(PAGE, "https://shop.example.com");
        assert!(links.iter().all(|l| !l.url.contains("about")));
        assert!(links.iter().all(|l| !l.url.contains("blog")));
        assert!(links.iter().all(|l| !l.url.starts_with("mailto")));
    }

    #[test]
    fn records_the_seed_page() {
        let links = extract_product_links(PAGE, "https://shop.example.com");
        assert!(links
            .iter()
            .all(|l| l.discovered_from == "https://shop.example.com"));
    }

    #[test]
    fn empty_page_yields_no_links() {
        assert!(extract_product_links("<html></html>", "https://shop.example.com").is_empty());
    }
}

//! Listing-page discovery: scrape document links out of index pages.

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::SourceError;
use crate::extractors::text::html_to_text;
use crate::fetch::PoliteFetcher;
use crate::traits::source::CandidateSource;
use crate::types::{
    config::{DiscoveryWindow, FetchPolicy},
    document::Candidate,
};

static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))[^>]*>(.*?)</a\s*>"#)
        .expect("valid regex")
});
static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{1,2}[-/]\d{1,2}[-/]\d{4}|\d{4}[-/]\d{1,2}[-/]\d{1,2})\b").expect("valid regex")
});

const DATE_FORMATS: &[&str] = &["%d-%m-%Y", "%d/%m/%Y", "%Y-%m-%d", "%Y/%m/%d"];

/// Settings for one listing source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingConfig {
    pub name: String,

    /// Index pages to scrape
    pub listing_urls: Vec<String>,

    /// Path suffixes of document links, matched case-insensitively.
    ///
    /// Defaults to the formats `TextExtractor` reads. Listing `.pdf` links
    /// needs a PDF-capable extractor passed to `Run::with_extractor`.
    #[serde(default = "default_suffixes")]
    pub link_suffixes: Vec<String>,

    /// Title used when a link has no anchor text
    #[serde(default)]
    pub default_title: Option<String>,
}

fn default_suffixes() -> Vec<String> {
    [".html", ".htm", ".txt"].iter().map(|s| s.to_string()).collect()
}

impl ListingConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            listing_urls: Vec::new(),
            link_suffixes: default_suffixes(),
            default_title: None,
        }
    }

    pub fn with_listing_url(mut self, url: impl Into<String>) -> Self {
        self.listing_urls.push(url.into());
        self
    }

    pub fn with_link_suffixes(mut self, suffixes: &[&str]) -> Self {
        self.link_suffixes = suffixes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_default_title(mut self, title: impl Into<String>) -> Self {
        self.default_title = Some(title.into());
        self
    }
}

/// A link found on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLink {
    pub url: Url,

    /// Anchor text with markup stripped and whitespace collapsed
    pub text: String,
}

/// Discovers candidates by scraping listing pages through the shared fetcher.
pub struct ListingSource {
    config: ListingConfig,
    fetcher: Arc<PoliteFetcher>,
    policy: FetchPolicy,
}

impl ListingSource {
    pub fn new(config: ListingConfig, fetcher: Arc<PoliteFetcher>, policy: FetchPolicy) -> Self {
        Self {
            config,
            fetcher,
            policy,
        }
    }

    fn to_candidate(&self, link: ListingLink) -> Candidate {
        let mut candidate = Candidate::new(link.url.to_string(), self.config.name.clone());
        if let Some(date) = parse_declared_date(&link.text) {
            candidate = candidate.with_declared_date(date);
        }
        let title = if link.text.is_empty() {
            self.config.default_title.clone()
        } else {
            Some(link.text)
        };
        if let Some(title) = title {
            candidate = candidate.with_title(title);
        }
        candidate
    }
}

#[async_trait]
impl CandidateSource for ListingSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn discover(&self, _window: &DiscoveryWindow) -> Result<Vec<Candidate>, SourceError> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut last_failure = None;
        let mut pages_ok = 0;

        for listing_url in &self.config.listing_urls {
            let base = match Url::parse(listing_url) {
                Ok(base) => base,
                Err(e) => {
                    warn!(source = %self.config.name, url = %listing_url, error = %e, "invalid listing url");
                    last_failure = Some(e.to_string());
                    continue;
                }
            };

            let fetched = self.fetcher.fetch(listing_url, &self.policy).await;
            let body = match (fetched.error, fetched.body) {
                (None, Some(body)) => body,
                (error, _) => {
                    let reason = error.map_or_else(|| "empty body".to_string(), |e| e.to_string());
                    warn!(source = %self.config.name, url = %listing_url, error = %reason, "listing page failed");
                    last_failure = Some(reason);
                    continue;
                }
            };
            pages_ok += 1;

            let html = String::from_utf8_lossy(&body);
            let links = extract_links(&html, &base, &self.config.link_suffixes);
            debug!(source = %self.config.name, url = %listing_url, links = links.len(), "listing page parsed");

            for link in links {
                if seen.insert(link.url.to_string()) {
                    candidates.push(self.to_candidate(link));
                }
            }
        }

        if pages_ok == 0 {
            if let Some(reason) = last_failure {
                return Err(SourceError::Unreachable {
                    source_name: self.config.name.clone(),
                    reason,
                });
            }
        }

        info!(source = %self.config.name, candidates = candidates.len(), "discovery complete");
        Ok(candidates)
    }
}

/// Links in `html` whose path ends with one of `suffixes`, resolved against
/// `base`. Document order is kept.
pub fn extract_links(html: &str, base: &Url, suffixes: &[String]) -> Vec<ListingLink> {
    let suffixes: Vec<String> = suffixes.iter().map(|s| s.to_ascii_lowercase()).collect();

    ANCHOR
        .captures_iter(html)
        .filter_map(|caps| {
            let href = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))?
                .as_str()
                .trim();
            let url = base.join(href).ok()?;
            if !matches!(url.scheme(), "http" | "https") {
                return None;
            }
            let path = url.path().to_ascii_lowercase();
            if !suffixes.iter().any(|s| path.ends_with(s.as_str())) {
                return None;
            }
            let inner = caps.get(4).map_or("", |m| m.as_str());
            let text = html_to_text(inner).split_whitespace().collect::<Vec<_>>().join(" ");
            Some(ListingLink { url, text })
        })
        .collect()
}

/// First date in `text` matching a supported format.
pub fn parse_declared_date(text: &str) -> Option<NaiveDate> {
    DATE.find_iter(text).find_map(|m| {
        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(m.as_str(), fmt).ok())
    })
}

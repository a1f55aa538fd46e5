// src/scrape/mod.rs
//! Scraper registry: strategy tag -> parser.
//!
//! Every built-in parser is an [`HtmlScraper`]: one GET through the shared
//! [`Fetcher`], then a pure extraction function over the parsed DOM (see
//! [`parsers`]). The registry is filled once at startup and then only read.

pub mod fetch;
pub mod parsers;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;
use thiserror::Error;

use crate::model::RawQuote;
pub use fetch::{Fetcher, BROWSER_USER_AGENT};
pub use parsers::Extractor;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScrapeError {
    #[error("no parser registered for strategy {0}")]
    NotRegistered(String),

    #[error("http request failed: {0}")]
    HttpFailed(String),

    #[error("page shape mismatch: {0}")]
    ParseFailed(String),

    #[error("currency {0} not found on page")]
    CurrencyNotFound(String),
}

/// A parser for one page shape. Accepts (base URL, currency code).
#[async_trait]
pub trait RateScraper: Send + Sync {
    async fn scrape(&self, base_url: &str, currency: &str) -> Result<RawQuote, ScrapeError>;
}

/// Parser built from the shared fetcher and a DOM extraction function.
pub struct HtmlScraper {
    fetcher: Fetcher,
    extract: Extractor,
}

impl HtmlScraper {
    pub fn new(fetcher: Fetcher, extract: Extractor) -> Self {
        Self { fetcher, extract }
    }
}

#[async_trait]
impl RateScraper for HtmlScraper {
    async fn scrape(&self, base_url: &str, currency: &str) -> Result<RawQuote, ScrapeError> {
        let body = self.fetcher.get_html(base_url).await?;
        extract_from_body(&body, currency, self.extract)
    }
}

// Html is not Send; keep it out of the async state machine.
fn extract_from_body(body: &str, currency: &str, extract: Extractor) -> Result<RawQuote, ScrapeError> {
    let doc = Html::parse_document(body);
    extract(&doc, currency)
}

#[derive(Default, Clone)]
pub struct ScraperRegistry {
    parsers: HashMap<String, Arc<dyn RateScraper>>,
}

impl ScraperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the ten shipped strategies (C1..C10).
    pub fn with_builtin(fetcher: Fetcher) -> Self {
        let mut registry = Self::new();
        for (tag, extract) in parsers::BUILTIN {
            registry.register(tag, Arc::new(HtmlScraper::new(fetcher.clone(), extract)));
        }
        registry
    }

    /// Register (or replace) the parser for `name`.
    pub fn register(&mut self, name: &str, parser: Arc<dyn RateScraper>) {
        self.parsers.insert(name.to_string(), parser);
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn RateScraper>, ScrapeError> {
        self.parsers
            .get(name)
            .cloned()
            .ok_or_else(|| ScrapeError::NotRegistered(name.to_string()))
    }

    pub fn strategies(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.parsers.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Lookup + invoke in one go.
    pub async fn scrape(
        &self,
        strategy: &str,
        base_url: &str,
        currency: &str,
    ) -> Result<RawQuote, ScrapeError> {
        let parser = self.lookup(strategy)?;
        parser.scrape(base_url, currency).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Fixed;

    #[async_trait]
    impl RateScraper for Fixed {
        async fn scrape(&self, _url: &str, _ccy: &str) -> Result<RawQuote, ScrapeError> {
            Ok(RawQuote::new("4.30", "4.35"))
        }
    }

    #[tokio::test]
    async fn registered_parser_is_invoked_by_tag() {
        let mut reg = ScraperRegistry::new();
        reg.register("X1", Arc::new(Fixed));
        let q = reg.scrape("X1", "http://unused", "EUR").await.unwrap();
        assert_eq!(q, RawQuote::new("4.30", "4.35"));
    }

    #[tokio::test]
    async fn unknown_tag_is_not_registered() {
        let reg = ScraperRegistry::new();
        let err = reg.scrape("C42", "http://unused", "EUR").await.unwrap_err();
        assert_eq!(err, ScrapeError::NotRegistered("C42".into()));
    }

    #[test]
    fn builtin_covers_ten_strategies() {
        let fetcher = Fetcher::new(Duration::from_secs(1)).unwrap();
        let reg = ScraperRegistry::with_builtin(fetcher);
        let tags = reg.strategies();
        assert_eq!(tags.len(), 10);
        for tag in ["C1", "C2", "C3", "C4", "C5", "C6", "C7", "C8", "C9", "C10"] {
            assert!(reg.lookup(tag).is_ok(), "missing {tag}");
        }
    }
}

// src/scrape/fetch.rs
use std::time::Duration;

use metrics::counter;

use super::ScrapeError;

/// Some cantor sites refuse obvious bots; present as a desktop browser.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Hard per-request deadline for rate pages.
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(15);

/// Shared HTTP client for every HTML strategy.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .timeout(timeout)
            .build()
            .map_err(|e| ScrapeError::HttpFailed(format!("client build: {e}")))?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET `url` and return the body. Timeouts and non-2xx map to `HttpFailed`.
    pub async fn get_html(&self, url: &str) -> Result<String, ScrapeError> {
        counter!("scrape_requests_total").increment(1);

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.http_failed(url, e))?;
        let resp = resp
            .error_for_status()
            .map_err(|e| self.http_failed(url, e))?;
        resp.text().await.map_err(|e| self.http_failed(url, e))
    }

    fn http_failed(&self, url: &str, e: reqwest::Error) -> ScrapeError {
        counter!("scrape_errors_total").increment(1);
        if e.is_timeout() {
            ScrapeError::HttpFailed(format!("{url}: timed out after {:?}", self.timeout))
        } else {
            ScrapeError::HttpFailed(format!("{url}: {e}"))
        }
    }
}

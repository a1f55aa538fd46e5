// tests/common/mod.rs
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use cantor_rates::model::{RawQuote, Source};
use cantor_rates::scrape::{RateScraper, ScrapeError, ScraperRegistry};
use tokio::net::TcpListener;

pub const STUB: &str = "STUB";

type Respond = dyn Fn(&str, &str) -> Result<RawQuote, ScrapeError> + Send + Sync;

/// Scripted parser: counts calls, optionally sleeps, answers via `respond`.
#[derive(Clone)]
pub struct StubScraper {
    pub calls: Arc<AtomicUsize>,
    delay: Duration,
    slow_urls: Arc<Vec<(String, Duration)>>,
    respond: Arc<Respond>,
}

impl StubScraper {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&str, &str) -> Result<RawQuote, ScrapeError> + Send + Sync + 'static,
    {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            slow_urls: Arc::new(Vec::new()),
            respond: Arc::new(respond),
        }
    }

    /// Always the same buy/sell pair.
    pub fn fixed(buy: &str, sell: &str) -> Self {
        let (buy, sell) = (buy.to_string(), sell.to_string());
        Self::new(move |_, _| Ok(RawQuote::new(buy.as_str(), sell.as_str())))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Stall only scrapes whose base URL contains `fragment`.
    pub fn with_delay_for(mut self, fragment: &str, delay: Duration) -> Self {
        Arc::make_mut(&mut self.slow_urls).push((fragment.to_string(), delay));
        self
    }

    fn delay_for(&self, base_url: &str) -> Duration {
        self.slow_urls
            .iter()
            .find(|(fragment, _)| base_url.contains(fragment.as_str()))
            .map_or(self.delay, |(_, d)| *d)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> ScraperRegistry {
        let mut reg = ScraperRegistry::new();
        reg.register(STUB, Arc::new(self.clone()));
        reg
    }
}

#[async_trait]
impl RateScraper for StubScraper {
    async fn scrape(&self, base_url: &str, currency: &str) -> Result<RawQuote, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_for(base_url);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.respond)(base_url, currency)
    }
}

pub fn source(id: i32, name: &str, strategy: &str, base_url: &str) -> Source {
    Source {
        id,
        name: name.to_string(),
        display_name: name.to_uppercase(),
        base_url: base_url.to_string(),
        strategy: strategy.to_string(),
        units: 1,
        latitude: 50.04,
        longitude: 22.0,
    }
}

pub fn stub_source(id: i32, name: &str) -> Source {
    source(id, name, STUB, &format!("http://{name}.test/"))
}

/// Serve `app` on an ephemeral localhost port.
pub async fn spawn_upstream(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn c1_page(rows: &[(&str, &str, &str)]) -> String {
    let mut body = String::from(
        r#"<html><body><table class="kursy_walut"><tr><th>flag</th><th>symbol</th><th>name</th><th>buy</th><th>sell</th></tr>"#,
    );
    for (ccy, buy, sell) in rows {
        body.push_str(&format!(
            r#"<tr><td><img src="x.png"></td><td>{ccy}</td><td>name</td><td>{buy}</td><td>{sell}</td></tr>"#
        ));
    }
    body.push_str("</table></body></html>");
    body
}

// tests/read_path.rs
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::State, routing::get, Router};
use cantor_rates::cache::{memory::MemoryCache, rate_key, HotCache, Subscription};
use cantor_rates::model::{Quote, RateRecord};
use cantor_rates::read_path::ReadConfig;
use cantor_rates::scrape::{Fetcher, ScrapeError, ScraperRegistry};
use cantor_rates::store::memory::MemoryStore;
use cantor_rates::{RateError, RateResult, Services};
use chrono::Utc;
use prost::Message;

use common::{c1_page, source, spawn_upstream, stub_source, StubScraper};

fn services_with(
    registry: ScraperRegistry,
    store: Arc<MemoryStore>,
    cache: Arc<MemoryCache>,
) -> Services {
    Services::new(store.clone(), store, cache, registry, ReadConfig::default())
}

#[tokio::test]
async fn cold_read_scrapes_once_then_serves_from_cache() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                axum::response::Html(c1_page(&[("USD", "3,95", "4,05"), ("EUR", "4.30", "4.35")]))
            }),
        )
        .with_state(hits.clone());
    let addr = spawn_upstream(app).await;

    let store = Arc::new(MemoryStore::with_sources([source(
        1,
        "tadek",
        "C1",
        &format!("http://{addr}/"),
    )]));
    let cache = Arc::new(MemoryCache::new());
    let registry = ScraperRegistry::with_builtin(Fetcher::new(Duration::from_secs(5)).unwrap());
    let svc = services_with(registry, store.clone(), cache.clone());

    let started = Utc::now().timestamp();
    let q = svc.rates.get_rate(1, "EUR").await.unwrap();
    assert_eq!(q.buy_rate, "4.300");
    assert_eq!(q.sell_rate, "4.350");
    assert_eq!(q.cantor_id, 1);
    assert_eq!(q.currency, "EUR");
    assert_eq!(q.change_24h, 0.0);
    assert!(q.fetched_at >= started);

    let cached = cache.get(&rate_key(1, "EUR")).await.unwrap().unwrap();
    assert_eq!(Quote::decode(cached.as_slice()).unwrap(), q);

    let again = svc.rates.get_rate(1, "eur").await.unwrap();
    assert_eq!(again, q);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // archive append runs in the background
    for _ in 0..50 {
        if store.row_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.row_count(), 1);
}

#[tokio::test]
async fn change_is_relative_to_the_row_a_day_old() {
    let stub = StubScraper::fixed("4.20", "4.30");
    let store = Arc::new(MemoryStore::with_sources([stub_source(1, "one")]));
    store_row(&store, 1, "EUR", 25, 4.0).await;
    store_row(&store, 1, "EUR", 1, 9.0).await;
    let svc = services_with(stub.registry(), store, Arc::new(MemoryCache::new()));

    let q = svc.rates.get_rate(1, "EUR").await.unwrap();
    assert!((q.change_24h - 5.0).abs() < 0.001, "{}", q.change_24h);
}

async fn store_row(store: &MemoryStore, source_id: i32, ccy: &str, hours_ago: i64, buy: f64) {
    use cantor_rates::store::HistoryStore;
    store
        .append(&RateRecord {
            time: Utc::now() - chrono::Duration::hours(hours_ago),
            source_id,
            currency: ccy.to_string(),
            buy,
            sell: buy + 0.05,
        })
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn fifty_concurrent_reads_share_one_scrape() {
    let stub = StubScraper::fixed("4.30", "4.35").with_delay(Duration::from_secs(1));
    let store = Arc::new(MemoryStore::with_sources([stub_source(1, "one")]));
    let svc = services_with(stub.registry(), store, Arc::new(MemoryCache::new()));

    let mut joins = Vec::new();
    for _ in 0..50 {
        let rates = svc.rates.clone();
        joins.push(tokio::spawn(async move { rates.get_rate(1, "EUR").await }));
    }
    let mut quotes = Vec::new();
    for j in joins {
        quotes.push(j.await.unwrap().unwrap());
    }
    assert_eq!(stub.call_count(), 1);
    assert!(quotes.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(svc.rates.inflight(), 0);
}

/// Answers its second `get` late: the value is read first, then the reply
/// is held back, as a slow cache round-trip would.
struct LaggingCache {
    inner: MemoryCache,
    gets: AtomicUsize,
    lag: Duration,
}

#[async_trait]
impl HotCache for LaggingCache {
    async fn get(&self, key: &str) -> RateResult<Option<Vec<u8>>> {
        let value = self.inner.get(key).await?;
        if self.gets.fetch_add(1, Ordering::SeqCst) == 1 {
            tokio::time::sleep(self.lag).await;
        }
        Ok(value)
    }
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> RateResult<()> {
        self.inner.set(key, value, ttl).await
    }
    async fn scan(&self, pattern: &str) -> RateResult<Vec<Vec<u8>>> {
        self.inner.scan(pattern).await
    }
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> RateResult<()> {
        self.inner.publish(topic, payload).await
    }
    async fn subscribe(&self, topic: &str) -> RateResult<Subscription> {
        self.inner.subscribe(topic).await
    }
    async fn ping(&self) -> RateResult<()> {
        self.inner.ping().await
    }
}

#[tokio::test(start_paused = true)]
async fn read_that_misses_before_a_flight_lands_reuses_its_result() {
    let stub = StubScraper::fixed("4.30", "4.35").with_delay(Duration::from_millis(100));
    let store = Arc::new(MemoryStore::with_sources([stub_source(1, "one")]));
    let cache = Arc::new(LaggingCache {
        inner: MemoryCache::new(),
        gets: AtomicUsize::new(0),
        lag: Duration::from_millis(300),
    });
    let svc = Services::new(
        store.clone(),
        store,
        cache,
        stub.registry(),
        ReadConfig::default(),
    );

    // the second reader sees a miss, but only reaches the flight after the
    // first one has finished and released its slot
    let (a, b) = tokio::join!(svc.rates.get_rate(1, "EUR"), svc.rates.get_rate(1, "EUR"));
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(stub.call_count(), 1);
    assert_eq!(svc.rates.inflight(), 0);
}

#[tokio::test]
async fn failures_map_to_taxonomy() {
    let stub = StubScraper::new(|_, ccy| match ccy {
        "CHF" => Err(ScrapeError::CurrencyNotFound(ccy.to_string())),
        "GBP" => Err(ScrapeError::HttpFailed("timed out".into())),
        _ => Ok(cantor_rates::model::RawQuote::new("0", "0")),
    });
    let store = Arc::new(MemoryStore::with_sources([stub_source(1, "one")]));
    let svc = services_with(stub.registry(), store, Arc::new(MemoryCache::new()));

    assert!(matches!(
        svc.rates.get_rate(99, "EUR").await,
        Err(RateError::NotFound(_))
    ));
    assert_eq!(
        svc.rates.get_rate(1, "CHF").await.unwrap_err(),
        RateError::CurrencyUnavailable("CHF".into())
    );
    assert!(matches!(
        svc.rates.get_rate(1, "GBP").await,
        Err(RateError::UpstreamHttp(_))
    ));
    // zero rates do not normalize
    assert!(matches!(
        svc.rates.get_rate(1, "USD").await,
        Err(RateError::UpstreamParse(_))
    ));
    assert!(matches!(
        svc.rates.get_rate(1, "EURO").await,
        Err(RateError::BadRequest(_))
    ));
    // 404 and 400 never reach the scraper
    assert_eq!(stub.call_count(), 3);
}

#[tokio::test]
async fn failed_reads_are_not_cached() {
    let stub = StubScraper::new(|_, _| Err(ScrapeError::ParseFailed("layout".into())));
    let store = Arc::new(MemoryStore::with_sources([stub_source(1, "one")]));
    let cache = Arc::new(MemoryCache::new());
    let svc = services_with(stub.registry(), store, cache.clone());

    assert!(svc.rates.get_rate(1, "EUR").await.is_err());
    assert!(svc.rates.get_rate(1, "EUR").await.is_err());
    assert_eq!(stub.call_count(), 2);
    assert!(cache.get(&rate_key(1, "EUR")).await.unwrap().is_none());
}

// tests/stream_rpc.rs
//
// Binary RPC surface driven through the router with `oneshot`.
// StreamRates bodies never end, so frames are read incrementally.
mod common;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body, Bytes},
    http::{Request, StatusCode},
    Router,
};
use futures::{Stream, StreamExt};
use prost::Message;
use tower::ServiceExt as _;

use cantor_rates::cache::{memory::MemoryCache, RATES_TOPIC};
use cantor_rates::harvest::HarvestConfig;
use cantor_rates::model::{Quote, RateListResponse, RateRequest, StreamRatesRequest};
use cantor_rates::read_path::ReadConfig;
use cantor_rates::store::memory::MemoryStore;
use cantor_rates::stream::{self, GET_ALL_RATES_PATH, GET_RATE_PATH, STREAM_RATES_PATH};
use cantor_rates::Services;

use common::{stub_source, StubScraper};

type Frames = Pin<Box<dyn Stream<Item = Result<Bytes, axum::Error>> + Send>>;

/// Incremental reader for length-delimited `Quote` frames.
struct QuoteReader {
    body: Frames,
    buf: Vec<u8>,
}

impl QuoteReader {
    fn new(body: Body) -> Self {
        Self {
            body: Box::pin(body.into_data_stream()),
            buf: Vec::new(),
        }
    }

    fn try_frame(&mut self) -> Option<Quote> {
        let len = prost::decode_length_delimiter(self.buf.as_slice()).ok()?;
        let start = prost::length_delimiter_len(len);
        if self.buf.len() < start + len {
            return None;
        }
        let quote = Quote::decode(&self.buf[start..start + len]).expect("valid quote frame");
        self.buf.drain(..start + len);
        Some(quote)
    }

    async fn next(&mut self) -> Option<Quote> {
        loop {
            if let Some(q) = self.try_frame() {
                return Some(q);
            }
            let chunk = self.body.next().await?.expect("body chunk");
            self.buf.extend_from_slice(&chunk);
        }
    }

    async fn next_within(&mut self, limit: Duration) -> Option<Quote> {
        tokio::time::timeout(limit, self.next()).await.ok().flatten()
    }
}

struct Rig {
    cache: Arc<MemoryCache>,
    services: Services,
    rpc: Router,
}

fn rig(stub: &StubScraper) -> Rig {
    let store = Arc::new(MemoryStore::with_sources([
        stub_source(1, "one"),
        stub_source(2, "two"),
    ]));
    let cache = Arc::new(MemoryCache::new());
    let services = Services::new(
        store.clone(),
        store,
        cache.clone(),
        stub.registry(),
        ReadConfig::default(),
    );
    let rpc = stream::router(services.rpc_state());
    Rig {
        cache,
        services,
        rpc,
    }
}

async fn call(app: &Router, path: &str, body: Vec<u8>) -> (StatusCode, Body) {
    let req = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/x-protobuf")
        .body(Body::from(body))
        .expect("build request");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    (resp.status(), resp.into_body())
}

async fn call_bytes(app: &Router, path: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
    let (status, body) = call(app, path, body).await;
    let bytes = body::to_bytes(body, 1024 * 1024).await.expect("read body");
    (status, bytes.to_vec())
}

async fn harvest(services: &Services, currencies: &[&str]) {
    let harvester = services.harvester(HarvestConfig {
        politeness: Duration::ZERO,
        currencies: currencies.iter().map(|c| c.to_string()).collect(),
        ..HarvestConfig::default()
    });
    harvester.run_cycle().await;
}

#[tokio::test]
async fn subscribers_get_filtered_quotes_in_publish_order() {
    let stub = StubScraper::new(|url, ccy| {
        if url.contains("two") {
            return Err(cantor_rates::scrape::ScrapeError::HttpFailed("down".into()));
        }
        Ok(match ccy {
            "EUR" => cantor_rates::model::RawQuote::new("4,30", "4,35"),
            _ => cantor_rates::model::RawQuote::new("3,95", "4,05"),
        })
    });
    let r = rig(&stub);

    let everything = StreamRatesRequest { currencies: vec![] }.encode_to_vec();
    let only_usd = StreamRatesRequest {
        currencies: vec!["usd".into()],
    }
    .encode_to_vec();
    let (status_a, body_a) = call(&r.rpc, STREAM_RATES_PATH, everything).await;
    let (status_b, body_b) = call(&r.rpc, STREAM_RATES_PATH, only_usd).await;
    assert_eq!(status_a, StatusCode::OK);
    assert_eq!(status_b, StatusCode::OK);
    assert_eq!(r.cache.subscriber_count(RATES_TOPIC), 2);

    harvest(&r.services, &["EUR", "USD"]).await;

    let mut a = QuoteReader::new(body_a);
    let mut b = QuoteReader::new(body_b);
    let first = a.next_within(Duration::from_secs(1)).await.expect("EUR frame");
    let second = a.next_within(Duration::from_secs(1)).await.expect("USD frame");
    assert_eq!((first.cantor_id, first.currency.as_str()), (1, "EUR"));
    assert_eq!(first.buy_rate, "4.300");
    assert_eq!((second.cantor_id, second.currency.as_str()), (1, "USD"));
    assert_eq!(second.sell_rate, "4.050");

    let usd = b.next_within(Duration::from_secs(1)).await.expect("USD frame");
    assert_eq!(usd, second);
    assert!(b.next_within(Duration::from_millis(100)).await.is_none());
    assert!(a.next_within(Duration::from_millis(100)).await.is_none());

    drop(a);
    drop(b);
    assert_eq!(r.cache.subscriber_count(RATES_TOPIC), 0);
}

#[tokio::test]
async fn malformed_stream_request_is_rejected() {
    let r = rig(&StubScraper::fixed("4.30", "4.35"));
    let (status, _) = call_bytes(&r.rpc, STREAM_RATES_PATH, vec![0xff, 0xff, 0xff]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(r.cache.subscriber_count(RATES_TOPIC), 0);
}

#[tokio::test]
async fn get_all_rates_returns_cached_quotes_by_cantor() {
    let stub = StubScraper::new(|url, _| {
        Ok(if url.contains("two") {
            cantor_rates::model::RawQuote::new("4,28", "4,33")
        } else {
            cantor_rates::model::RawQuote::new("4,30", "4,35")
        })
    });
    let r = rig(&stub);
    harvest(&r.services, &["EUR", "USD"]).await;

    let req = RateRequest {
        cantor_id: 0,
        currency: "eur".into(),
    };
    let (status, bytes) = call_bytes(&r.rpc, GET_ALL_RATES_PATH, req.encode_to_vec()).await;
    assert_eq!(status, StatusCode::OK);
    let list = RateListResponse::decode(bytes.as_slice()).unwrap();
    let ids: Vec<i32> = list.results.iter().map(|q| q.cantor_id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert!(list.results.iter().all(|q| q.currency == "EUR"));
    assert_eq!(list.results[1].buy_rate, "4.280");

    let none = RateRequest {
        cantor_id: 0,
        currency: "CHF".into(),
    };
    let (status, bytes) = call_bytes(&r.rpc, GET_ALL_RATES_PATH, none.encode_to_vec()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(RateListResponse::decode(bytes.as_slice()).unwrap().results.is_empty());

    let empty = RateRequest::default();
    let (status, _) = call_bytes(&r.rpc, GET_ALL_RATES_PATH, empty.encode_to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_rate_reads_through_the_cache() {
    let stub = StubScraper::fixed("4,30", "4,35");
    let r = rig(&stub);

    let req = RateRequest {
        cantor_id: 2,
        currency: "EUR".into(),
    };
    let (status, bytes) = call_bytes(&r.rpc, GET_RATE_PATH, req.encode_to_vec()).await;
    assert_eq!(status, StatusCode::OK);
    let q = Quote::decode(bytes.as_slice()).unwrap();
    assert_eq!((q.cantor_id, q.buy_rate.as_str()), (2, "4.300"));

    let (_, again) = call_bytes(&r.rpc, GET_RATE_PATH, req.encode_to_vec()).await;
    assert_eq!(Quote::decode(again.as_slice()).unwrap(), q);
    assert_eq!(stub.call_count(), 1);

    let missing = RateRequest {
        cantor_id: 77,
        currency: "EUR".into(),
    };
    let (status, _) = call_bytes(&r.rpc, GET_RATE_PATH, missing.encode_to_vec()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

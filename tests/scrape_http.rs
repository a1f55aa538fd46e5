// tests/scrape_http.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{http::HeaderMap, http::StatusCode, routing::get, Router};
use cantor_rates::model::RawQuote;
use cantor_rates::scrape::{Fetcher, ScrapeError, ScraperRegistry, BROWSER_USER_AGENT};
use parking_lot::Mutex;

use common::{c1_page, spawn_upstream};

async fn upstream(seen_agent: Arc<Mutex<Option<String>>>) -> String {
    let app = Router::new()
        .route(
            "/c1",
            get(move |headers: HeaderMap| {
                let seen = seen_agent.clone();
                async move {
                    *seen.lock() = headers
                        .get("user-agent")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    axum::response::Html(c1_page(&[("EUR", "4,30", "4,35")]))
                }
            }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                axum::response::Html(c1_page(&[("EUR", "4,30", "4,35")]))
            }),
        )
        .route("/gone", get(|| async { StatusCode::NOT_FOUND }))
        .route(
            "/plain",
            get(|| async { axum::response::Html("<html><p>closed today</p></html>") }),
        );
    let addr = spawn_upstream(app).await;
    format!("http://{addr}")
}

fn registry(timeout: Duration) -> ScraperRegistry {
    ScraperRegistry::with_builtin(Fetcher::new(timeout).unwrap())
}

#[tokio::test]
async fn builtin_parser_fetches_with_browser_user_agent() {
    let seen = Arc::new(Mutex::new(None));
    let base = upstream(seen.clone()).await;
    let reg = registry(Duration::from_secs(5));

    let q = reg.scrape("C1", &format!("{base}/c1"), "EUR").await.unwrap();
    assert_eq!(q, RawQuote::new("4,30", "4,35"));
    assert_eq!(seen.lock().as_deref(), Some(BROWSER_USER_AGENT));
}

#[tokio::test]
async fn failure_kinds_stay_distinct() {
    let base = upstream(Arc::new(Mutex::new(None))).await;
    let reg = registry(Duration::from_secs(1));

    let err = reg.scrape("C1", &format!("{base}/slow"), "EUR").await.unwrap_err();
    match err {
        ScrapeError::HttpFailed(msg) => assert!(msg.contains("timed out"), "{msg}"),
        other => panic!("expected http failure, got {other:?}"),
    }

    let err = reg.scrape("C1", &format!("{base}/gone"), "EUR").await.unwrap_err();
    assert!(matches!(err, ScrapeError::HttpFailed(_)));

    let err = reg.scrape("C1", &format!("{base}/plain"), "EUR").await.unwrap_err();
    assert!(matches!(err, ScrapeError::ParseFailed(_)));

    let err = reg.scrape("C1", &format!("{base}/c1"), "CHF").await.unwrap_err();
    assert_eq!(err, ScrapeError::CurrencyNotFound("CHF".into()));

    let err = reg.scrape("C99", &format!("{base}/c1"), "EUR").await.unwrap_err();
    assert_eq!(err, ScrapeError::NotRegistered("C99".into()));
}

#[tokio::test]
async fn unreachable_host_is_an_http_failure() {
    let reg = registry(Duration::from_secs(1));
    // port 9 on localhost: nothing listens there in CI
    let err = reg.scrape("C1", "http://127.0.0.1:9/", "EUR").await.unwrap_err();
    assert!(matches!(err, ScrapeError::HttpFailed(_)));
}

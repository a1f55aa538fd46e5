// src/stream.rs
//! Binary RPC surface. Requests and responses are protobuf bodies over plain
//! HTTP POST; `StreamRates` answers with an open-ended body of
//! length-delimited `Quote` frames.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use futures::{future, Stream, StreamExt};
use metrics::gauge;
use prost::Message;
use tower_http::trace::TraceLayer;

use crate::api::protobuf_response;
use crate::cache::{currency_pattern, HotCache, Subscription, RATES_TOPIC};
use crate::error::{RateError, RateResult};
use crate::model::{
    parse_currency, Quote, RateListResponse, RateRequest, StreamRatesRequest, PROTOBUF_MEDIA_TYPE,
};
use crate::read_path::RatesService;

pub const STREAM_RATES_PATH: &str = "/rates.v1.RatesService/StreamRates";
pub const GET_ALL_RATES_PATH: &str = "/rates.v1.RatesService/GetAllRates";
pub const GET_RATE_PATH: &str = "/rates.v1.RatesService/GetRate";

#[derive(Clone)]
pub struct RpcState {
    pub cache: Arc<dyn HotCache>,
    pub rates: RatesService,
}

pub fn router(state: RpcState) -> Router {
    Router::new()
        .route(STREAM_RATES_PATH, post(stream_rates))
        .route(GET_ALL_RATES_PATH, post(get_all_rates))
        .route(GET_RATE_PATH, post(get_rate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn decode_request<M: Message + Default>(body: &[u8]) -> RateResult<M> {
    M::decode(body).map_err(|e| RateError::BadRequest(format!("malformed request body: {e}")))
}

/// Uppercased currency filter; empty means everything.
pub fn currency_filter(currencies: &[String]) -> HashSet<String> {
    currencies
        .iter()
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Live gauge of open streams; decremented when the stream is dropped.
struct SubscriberGauge;

impl SubscriberGauge {
    fn acquire() -> Self {
        gauge!("stream_subscribers").increment(1.0);
        SubscriberGauge
    }
}

impl Drop for SubscriberGauge {
    fn drop(&mut self) {
        gauge!("stream_subscribers").decrement(1.0);
    }
}

/// Decode bus messages into quotes, dropping undecodable ones and those
/// outside `filter`. Dropping the returned stream closes the subscription.
pub fn rate_stream(
    sub: Subscription,
    filter: HashSet<String>,
) -> impl Stream<Item = Quote> + Send + 'static {
    let held = SubscriberGauge::acquire();
    sub.filter_map(move |bytes| {
        let _ = &held;
        let quote = match Quote::decode(bytes.as_slice()) {
            Ok(q) => Some(q),
            Err(e) => {
                tracing::debug!(error = %e, "dropping undecodable bus message");
                None
            }
        };
        future::ready(quote.filter(|q| filter.is_empty() || filter.contains(&q.currency)))
    })
}

async fn stream_rates(State(state): State<RpcState>, body: Bytes) -> RateResult<Response> {
    let req: StreamRatesRequest = decode_request(&body)?;
    let filter = currency_filter(&req.currencies);
    let sub = state.cache.subscribe(RATES_TOPIC).await?;
    tracing::info!(filter = ?filter, "stream subscriber connected");

    let frames = rate_stream(sub, filter)
        .map(|q| Ok::<_, Infallible>(Bytes::from(q.encode_length_delimited_to_vec())));
    Ok(([(CONTENT_TYPE, PROTOBUF_MEDIA_TYPE)], Body::from_stream(frames)).into_response())
}

/// Latest cached quote per cantor for one currency, ordered by cantor id.
pub async fn all_rates(cache: &dyn HotCache, currency: &str) -> RateResult<Vec<Quote>> {
    let currency = parse_currency(currency)
        .ok_or_else(|| RateError::BadRequest("currency is required".to_string()))?;
    let mut results: Vec<Quote> = cache
        .scan(&currency_pattern(&currency))
        .await?
        .into_iter()
        .filter_map(|bytes| Quote::decode(bytes.as_slice()).ok())
        .collect();
    results.sort_by_key(|q| q.cantor_id);
    Ok(results)
}

async fn get_all_rates(State(state): State<RpcState>, body: Bytes) -> RateResult<Response> {
    let req: RateRequest = decode_request(&body)?;
    let results = all_rates(state.cache.as_ref(), &req.currency).await?;
    Ok(protobuf_response(&RateListResponse { results }))
}

async fn get_rate(State(state): State<RpcState>, body: Bytes) -> RateResult<Response> {
    let req: RateRequest = decode_request(&body)?;
    let quote = state.rates.get_rate(req.cantor_id, &req.currency).await?;
    Ok(protobuf_response(&quote))
}

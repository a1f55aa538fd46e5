// src/api.rs
//! REST ingress. JSON by default; `Accept: application/x-protobuf` switches
//! the body to the binary encoding. Every route is also served under
//! `/api/v1`.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use prost::Message;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::cache::HotCache;
use crate::error::{RateError, RateResult};
use crate::harvest::HarvestTelemetry;
use crate::model::{parse_currency, CantorListResponse, HistoryResponse, PROTOBUF_MEDIA_TYPE};
use crate::read_path::RatesService;
use crate::store::{HistoryStore, SourceDirectory};

pub const DEFAULT_HISTORY_DAYS: i64 = 7;
pub const MAX_HISTORY_DAYS: i64 = 365;

#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<dyn SourceDirectory>,
    pub history: Arc<dyn HistoryStore>,
    pub cache: Arc<dyn HotCache>,
    pub rates: RatesService,
    pub telemetry: Arc<HarvestTelemetry>,
}

pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/healthz", get(healthz))
        .route("/cantors", get(cantors))
        .route("/rates", get(rates))
        .route("/history", get(history))
        .route("/debug/expensive-tasks", get(expensive_tasks));

    Router::new()
        .merge(routes.clone())
        .nest("/api/v1", routes)
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn wants_protobuf(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(PROTOBUF_MEDIA_TYPE))
}

pub fn protobuf_response<M: Message>(msg: &M) -> Response {
    ([(CONTENT_TYPE, PROTOBUF_MEDIA_TYPE)], msg.encode_to_vec()).into_response()
}

/// Binary body when asked for it, JSON otherwise.
fn negotiate<M: Message + Serialize>(headers: &HeaderMap, msg: &M) -> Response {
    if wants_protobuf(headers) {
        protobuf_response(msg)
    } else {
        Json(msg).into_response()
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> RateResult<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(RateError::BadRequest(format!("{name} is required"))),
    }
}

fn currency_param(value: &Option<String>) -> RateResult<String> {
    let raw = required(value, "currency")?;
    parse_currency(raw).ok_or_else(|| RateError::BadRequest(format!("invalid currency {raw:?}")))
}

fn cantor_id_param(raw: &str) -> RateResult<i32> {
    raw.parse::<i32>()
        .map_err(|_| RateError::BadRequest(format!("invalid cantor_id {raw:?}")))
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<&'static str>,
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<Health>) {
    let failing = if let Err(e) = state.history.ping().await {
        tracing::warn!(error = %e, "health: database ping failed");
        Some("database")
    } else if let Err(e) = state.cache.ping().await {
        tracing::warn!(error = %e, "health: cache ping failed");
        Some("cache")
    } else {
        None
    };
    match failing {
        None => (
            StatusCode::OK,
            Json(Health {
                status: "ok",
                service: None,
            }),
        ),
        Some(service) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(Health {
                status: "error",
                service: Some(service),
            }),
        ),
    }
}

async fn cantors(State(state): State<AppState>, headers: HeaderMap) -> RateResult<Response> {
    let cantors = state.directory.list().await?;
    if wants_protobuf(&headers) {
        return Ok(protobuf_response(&CantorListResponse { cantors }));
    }
    Ok(Json(cantors).into_response())
}

#[derive(Deserialize)]
struct RateQuery {
    cantor_id: Option<String>,
    currency: Option<String>,
}

async fn rates(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<RateQuery>,
) -> RateResult<Response> {
    let cantor_id = cantor_id_param(required(&q.cantor_id, "cantor_id")?)?;
    let currency = currency_param(&q.currency)?;
    let quote = state.rates.get_rate(cantor_id, &currency).await?;
    Ok(negotiate(&headers, &quote))
}

#[derive(Deserialize)]
struct HistoryQuery {
    currency: Option<String>,
    days: Option<String>,
    cantor_id: Option<String>,
}

async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<HistoryQuery>,
) -> RateResult<Response> {
    let currency = currency_param(&q.currency)?;
    let days = match q.days.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        None => DEFAULT_HISTORY_DAYS,
        Some(raw) => match raw.parse::<i64>() {
            Ok(d) if (1..=MAX_HISTORY_DAYS).contains(&d) => d,
            _ => return Err(RateError::BadRequest(format!("invalid days {raw:?}"))),
        },
    };
    let source_id = match q.cantor_id.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        None => None,
        Some(raw) => {
            let id = cantor_id_param(raw)?;
            // unknown cantor is 404, not an empty series
            state.directory.get(id).await?;
            Some(id)
        }
    };

    let since = Utc::now() - chrono::Duration::days(days);
    let points = state.history.range(&currency, since, source_id).await?;
    Ok(negotiate(&headers, &HistoryResponse { points, currency }))
}

async fn expensive_tasks(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.telemetry.summary())
}

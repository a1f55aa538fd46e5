// src/error.rs
//! Error taxonomy shared by the read path, the ingress and the RPC surface.
//!
//! The `String` payloads carry internal detail for logs. Responses only expose
//! the class and a short public message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::scrape::ScrapeError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RateError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream http failure: {0}")]
    UpstreamHttp(String),

    #[error("upstream parse failure: {0}")]
    UpstreamParse(String),

    #[error("currency {0} unavailable at source")]
    CurrencyUnavailable(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type RateResult<T> = Result<T, RateError>;

impl RateError {
    /// Stable class name exposed to clients.
    pub fn class(&self) -> &'static str {
        match self {
            RateError::BadRequest(_) => "bad-request",
            RateError::NotFound(_) => "not-found",
            RateError::UpstreamHttp(_) => "upstream-http",
            RateError::UpstreamParse(_) => "upstream-parse",
            RateError::CurrencyUnavailable(_) => "currency-unavailable",
            RateError::Store(_) => "store-error",
            RateError::Cache(_) => "cache-error",
            RateError::Serialization(_) => "serialization-error",
            RateError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RateError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RateError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to clients: no SQL, store ids or parser internals.
    pub fn public_message(&self) -> String {
        match self {
            RateError::BadRequest(m) | RateError::NotFound(m) => m.clone(),
            RateError::UpstreamHttp(_) => "cantor page could not be fetched".to_string(),
            RateError::UpstreamParse(_) => "cantor page could not be parsed".to_string(),
            RateError::CurrencyUnavailable(c) => format!("currency {c} is not quoted by this cantor"),
            RateError::Store(_) => "storage unavailable".to_string(),
            RateError::Cache(_) => "cache unavailable".to_string(),
            RateError::Serialization(_) => "rate could not be encoded".to_string(),
            RateError::Internal(_) => "internal error".to_string(),
        }
    }
}

impl From<ScrapeError> for RateError {
    fn from(e: ScrapeError) -> Self {
        match e {
            ScrapeError::HttpFailed(m) => RateError::UpstreamHttp(m),
            ScrapeError::ParseFailed(m) => RateError::UpstreamParse(m),
            ScrapeError::CurrencyNotFound(c) => RateError::CurrencyUnavailable(c),
            ScrapeError::NotRegistered(tag) => {
                RateError::UpstreamParse(format!("no parser registered for strategy {tag}"))
            }
        }
    }
}

impl From<prost::DecodeError> for RateError {
    fn from(e: prost::DecodeError) -> Self {
        RateError::Serialization(e.to_string())
    }
}

#[derive(serde::Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for RateError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, class = self.class(), "request failed");
        }
        let body = ErrorBody {
            error: self.class(),
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

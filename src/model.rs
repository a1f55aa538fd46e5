// src/model.rs
//! Core data types shared by the harvester, the read path and both network
//! surfaces.
//!
//! The wire messages (`Quote`, `HistoryResponse`, stream requests) derive both
//! `prost::Message` (compact binary, `application/x-protobuf`) and serde
//! (JSON, camelCase). Tags are fixed; never renumber them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Currencies visited by every harvest cycle, in harvest order.
pub const HARVEST_CURRENCIES: [&str; 16] = [
    "EUR", "USD", "GBP", "AUD", "DKK", "NOK", "CHF", "SEK", "CZK", "HUF", "UAH", "BGN", "RON",
    "TRY", "ISK", "LEK",
];

/// Media type that selects the binary encoding on every surface.
pub const PROTOBUF_MEDIA_TYPE: &str = "application/x-protobuf";

/// A cantor: a third-party exchange with an HTML rate page.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Source {
    #[prost(int32, tag = "1")]
    pub id: i32,
    /// Short machine name, unique across the directory.
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub display_name: String,
    #[prost(string, tag = "4")]
    pub base_url: String,
    /// Tag of the parser registered in the scraper registry (e.g. "C1").
    #[prost(string, tag = "5")]
    pub strategy: String,
    /// Quotes on the page are per `units` of currency.
    #[prost(int32, tag = "6")]
    pub units: i32,
    #[prost(double, tag = "7")]
    pub latitude: f64,
    #[prost(double, tag = "8")]
    pub longitude: f64,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CantorListResponse {
    #[prost(message, repeated, tag = "1")]
    pub cantors: Vec<Source>,
}

/// Buy/sell strings exactly as captured from the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawQuote {
    pub buy: String,
    pub sell: String,
}

impl RawQuote {
    pub fn new(buy: impl Into<String>, sell: impl Into<String>) -> Self {
        Self {
            buy: buy.into(),
            sell: sell.into(),
        }
    }
}

/// A normalized quote for one (cantor, currency) at an instant.
///
/// Rates travel as strings with three fractional digits; `change_24h == 0.0`
/// means "unknown".
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Quote {
    #[prost(string, tag = "1")]
    pub buy_rate: String,
    #[prost(string, tag = "2")]
    pub sell_rate: String,
    #[prost(int32, tag = "3")]
    pub cantor_id: i32,
    #[prost(string, tag = "4")]
    pub currency: String,
    #[prost(int64, tag = "5")]
    pub fetched_at: i64,
    #[serde(rename = "change24h")]
    #[prost(double, tag = "6")]
    pub change_24h: f64,
}

impl Quote {
    pub fn new(cantor_id: i32, currency: &str, buy: f64, sell: f64, fetched_at: i64) -> Self {
        Self {
            buy_rate: format_rate(buy),
            sell_rate: format_rate(sell),
            cantor_id,
            currency: currency.to_string(),
            fetched_at,
            change_24h: 0.0,
        }
    }

    pub fn with_change(mut self, change_24h: Option<f64>) -> Self {
        self.change_24h = change_24h.unwrap_or(0.0);
        self
    }

    pub fn buy(&self) -> f64 {
        self.buy_rate.parse().unwrap_or(0.0)
    }

    pub fn sell(&self) -> f64 {
        self.sell_rate.parse().unwrap_or(0.0)
    }
}

/// One aggregated bucket (or raw point) on the history surface.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryPoint {
    /// Bucket start, seconds since epoch.
    #[prost(int64, tag = "1")]
    pub time: i64,
    #[prost(double, tag = "2")]
    pub buy_rate: f64,
    #[prost(double, tag = "3")]
    pub sell_rate: f64,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryResponse {
    #[prost(message, repeated, tag = "1")]
    pub points: Vec<HistoryPoint>,
    #[prost(string, tag = "2")]
    pub currency: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamRatesRequest {
    /// Empty means every currency.
    #[prost(string, repeated, tag = "1")]
    pub currencies: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateRequest {
    #[prost(int32, tag = "1")]
    pub cantor_id: i32,
    #[prost(string, tag = "2")]
    pub currency: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateListResponse {
    #[prost(message, repeated, tag = "1")]
    pub results: Vec<Quote>,
}

/// A row of the time-series store.
#[derive(Debug, Clone, PartialEq)]
pub struct RateRecord {
    pub time: DateTime<Utc>,
    pub source_id: i32,
    pub currency: String,
    pub buy: f64,
    pub sell: f64,
}

/// External string form of a rate: three fractional digits.
pub fn format_rate(v: f64) -> String {
    format!("{:.3}", v)
}

/// Uppercase a currency code and check it is three ASCII letters.
pub fn parse_currency(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code)
    } else {
        None
    }
}

/// Percentage change of `buy` relative to `previous`; `None` when no usable
/// baseline exists.
pub fn change_percent(buy: f64, previous: Option<f64>) -> Option<f64> {
    match previous {
        Some(prev) if prev > 0.0 => Some((buy - prev) / prev * 100.0),
        _ => None,
    }
}

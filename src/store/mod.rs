// src/store/mod.rs
//! Durable state: the source directory and the time-series rate history.
//!
//! Two backends implement both traits: [`memory::MemoryStore`] (tests, local
//! runs without a database) and [`postgres::PgStore`] (PostgreSQL, with a
//! TimescaleDB hypertable when the extension is available).

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RateResult;
use crate::model::{change_percent, HistoryPoint, RateRecord, Source};

/// Width of a history aggregation bucket.
pub const BUCKET_SECS: i64 = 3600;

/// Default days kept in the history (at least the 7 queried by clients).
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

#[async_trait]
pub trait SourceDirectory: Send + Sync {
    async fn list(&self) -> RateResult<Vec<Source>>;

    /// `NotFound` when no source has this id.
    async fn get(&self, id: i32) -> RateResult<Source>;

    /// Insert or update by id. Used for seeding at startup.
    async fn upsert(&self, source: &Source) -> RateResult<()>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Idempotent on (time, source, currency). Returns false when the row
    /// already existed.
    async fn append(&self, record: &RateRecord) -> RateResult<bool>;

    /// Most recent buy rate at or before `cutoff`.
    async fn latest_before(
        &self,
        source_id: i32,
        currency: &str,
        cutoff: DateTime<Utc>,
    ) -> RateResult<Option<f64>>;

    /// Hourly buckets since `since`, ascending, averaged across rows (and
    /// across sources unless `source_id` is given).
    async fn range(
        &self,
        currency: &str,
        since: DateTime<Utc>,
        source_id: Option<i32>,
    ) -> RateResult<Vec<HistoryPoint>>;

    /// Drop rows older than `before`; returns how many went.
    async fn prune(&self, before: DateTime<Utc>) -> RateResult<u64>;

    async fn ping(&self) -> RateResult<()>;
}

/// Percent change of `buy` against the latest buy at or before `now - 24h`.
///
/// Lookup failures and deadline overruns yield `None`; the change is optional
/// on every surface.
pub async fn change_24h(
    history: &dyn HistoryStore,
    source_id: i32,
    currency: &str,
    buy: f64,
    now: DateTime<Utc>,
    deadline: Duration,
) -> Option<f64> {
    let cutoff = now - chrono::Duration::hours(24);
    match tokio::time::timeout(deadline, history.latest_before(source_id, currency, cutoff)).await
    {
        Ok(Ok(prev)) => change_percent(buy, prev),
        Ok(Err(e)) => {
            tracing::debug!(source_id, currency, error = %e, "24h lookup failed");
            None
        }
        Err(_) => {
            tracing::debug!(source_id, currency, "24h lookup timed out");
            None
        }
    }
}

/// Start of the 1h bucket containing `ts` (seconds since epoch).
pub fn bucket_start(ts: i64) -> i64 {
    ts - ts.rem_euclid(BUCKET_SECS)
}

// src/store/postgres.rs
//! PostgreSQL backend. `rates` becomes a TimescaleDB hypertable when the
//! extension is installed; plain Postgres works too (buckets are computed from
//! epoch seconds, not `time_bucket`).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use super::{HistoryStore, SourceDirectory, BUCKET_SECS};
use crate::error::{RateError, RateResult};
use crate::model::{HistoryPoint, RateRecord, Source};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS sources (
        id           SERIAL PRIMARY KEY,
        name         TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        base_url     TEXT NOT NULL,
        strategy     TEXT NOT NULL,
        units        INTEGER NOT NULL DEFAULT 1 CHECK (units > 0),
        latitude     DOUBLE PRECISION NOT NULL DEFAULT 0,
        longitude    DOUBLE PRECISION NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS rates (
        time      TIMESTAMPTZ NOT NULL,
        source_id INTEGER NOT NULL REFERENCES sources (id),
        currency  TEXT NOT NULL,
        buy_rate  NUMERIC(14, 4) NOT NULL,
        sell_rate NUMERIC(14, 4) NOT NULL,
        UNIQUE (time, source_id, currency)
    )"#,
    r#"CREATE INDEX IF NOT EXISTS rates_source_currency_time_idx
        ON rates (source_id, currency, time DESC)"#,
];

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: i32,
    name: String,
    display_name: String,
    base_url: String,
    strategy: String,
    units: i32,
    latitude: f64,
    longitude: f64,
}

impl From<SourceRow> for Source {
    fn from(r: SourceRow) -> Self {
        Source {
            id: r.id,
            name: r.name,
            display_name: r.display_name,
            base_url: r.base_url,
            strategy: r.strategy,
            units: r.units,
            latitude: r.latitude,
            longitude: r.longitude,
        }
    }
}

impl From<sqlx::Error> for RateError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RateError::NotFound("row not found".to_string()),
            other => RateError::Store(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> RateResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Create tables if missing, then try to turn `rates` into a hypertable
    /// with a retention policy. Timescale steps are best-effort.
    pub async fn init_schema(&self, retention_days: i64) -> RateResult<()> {
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await?;
        }

        let hypertable =
            sqlx::query("SELECT create_hypertable('rates', 'time', if_not_exists => TRUE)")
                .execute(&self.pool)
                .await;
        match hypertable {
            Ok(_) => {
                let policy = format!(
                    "SELECT add_retention_policy('rates', INTERVAL '{} days', if_not_exists => TRUE)",
                    retention_days.max(7)
                );
                if let Err(e) = sqlx::query(&policy).execute(&self.pool).await {
                    tracing::warn!(error = %e, "timescale retention policy not installed");
                }
            }
            Err(e) => {
                tracing::info!(error = %e, "timescaledb unavailable; using a plain rates table");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SourceDirectory for PgStore {
    async fn list(&self) -> RateResult<Vec<Source>> {
        let rows: Vec<SourceRow> = sqlx::query_as(
            "SELECT id, name, display_name, base_url, strategy, units, latitude, longitude \
             FROM sources ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Source::from).collect())
    }

    async fn get(&self, id: i32) -> RateResult<Source> {
        let row: Option<SourceRow> = sqlx::query_as(
            "SELECT id, name, display_name, base_url, strategy, units, latitude, longitude \
             FROM sources WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Source::from)
            .ok_or_else(|| RateError::NotFound(format!("no cantor with id {id}")))
    }

    async fn upsert(&self, source: &Source) -> RateResult<()> {
        sqlx::query(
            "INSERT INTO sources (id, name, display_name, base_url, strategy, units, latitude, longitude) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
               name = EXCLUDED.name, display_name = EXCLUDED.display_name, \
               base_url = EXCLUDED.base_url, strategy = EXCLUDED.strategy, \
               units = EXCLUDED.units, latitude = EXCLUDED.latitude, longitude = EXCLUDED.longitude",
        )
        .bind(source.id)
        .bind(&source.name)
        .bind(&source.display_name)
        .bind(&source.base_url)
        .bind(&source.strategy)
        .bind(source.units.max(1))
        .bind(source.latitude)
        .bind(source.longitude)
        .execute(&self.pool)
        .await?;

        // Explicit ids bypass the serial; keep it ahead for out-of-band inserts.
        sqlx::query(
            "SELECT setval(pg_get_serial_sequence('sources', 'id'), \
             GREATEST((SELECT MAX(id) FROM sources), 1))",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for PgStore {
    async fn append(&self, record: &RateRecord) -> RateResult<bool> {
        let done = sqlx::query(
            "INSERT INTO rates (time, source_id, currency, buy_rate, sell_rate) \
             VALUES ($1, $2, $3, $4::float8, $5::float8) \
             ON CONFLICT (time, source_id, currency) DO NOTHING",
        )
        .bind(record.time)
        .bind(record.source_id)
        .bind(&record.currency)
        .bind(record.buy)
        .bind(record.sell)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn latest_before(
        &self,
        source_id: i32,
        currency: &str,
        cutoff: DateTime<Utc>,
    ) -> RateResult<Option<f64>> {
        let row: Option<(f64,)> = sqlx::query_as(
            "SELECT buy_rate::float8 FROM rates \
             WHERE source_id = $1 AND currency = $2 AND time <= $3 \
             ORDER BY time DESC LIMIT 1",
        )
        .bind(source_id)
        .bind(currency)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(buy,)| buy))
    }

    async fn range(
        &self,
        currency: &str,
        since: DateTime<Utc>,
        source_id: Option<i32>,
    ) -> RateResult<Vec<HistoryPoint>> {
        let sql = format!(
            "SELECT (floor(EXTRACT(EPOCH FROM time) / {BUCKET_SECS}) * {BUCKET_SECS})::bigint AS bucket, \
                    AVG(buy_rate)::float8, AVG(sell_rate)::float8 \
             FROM rates \
             WHERE currency = $1 AND time >= $2 AND ($3::int IS NULL OR source_id = $3) \
             GROUP BY bucket ORDER BY bucket ASC"
        );
        let rows: Vec<(i64, f64, f64)> = sqlx::query_as(&sql)
            .bind(currency)
            .bind(since)
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(time, buy_rate, sell_rate)| HistoryPoint {
                time,
                buy_rate,
                sell_rate,
            })
            .collect())
    }

    async fn prune(&self, before: DateTime<Utc>) -> RateResult<u64> {
        let done = sqlx::query("DELETE FROM rates WHERE time < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn ping(&self) -> RateResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// src/read_path.rs
//! Point reads: cache first, otherwise a single-flight scrape that refreshes
//! the cache and archives the quote in the background.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use prost::Message;

use crate::cache::{rate_key, HotCache, DEFAULT_CACHE_TTL};
use crate::error::{RateError, RateResult};
use crate::flight::SingleFlight;
use crate::model::{parse_currency, Quote, RateRecord};
use crate::normalize::normalize;
use crate::scrape::ScraperRegistry;
use crate::store::{change_24h, HistoryStore, SourceDirectory};

#[derive(Debug, Clone)]
pub struct ReadConfig {
    pub cache_ttl: Duration,
    pub lookup_timeout: Duration,
    pub append_timeout: Duration,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            lookup_timeout: Duration::from_secs(2),
            append_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct RatesService {
    directory: Arc<dyn SourceDirectory>,
    history: Arc<dyn HistoryStore>,
    cache: Arc<dyn HotCache>,
    registry: Arc<ScraperRegistry>,
    flight: SingleFlight<Quote>,
    cfg: ReadConfig,
}

impl RatesService {
    pub fn new(
        directory: Arc<dyn SourceDirectory>,
        history: Arc<dyn HistoryStore>,
        cache: Arc<dyn HotCache>,
        registry: Arc<ScraperRegistry>,
        cfg: ReadConfig,
    ) -> Self {
        Self {
            directory,
            history,
            cache,
            registry,
            flight: SingleFlight::new(),
            cfg,
        }
    }

    /// Latest quote for one cantor and currency.
    pub async fn get_rate(&self, source_id: i32, currency: &str) -> RateResult<Quote> {
        let currency = parse_currency(currency)
            .ok_or_else(|| RateError::BadRequest(format!("invalid currency {currency:?}")))?;
        let key = rate_key(source_id, &currency);

        if let Some(quote) = self.cached(&key).await? {
            counter!("read_cache_hits_total").increment(1);
            return Ok(quote);
        }
        counter!("read_cache_misses_total").increment(1);

        let this = self.clone();
        let flight_key = key.clone();
        self.flight
            .run(&flight_key, move || async move {
                this.resolve(source_id, currency, key).await
            })
            .await
    }

    async fn cached(&self, key: &str) -> RateResult<Option<Quote>> {
        let Some(bytes) = self.cache.get(key).await? else {
            return Ok(None);
        };
        match Quote::decode(bytes.as_slice()) {
            Ok(quote) => Ok(Some(quote)),
            Err(e) => {
                tracing::debug!(cache_key = %key, error = %e, "undecodable cache entry; refetching");
                Ok(None)
            }
        }
    }

    async fn resolve(&self, source_id: i32, currency: String, key: String) -> RateResult<Quote> {
        // a flight that finished after our miss may already have filled the key
        if let Some(quote) = self.cached(&key).await? {
            return Ok(quote);
        }
        let source = self.directory.get(source_id).await?;
        let raw = self
            .registry
            .scrape(&source.strategy, &source.base_url, &currency)
            .await?;
        let rates = normalize(&raw, source.units)?;

        let now = Utc::now();
        let change = change_24h(
            self.history.as_ref(),
            source_id,
            &currency,
            rates.buy,
            now,
            self.cfg.lookup_timeout,
        )
        .await;
        let quote =
            Quote::new(source_id, &currency, rates.buy, rates.sell, now.timestamp()).with_change(change);

        if let Err(e) = self
            .cache
            .set(&key, quote.encode_to_vec(), self.cfg.cache_ttl)
            .await
        {
            tracing::warn!(cache_key = %key, error = %e, "cache write failed after scrape");
        }

        let history = Arc::clone(&self.history);
        let deadline = self.cfg.append_timeout;
        let record = RateRecord {
            time: now,
            source_id,
            currency,
            buy: rates.buy,
            sell: rates.sell,
        };
        tokio::spawn(async move {
            match tokio::time::timeout(deadline, history.append(&record)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(
                    source_id = record.source_id,
                    currency = %record.currency,
                    error = %e,
                    "archive append failed"
                ),
                Err(_) => tracing::warn!(
                    source_id = record.source_id,
                    currency = %record.currency,
                    "archive append timed out"
                ),
            }
        });

        Ok(quote)
    }

    pub fn inflight(&self) -> usize {
        self.flight.inflight_count()
    }
}

// src/harvest/mod.rs
//! Periodic harvester: every cycle visits Source x Currency, scrapes,
//! normalizes, persists, caches and publishes.
//!
//! Steps never fail the cycle. Within a source they run one after another
//! behind the politeness delay; sources run in parallel up to a bound.

pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{stream, StreamExt};
use metrics::{counter, gauge, histogram};
use prost::Message;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cache::{rate_key, HotCache, DEFAULT_CACHE_TTL, RATES_TOPIC};
use crate::error::{RateError, RateResult};
use crate::journal::QuoteJournal;
use crate::model::{Quote, RateRecord, Source, HARVEST_CURRENCIES};
use crate::normalize::normalize;
use crate::scrape::ScraperRegistry;
use crate::store::{change_24h, HistoryStore, SourceDirectory, DEFAULT_RETENTION_DAYS};

pub use telemetry::{HarvestTelemetry, TelemetrySummary};

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub interval: Duration,
    /// Delay before every request to the same source.
    pub politeness: Duration,
    pub max_parallel_sources: usize,
    pub cache_ttl: Duration,
    pub append_timeout: Duration,
    pub lookup_timeout: Duration,
    pub retention_days: i64,
    pub currencies: Vec<String>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            politeness: Duration::from_millis(500),
            max_parallel_sources: 4,
            cache_ttl: DEFAULT_CACHE_TTL,
            append_timeout: Duration::from_secs(5),
            lookup_timeout: Duration::from_secs(2),
            retention_days: DEFAULT_RETENTION_DAYS,
            currencies: HARVEST_CURRENCIES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub attempted: usize,
    pub succeeded: usize,
}

impl CycleReport {
    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }

    fn merge(mut self, other: CycleReport) -> Self {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self
    }
}

#[derive(Clone)]
pub struct Harvester {
    directory: Arc<dyn SourceDirectory>,
    history: Arc<dyn HistoryStore>,
    cache: Arc<dyn HotCache>,
    registry: Arc<ScraperRegistry>,
    journal: Option<Arc<dyn QuoteJournal>>,
    telemetry: Arc<HarvestTelemetry>,
    cfg: HarvestConfig,
}

impl Harvester {
    pub fn new(
        directory: Arc<dyn SourceDirectory>,
        history: Arc<dyn HistoryStore>,
        cache: Arc<dyn HotCache>,
        registry: Arc<ScraperRegistry>,
        telemetry: Arc<HarvestTelemetry>,
        cfg: HarvestConfig,
    ) -> Self {
        Self {
            directory,
            history,
            cache,
            registry,
            journal: None,
            telemetry,
            cfg,
        }
    }

    pub fn with_journal(mut self, journal: Arc<dyn QuoteJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.cfg
    }

    /// Run one cycle now, then one per interval, forever.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.cfg.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let started = Instant::now();
                let report = self.run_cycle().await;
                tracing::info!(
                    target: "harvest",
                    attempted = report.attempted,
                    succeeded = report.succeeded,
                    failed = report.failed(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "harvest cycle finished"
                );
            }
        })
    }

    /// One full pass over every source and currency.
    pub async fn run_cycle(&self) -> CycleReport {
        let sources = match self.directory.list().await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(target: "harvest", error = %e, "cannot list sources; cycle skipped");
                return CycleReport::default();
            }
        };

        let parallel = self.cfg.max_parallel_sources.max(1);
        let report = stream::iter(sources)
            .map(|source| self.harvest_source(source))
            .buffer_unordered(parallel)
            .fold(CycleReport::default(), |acc, r| async move { acc.merge(r) })
            .await;

        self.prune_history().await;

        counter!("harvest_cycles_total").increment(1);
        gauge!("harvest_last_cycle_ts").set(Utc::now().timestamp() as f64);
        report
    }

    async fn harvest_source(&self, source: Source) -> CycleReport {
        let mut report = CycleReport::default();
        for currency in &self.cfg.currencies {
            if !self.cfg.politeness.is_zero() {
                tokio::time::sleep(self.cfg.politeness).await;
            }
            report.attempted += 1;
            match self.step(&source, currency).await {
                Ok(quote) => {
                    report.succeeded += 1;
                    counter!("harvest_steps_total", "outcome" => "ok").increment(1);
                    tracing::debug!(
                        target: "harvest",
                        source = %source.name,
                        currency = %currency,
                        buy = %quote.buy_rate,
                        sell = %quote.sell_rate,
                        "harvested"
                    );
                }
                Err(e) => {
                    counter!("harvest_steps_total", "outcome" => e.class()).increment(1);
                    tracing::warn!(
                        target: "harvest",
                        source = %source.name,
                        currency = %currency,
                        error = %e,
                        "harvest step skipped"
                    );
                }
            }
        }
        report
    }

    /// Scrape, normalize, persist, cache, publish one (source, currency).
    /// The recorded duration covers the whole step, failed or not.
    pub async fn step(&self, source: &Source, currency: &str) -> RateResult<Quote> {
        let started = Instant::now();
        let outcome = self.run_step(source, currency).await;
        let elapsed = started.elapsed();
        self.telemetry.record(&source.name, elapsed);
        histogram!("harvest_step_ms").record(elapsed.as_secs_f64() * 1_000.0);
        outcome
    }

    async fn run_step(&self, source: &Source, currency: &str) -> RateResult<Quote> {
        let fetched_at = Utc::now();
        let raw = self
            .registry
            .scrape(&source.strategy, &source.base_url, currency)
            .await?;
        let rates = normalize(&raw, source.units)?;

        let change = change_24h(
            self.history.as_ref(),
            source.id,
            currency,
            rates.buy,
            fetched_at,
            self.cfg.lookup_timeout,
        )
        .await;
        let quote = Quote::new(source.id, currency, rates.buy, rates.sell, fetched_at.timestamp())
            .with_change(change);
        let payload = quote.encode_to_vec();

        let record = RateRecord {
            time: fetched_at,
            source_id: source.id,
            currency: currency.to_string(),
            buy: rates.buy,
            sell: rates.sell,
        };
        let key = rate_key(source.id, currency);
        let (appended, cached) = tokio::join!(
            tokio::time::timeout(self.cfg.append_timeout, self.history.append(&record)),
            self.cache.set(&key, payload.clone(), self.cfg.cache_ttl),
        );
        appended.map_err(|_| RateError::Store("history append timed out".to_string()))??;
        cached?;

        // Set before publish: subscribers must never see a quote the cache lacks.
        self.cache.publish(RATES_TOPIC, payload).await?;

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&quote).await {
                tracing::debug!(target: "harvest", currency, error = %e, "journal append failed");
            }
        }
        Ok(quote)
    }

    async fn prune_history(&self) {
        let days = self.cfg.retention_days.max(7);
        let before = Utc::now() - chrono::Duration::days(days);
        match self.history.prune(before).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(target: "harvest", rows = n, "pruned history"),
            Err(e) => tracing::warn!(target: "harvest", error = %e, "history prune failed"),
        }
    }
}

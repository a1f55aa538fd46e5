// src/app.rs
//! Backend selection and wiring shared by `main` and the integration tests.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::AppState;
use crate::cache::{memory::MemoryCache, redis::RedisCache, HotCache};
use crate::config::{sources, AppConfig};
use crate::harvest::{HarvestConfig, HarvestTelemetry, Harvester};
use crate::journal::{FileJournal, QuoteJournal};
use crate::model::Source;
use crate::read_path::{RatesService, ReadConfig};
use crate::scrape::{Fetcher, ScraperRegistry};
use crate::store::{memory::MemoryStore, postgres::PgStore, HistoryStore, SourceDirectory};
use crate::stream::RpcState;

#[derive(Clone)]
pub struct Services {
    pub directory: Arc<dyn SourceDirectory>,
    pub history: Arc<dyn HistoryStore>,
    pub cache: Arc<dyn HotCache>,
    pub registry: Arc<ScraperRegistry>,
    pub telemetry: Arc<HarvestTelemetry>,
    pub journal: Option<Arc<dyn QuoteJournal>>,
    pub rates: RatesService,
}

impl Services {
    pub fn new(
        directory: Arc<dyn SourceDirectory>,
        history: Arc<dyn HistoryStore>,
        cache: Arc<dyn HotCache>,
        registry: ScraperRegistry,
        read: ReadConfig,
    ) -> Self {
        let registry = Arc::new(registry);
        let rates = RatesService::new(
            Arc::clone(&directory),
            Arc::clone(&history),
            Arc::clone(&cache),
            Arc::clone(&registry),
            read,
        );
        Self {
            directory,
            history,
            cache,
            registry,
            telemetry: Arc::new(HarvestTelemetry::new()),
            journal: None,
            rates,
        }
    }

    /// Everything in process: memory store seeded with `sources`, memory cache.
    pub fn in_memory(registry: ScraperRegistry, sources: Vec<Source>) -> Self {
        let store = Arc::new(MemoryStore::with_sources(sources));
        Self::new(
            store.clone(),
            store,
            Arc::new(MemoryCache::new()),
            registry,
            ReadConfig::default(),
        )
    }

    /// Pick backends from configuration and seed the source directory.
    pub async fn from_config(cfg: &AppConfig) -> Result<Self> {
        let (directory, history): (Arc<dyn SourceDirectory>, Arc<dyn HistoryStore>) =
            match &cfg.database_url {
                Some(url) => {
                    let pg = PgStore::connect(url)
                        .await
                        .context("connecting to DATABASE_URL")?;
                    pg.init_schema(cfg.retention_days)
                        .await
                        .context("initializing schema")?;
                    tracing::info!("using postgres store");
                    let pg = Arc::new(pg);
                    let directory: Arc<dyn SourceDirectory> = pg.clone();
                    let history: Arc<dyn HistoryStore> = pg;
                    (directory, history)
                }
                None => {
                    tracing::info!("DATABASE_URL unset; using in-memory store");
                    let mem = Arc::new(MemoryStore::new());
                    let directory: Arc<dyn SourceDirectory> = mem.clone();
                    let history: Arc<dyn HistoryStore> = mem;
                    (directory, history)
                }
            };

        let cache: Arc<dyn HotCache> = match &cfg.redis_url {
            Some(url) => {
                let redis = RedisCache::connect(url)
                    .await
                    .context("connecting to REDIS_URL")?;
                tracing::info!("using redis cache and bus");
                Arc::new(redis)
            }
            None => {
                tracing::info!("REDIS_URL unset; using in-process cache and bus");
                Arc::new(MemoryCache::new())
            }
        };

        let seeds = sources::load_sources_or_empty(&cfg.sources_path)?;
        let seeded = sources::seed_directory(directory.as_ref(), &seeds).await?;
        tracing::info!(sources = seeded, path = %cfg.sources_path.display(), "source directory seeded");

        let fetcher = Fetcher::new(cfg.scrape_timeout).context("building http client")?;
        let registry = ScraperRegistry::with_builtin(fetcher);
        for s in &seeds {
            if registry.lookup(&s.strategy).is_err() {
                tracing::warn!(source = %s.name, strategy = %s.strategy, "no parser for strategy");
            }
        }

        let mut services = Self::new(directory, history, cache, registry, cfg.read.clone());
        if let Some(dir) = &cfg.journal_dir {
            let journal = FileJournal::open(dir)
                .await
                .with_context(|| format!("opening journal dir {}", dir.display()))?;
            tracing::info!(dir = %dir.display(), "persistent rate journal enabled");
            services.journal = Some(Arc::new(journal));
        }
        Ok(services)
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            directory: Arc::clone(&self.directory),
            history: Arc::clone(&self.history),
            cache: Arc::clone(&self.cache),
            rates: self.rates.clone(),
            telemetry: Arc::clone(&self.telemetry),
        }
    }

    pub fn rpc_state(&self) -> RpcState {
        RpcState {
            cache: Arc::clone(&self.cache),
            rates: self.rates.clone(),
        }
    }

    pub fn harvester(&self, cfg: HarvestConfig) -> Harvester {
        let harvester = Harvester::new(
            Arc::clone(&self.directory),
            Arc::clone(&self.history),
            Arc::clone(&self.cache),
            Arc::clone(&self.registry),
            Arc::clone(&self.telemetry),
            cfg,
        );
        match &self.journal {
            Some(j) => harvester.with_journal(Arc::clone(j)),
            None => harvester,
        }
    }
}

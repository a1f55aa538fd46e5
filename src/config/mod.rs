// src/config/mod.rs
//! Process configuration from the environment (after `.env` is loaded).

pub mod sources;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::harvest::HarvestConfig;
use crate::read_path::ReadConfig;
use crate::store::DEFAULT_RETENTION_DAYS;

pub const DEFAULT_SOURCES_PATH: &str = "config/sources.toml";

/// Everything `main` needs to wire the service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    /// Unset means the in-process cache and bus.
    pub redis_url: Option<String>,
    pub journal_dir: Option<PathBuf>,
    pub rest_port: u16,
    pub rpc_port: u16,
    pub harvest_enabled: bool,
    pub harvest: HarvestConfig,
    pub read: ReadConfig,
    pub scrape_timeout: Duration,
    pub retention_days: i64,
    pub sources_path: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let cache_ttl = Duration::from_secs(parse_or(&get, "CACHE_TTL_SECS", 60u64)?.max(1));
        let retention_days = parse_or(&get, "HISTORY_RETENTION_DAYS", DEFAULT_RETENTION_DAYS)?.max(7);

        let harvest = HarvestConfig {
            interval: Duration::from_secs(parse_or(&get, "HARVEST_INTERVAL_SECS", 900u64)?.max(1)),
            politeness: Duration::from_millis(parse_or(&get, "HARVEST_POLITENESS_MS", 500u64)?),
            max_parallel_sources: parse_or(&get, "HARVEST_MAX_PARALLEL_SOURCES", 4usize)?.max(1),
            cache_ttl,
            retention_days,
            ..HarvestConfig::default()
        };
        let read = ReadConfig {
            cache_ttl,
            ..ReadConfig::default()
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            journal_dir: get("RATES_JOURNAL_DIR").map(PathBuf::from),
            rest_port: parse_or(&get, "REST_PORT", 8080u16)?,
            rpc_port: parse_or(&get, "RPC_PORT", 8081u16)?,
            harvest_enabled: match get("HARVEST_ENABLED") {
                None => true,
                Some(v) => parse_flag(&v).ok_or_else(|| anyhow!("HARVEST_ENABLED: not a flag: {v}"))?,
            },
            harvest,
            read,
            scrape_timeout: Duration::from_secs(parse_or(&get, "SCRAPE_TIMEOUT_SECS", 15u64)?.max(1)),
            retention_days,
            sources_path: get("SOURCES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCES_PATH)),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(v) => v.parse::<T>().with_context(|| format!("{key}: invalid value {v:?}")),
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

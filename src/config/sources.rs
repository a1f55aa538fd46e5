// src/config/sources.rs
//! Source directory seed: TOML `[[sources]]` tables or a JSON array.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::model::Source;
use crate::store::SourceDirectory;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSeed {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub base_url: String,
    pub strategy: String,
    #[serde(default = "one")]
    pub units: i32,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

fn one() -> i32 {
    1
}

impl From<SourceSeed> for Source {
    fn from(s: SourceSeed) -> Self {
        let display_name = s
            .display_name
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| s.name.clone());
        Source {
            id: s.id,
            name: s.name.trim().to_string(),
            display_name,
            base_url: s.base_url.trim().to_string(),
            strategy: s.strategy.trim().to_string(),
            units: s.units,
            latitude: s.latitude,
            longitude: s.longitude,
        }
    }
}

/// Load seeds from an explicit path. The extension picks the format; unknown
/// extensions try TOML then JSON.
pub fn load_sources_from(path: &Path) -> Result<Vec<Source>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let seeds = parse_sources(&content, &ext)
        .with_context(|| format!("parsing sources from {}", path.display()))?;
    validate(seeds)
}

/// Like [`load_sources_from`], but a missing file is an empty directory.
pub fn load_sources_or_empty(path: &Path) -> Result<Vec<Source>> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "no source seed file; directory starts empty");
        return Ok(Vec::new());
    }
    load_sources_from(path)
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<SourceSeed>> {
    match hint_ext {
        "toml" => parse_toml(s),
        "json" => parse_json(s),
        _ => parse_toml(s).or_else(|_| parse_json(s)),
    }
}

fn parse_toml(s: &str) -> Result<Vec<SourceSeed>> {
    #[derive(Deserialize)]
    struct SeedFile {
        sources: Vec<SourceSeed>,
    }
    let v: SeedFile = toml::from_str(s)?;
    Ok(v.sources)
}

fn parse_json(s: &str) -> Result<Vec<SourceSeed>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SeedJson {
        List(Vec<SourceSeed>),
        Wrapped { sources: Vec<SourceSeed> },
    }
    let v: SeedJson = serde_json::from_str(s)?;
    Ok(match v {
        SeedJson::List(l) => l,
        SeedJson::Wrapped { sources } => sources,
    })
}

fn validate(seeds: Vec<SourceSeed>) -> Result<Vec<Source>> {
    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    let mut out = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let src = Source::from(seed);
        if src.name.is_empty() || src.base_url.is_empty() || src.strategy.is_empty() {
            bail!("source {} needs name, base_url and strategy", src.id);
        }
        if src.units < 1 {
            bail!("source {}: units must be positive", src.name);
        }
        if !ids.insert(src.id) {
            bail!("duplicate source id {}", src.id);
        }
        if !names.insert(src.name.clone()) {
            bail!("duplicate source name {}", src.name);
        }
        out.push(src);
    }
    out.sort_by_key(|s| s.id);
    Ok(out)
}

/// Upsert every seed into the directory; returns how many were written.
pub async fn seed_directory(directory: &dyn SourceDirectory, sources: &[Source]) -> Result<usize> {
    for s in sources {
        directory
            .upsert(s)
            .await
            .map_err(|e| anyhow!("seeding source {}: {e}", s.name))?;
    }
    Ok(sources.len())
}

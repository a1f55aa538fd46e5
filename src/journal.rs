// src/journal.rs
//! Optional persistent stream of harvested quotes, one JSON-lines file per
//! subject `rates.<CCY>`. Consumers that were offline can replay the last 24h.
//!
//! Entries are ordered by append; the retention horizon is applied on every
//! append (to the file) and on replay (to the result).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{RateError, RateResult};
use crate::model::Quote;

pub const JOURNAL_RETENTION: chrono::Duration = chrono::Duration::hours(24);

#[async_trait]
pub trait QuoteJournal: Send + Sync {
    async fn append(&self, quote: &Quote) -> RateResult<()>;

    /// Retained quotes for `currency` fetched at or after `since`, oldest first.
    async fn replay(&self, currency: &str, since: i64) -> RateResult<Vec<Quote>>;
}

/// `rates.EUR`
pub fn subject(currency: &str) -> String {
    format!("rates.{currency}")
}

fn io_err(e: std::io::Error) -> RateError {
    RateError::Store(format!("journal: {e}"))
}

pub struct FileJournal {
    dir: PathBuf,
    retention: chrono::Duration,
    // Serializes read-prune-write cycles across subjects.
    write: Mutex<()>,
}

impl FileJournal {
    pub async fn open(dir: impl AsRef<Path>) -> RateResult<Self> {
        Self::with_retention(dir, JOURNAL_RETENTION).await
    }

    pub async fn with_retention(
        dir: impl AsRef<Path>,
        retention: chrono::Duration,
    ) -> RateResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;
        Ok(Self {
            dir,
            retention,
            write: Mutex::new(()),
        })
    }

    fn path_for(&self, currency: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", subject(currency)))
    }

    fn horizon(&self) -> i64 {
        (Utc::now() - self.retention).timestamp()
    }

    async fn read_all(&self, path: &Path) -> RateResult<Vec<Quote>> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(e)),
        };
        let mut out = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<Quote>(line) {
                Ok(q) => out.push(q),
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "skipping bad journal line"),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl QuoteJournal for FileJournal {
    async fn append(&self, quote: &Quote) -> RateResult<()> {
        let _guard = self.write.lock().await;
        let path = self.path_for(&quote.currency);
        let horizon = self.horizon();
        let line = serde_json::to_string(quote)
            .map_err(|e| RateError::Serialization(e.to_string()))?;

        let existing = self.read_all(&path).await?;
        if existing.iter().any(|q| q.fetched_at < horizon) {
            let mut body = String::new();
            for q in existing.iter().filter(|q| q.fetched_at >= horizon) {
                let kept = serde_json::to_string(q)
                    .map_err(|e| RateError::Serialization(e.to_string()))?;
                body.push_str(&kept);
                body.push('\n');
            }
            body.push_str(&line);
            body.push('\n');
            let tmp = path.with_extension("jsonl.tmp");
            tokio::fs::write(&tmp, body).await.map_err(io_err)?;
            tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;
            return Ok(());
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        Ok(())
    }

    async fn replay(&self, currency: &str, since: i64) -> RateResult<Vec<Quote>> {
        let floor = since.max(self.horizon());
        let all = self.read_all(&self.path_for(currency)).await?;
        Ok(all.into_iter().filter(|q| q.fetched_at >= floor).collect())
    }
}

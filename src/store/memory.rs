// src/store/memory.rs
//! In-process store. Same contract as the Postgres backend; nothing survives
//! a restart.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{bucket_start, HistoryStore, SourceDirectory};
use crate::error::{RateError, RateResult};
use crate::model::{HistoryPoint, RateRecord, Source};

type RowKey = (DateTime<Utc>, i32, String);

#[derive(Debug, Default)]
pub struct MemoryStore {
    sources: RwLock<BTreeMap<i32, Source>>,
    rates: RwLock<BTreeMap<RowKey, (f64, f64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(sources: impl IntoIterator<Item = Source>) -> Self {
        let store = Self::new();
        {
            let mut map = store.sources.write();
            for s in sources {
                map.insert(s.id, s);
            }
        }
        store
    }

    /// Number of history rows held.
    pub fn row_count(&self) -> usize {
        self.rates.read().len()
    }
}

#[async_trait]
impl SourceDirectory for MemoryStore {
    async fn list(&self) -> RateResult<Vec<Source>> {
        Ok(self.sources.read().values().cloned().collect())
    }

    async fn get(&self, id: i32) -> RateResult<Source> {
        self.sources
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| RateError::NotFound(format!("no cantor with id {id}")))
    }

    async fn upsert(&self, source: &Source) -> RateResult<()> {
        let mut map = self.sources.write();
        let taken = map
            .values()
            .any(|s| s.name == source.name && s.id != source.id);
        if taken {
            return Err(RateError::Store(format!(
                "source name {} already used",
                source.name
            )));
        }
        map.insert(source.id, source.clone());
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, record: &RateRecord) -> RateResult<bool> {
        let key = (record.time, record.source_id, record.currency.clone());
        let mut rates = self.rates.write();
        if rates.contains_key(&key) {
            return Ok(false);
        }
        rates.insert(key, (record.buy, record.sell));
        Ok(true)
    }

    async fn latest_before(
        &self,
        source_id: i32,
        currency: &str,
        cutoff: DateTime<Utc>,
    ) -> RateResult<Option<f64>> {
        let rates = self.rates.read();
        // Keys sort by time first, so the first match from the back is the latest.
        let found = rates
            .iter()
            .rev()
            .find(|((t, src, ccy), _)| *t <= cutoff && *src == source_id && ccy == currency)
            .map(|(_, (buy, _))| *buy);
        Ok(found)
    }

    async fn range(
        &self,
        currency: &str,
        since: DateTime<Utc>,
        source_id: Option<i32>,
    ) -> RateResult<Vec<HistoryPoint>> {
        let rates = self.rates.read();
        let mut buckets: BTreeMap<i64, (f64, f64, u32)> = BTreeMap::new();
        for ((time, src, ccy), (buy, sell)) in rates.iter() {
            if *time < since || ccy != currency || source_id.is_some_and(|id| id != *src) {
                continue;
            }
            let slot = buckets
                .entry(bucket_start(time.timestamp()))
                .or_insert((0.0, 0.0, 0));
            slot.0 += buy;
            slot.1 += sell;
            slot.2 += 1;
        }
        Ok(buckets
            .into_iter()
            .map(|(time, (buy, sell, n))| HistoryPoint {
                time,
                buy_rate: buy / f64::from(n),
                sell_rate: sell / f64::from(n),
            })
            .collect())
    }

    async fn prune(&self, before: DateTime<Utc>) -> RateResult<u64> {
        let mut rates = self.rates.write();
        let len = rates.len();
        rates.retain(|(time, _, _), _| *time >= before);
        Ok((len - rates.len()) as u64)
    }

    async fn ping(&self) -> RateResult<()> {
        Ok(())
    }
}

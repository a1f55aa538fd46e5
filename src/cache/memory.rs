// src/cache/memory.rs
//! In-process hot cache and bus: `DashMap` with per-entry deadlines, one
//! `broadcast` channel per topic.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{future, StreamExt};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

use super::{glob_match, HotCache, Subscription};
use crate::error::RateResult;

/// Per-subscriber queue depth; slower subscribers lose the oldest messages.
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 1024;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    topics: DashMap<String, broadcast::Sender<Vec<u8>>>,
    queue: usize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_queue(DEFAULT_SUBSCRIBER_QUEUE)
    }

    pub fn with_queue(queue: usize) -> Self {
        Self {
            entries: DashMap::new(),
            topics: DashMap::new(),
            queue: queue.max(1),
        }
    }

    /// Live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.is_live(now));
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HotCache for MemoryCache {
    async fn get(&self, key: &str) -> RateResult<Option<Vec<u8>>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.entries.remove_if(key, |_, e| !e.is_live(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> RateResult<()> {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> RateResult<Vec<Vec<u8>>> {
        let now = Instant::now();
        let mut hits: Vec<(String, Vec<u8>)> = self
            .entries
            .iter()
            .filter(|e| e.value().is_live(now) && glob_match(pattern, e.key()))
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect();
        hits.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(hits.into_iter().map(|(_, v)| v).collect())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> RateResult<()> {
        if let Some(tx) = self.topics.get(topic) {
            // No receivers is not an error for a fire-and-forget bus.
            let _ = tx.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> RateResult<Subscription> {
        let rx = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.queue).0)
            .subscribe();
        let stream = BroadcastStream::new(rx).filter_map(|msg| {
            future::ready(match msg {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::debug!(error = %e, "bus subscriber lagged; messages dropped");
                    None
                }
            })
        });
        Ok(stream.boxed())
    }

    async fn ping(&self) -> RateResult<()> {
        Ok(())
    }
}

// src/cache/redis.rs
use std::time::Duration;

use async_trait::async_trait;
use futures::{future, StreamExt};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{HotCache, Subscription};
use crate::error::{RateError, RateResult};

impl From<redis::RedisError> for RateError {
    fn from(e: redis::RedisError) -> Self {
        RateError::Cache(e.to_string())
    }
}

/// Redis-backed cache + pub/sub bus. Commands share one multiplexed,
/// auto-reconnecting connection; each subscription opens its own.
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> RateResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl HotCache for RedisCache {
    async fn get(&self, key: &str) -> RateResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> RateResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> RateResult<Vec<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let mut keys: Vec<String> = Vec::new();
        {
            let mut iter = conn.scan_match::<_, String>(pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        keys.sort();
        keys.dedup();
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;
        // Keys may expire between SCAN and MGET.
        Ok(values.into_iter().flatten().collect())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> RateResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(topic, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> RateResult<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;
        let stream = pubsub.into_on_message().filter_map(|msg| {
            future::ready(match msg.get_payload::<Vec<u8>>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::debug!(error = %e, "dropping non-binary bus payload");
                    None
                }
            })
        });
        Ok(stream.boxed())
    }

    async fn ping(&self) -> RateResult<()> {
        let mut conn = self.conn.clone();
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

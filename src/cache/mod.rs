// src/cache/mod.rs
//! Hot cache (TTL key/value of serialized quotes) plus the publish bus.
//!
//! One backing service provides both capabilities here, but they are separate
//! methods so a deployment could split them.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::RateResult;

/// Bus topic carrying every freshly harvested quote.
pub const RATES_TOPIC: &str = "rates_updates";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Messages published after the subscription was taken. Dropping the stream
/// closes the subscription.
pub type Subscription = BoxStream<'static, Vec<u8>>;

#[async_trait]
pub trait HotCache: Send + Sync {
    async fn get(&self, key: &str) -> RateResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> RateResult<()>;

    /// Values of every live key matching a `*` glob.
    async fn scan(&self, pattern: &str) -> RateResult<Vec<Vec<u8>>>;

    /// Fire-and-forget fan-out to current subscribers.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> RateResult<()>;

    async fn subscribe(&self, topic: &str) -> RateResult<Subscription>;

    async fn ping(&self) -> RateResult<()>;
}

/// `rates:proto<source_id>:<CURRENCY>`
pub fn rate_key(source_id: i32, currency: &str) -> String {
    format!("rates:proto{source_id}:{currency}")
}

/// Glob over every cached source for one currency.
pub fn currency_pattern(currency: &str) -> String {
    format!("rates:proto*:{currency}")
}

/// Redis-style glob with `*` as the only wildcard.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return key.is_empty();
    };
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };
    let tail: Vec<&str> = parts.collect();
    let Some((last, middle)) = tail.split_last() else {
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

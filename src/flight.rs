// src/flight.rs
//! Single-flight: concurrent calls for one key share a single execution.
//!
//! The leader's work runs on its own task, so a caller that goes away cannot
//! strand the waiters; the task frees the key once the result exists.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::{RateError, RateResult};

type InFlight<T> = Shared<BoxFuture<'static, RateResult<T>>>;

pub struct SingleFlight<T> {
    calls: Arc<Mutex<HashMap<String, InFlight<T>>>>,
}

impl<T> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` unless a call for `key` is already in flight, in which case
    /// wait for that call's result instead.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> RateResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RateResult<T>> + Send + 'static,
    {
        let call = {
            let mut calls = self.calls.lock();
            match calls.get(key) {
                Some(call) => call.clone(),
                None => {
                    let calls_ref = Arc::clone(&self.calls);
                    let owned_key = key.to_string();
                    let fut = work();
                    // The task needs the lock to remove its key, which we
                    // hold until the entry is inserted.
                    let handle = tokio::spawn(async move {
                        let out = fut.await;
                        calls_ref.lock().remove(&owned_key);
                        out
                    });
                    let call = async move {
                        handle
                            .await
                            .unwrap_or_else(|e| Err(RateError::Internal(e.to_string())))
                    }
                    .boxed()
                    .shared();
                    calls.insert(key.to_string(), call.clone());
                    call
                }
            }
        };
        call.await
    }

    /// Keys currently executing.
    pub fn inflight_count(&self) -> usize {
        self.calls.lock().len()
    }
}

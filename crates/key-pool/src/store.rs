//! State store abstraction
//!
//! The only shared resource between concurrent requests (and between process
//! instances) is an eventually-consistent key-value store with per-entry TTL.
//! `StateStore` is the minimal backend contract: get, put-with-ttl, delete.
//! There is no compare-and-swap, no transaction and no atomic increment.
//!
//! `StoreAdapter` wraps a backend with a bounded timeout on every operation and
//! turns failures into "no information": callers see a missing value, which the
//! eligibility checks read as not banned, not locked, not cooling down and a
//! zero count. A slow or unreachable store never stalls or fails a request.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// Boxed future returned by `StateStore` operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Backend contract for the shared key-value store.
///
/// Uses `Pin<Box<dyn Future>>` return types so backends can be shared as
/// `Arc<dyn StateStore>`.
pub trait StateStore: Send + Sync {
    /// Backend name for logging and health reporting (e.g. "memory", "redis").
    fn backend(&self) -> &str;

    /// Read a value. Expired entries read as `None`.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Write a value, replacing any previous value and resetting its expiry.
    fn put<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> StoreFuture<'a, ()>;

    /// Remove a value. Removing a missing key is not an error.
    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;
}

/// Typed, failure-absorbing access to a `StateStore`.
#[derive(Clone)]
pub struct StoreAdapter {
    store: Arc<dyn StateStore>,
    timeout: Duration,
}

impl StoreAdapter {
    pub fn new(store: Arc<dyn StateStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn backend(&self) -> &str {
        self.store.backend()
    }

    /// Read a raw value; `None` when missing, expired, or the store failed.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.guarded("get", self.store.get(key)).await.flatten()
    }

    /// Read an integer value. Unparseable values count as missing.
    pub async fn get_i64(&self, key: &str) -> Option<i64> {
        let raw = self.get(key).await?;
        match raw.trim().parse::<i64>() {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "ignoring non-numeric value in state store");
                None
            }
        }
    }

    /// Read a non-negative counter; missing, negative or unreadable reads as 0.
    pub async fn get_count(&self, key: &str) -> u64 {
        self.get_i64(key)
            .await
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(0)
    }

    /// Presence check.
    pub async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    /// Best-effort write. Returns whether the store acknowledged it.
    pub async fn put(&self, key: &str, value: &str, ttl: Duration) -> bool {
        self.guarded("put", self.store.put(key, value, ttl))
            .await
            .is_some()
    }

    /// Best-effort delete. Returns whether the store acknowledged it.
    pub async fn delete(&self, key: &str) -> bool {
        self.guarded("delete", self.store.delete(key))
            .await
            .is_some()
    }

    /// Apply the operation timeout and absorb failures.
    ///
    /// Keys are never logged: they embed raw credentials.
    async fn guarded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Option<T> {
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::StoreTimeout {
                op,
                timeout: self.timeout,
            }),
        };
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    op,
                    backend = self.store.backend(),
                    error = %e,
                    "state store operation failed, treating as no information"
                );
                metrics::counter!("keypool_store_errors_total", "op" => op).increment(1);
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Misbehaving backends for exercising the degrade-to-defaults path.

    use super::*;
    use crate::memory::MemoryStore;

    /// Fresh in-memory backend behind an adapter with a short timeout.
    pub fn memory_adapter() -> StoreAdapter {
        StoreAdapter::new(Arc::new(MemoryStore::new()), Duration::from_millis(50))
    }

    /// A backend whose every operation fails immediately.
    pub struct FailingStore;

    impl StateStore for FailingStore {
        fn backend(&self) -> &str {
            "failing"
        }

        fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<String>> {
            Box::pin(async { Err(Error::StoreUnavailable("connection refused".into())) })
        }

        fn put<'a>(&'a self, _key: &'a str, _value: &'a str, _ttl: Duration) -> StoreFuture<'a, ()> {
            Box::pin(async { Err(Error::StoreUnavailable("connection refused".into())) })
        }

        fn delete<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, ()> {
            Box::pin(async { Err(Error::StoreUnavailable("connection refused".into())) })
        }
    }

    /// A backend whose every operation hangs forever.
    pub struct StalledStore;

    impl StateStore for StalledStore {
        fn backend(&self) -> &str {
            "stalled"
        }

        fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<String>> {
            Box::pin(std::future::pending())
        }

        fn put<'a>(&'a self, _key: &'a str, _value: &'a str, _ttl: Duration) -> StoreFuture<'a, ()> {
            Box::pin(std::future::pending())
        }

        fn delete<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, ()> {
            Box::pin(std::future::pending())
        }
    }
}

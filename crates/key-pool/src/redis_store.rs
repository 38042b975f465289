//! Redis-backed state store
//!
//! Shared backend for multi-instance deployments. Only plain GET / SETEX / DEL
//! are used so the pool's contract stays the same on any eventually-consistent
//! key-value service; a backend with atomic INCR or CAS can be swapped in
//! without touching the coordinator.

use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::error::Result;
use crate::store::{StateStore, StoreFuture};

/// `StateStore` over a multiplexed, auto-reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Open a client for `url` and establish the managed connection.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("connected to redis state store");
        Ok(Self { conn })
    }
}

/// SETEX rejects a zero expiry; round sub-second TTLs up.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl StateStore for RedisStore {
    fn backend(&self) -> &str {
        "redis"
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        })
    }

    fn put<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> StoreFuture<'a, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let _: () = conn.set_ex(key, value, ttl_secs(ttl)).await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let _: () = conn.del(key).await?;
            Ok(())
        })
    }
}

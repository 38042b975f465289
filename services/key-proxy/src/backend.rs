//! State store backend selection

use std::sync::Arc;

use key_pool::{MemoryStore, RedisStore, StateStore};
use tracing::warn;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{Error, Result};

/// Build the configured backend. Redis is connected eagerly so a bad URL or
/// unreachable server fails startup instead of the first request.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn StateStore>> {
    match config.backend {
        StoreBackend::Memory => {
            warn!("using in-memory state store, counters are per-process and lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            let url = config.redis_url.as_deref().ok_or(Error::MissingRedisUrl)?;
            Ok(Arc::new(RedisStore::connect(url).await?))
        }
    }
}

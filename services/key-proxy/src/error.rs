//! Service-specific error types

use thiserror::Error;

/// Startup errors raised while wiring the state store backend.
///
/// Per-request failures (bad token, exhausted pool, upstream errors) are
/// turned into HTTP responses by the handlers and never propagate as Rust
/// errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("store.backend is \"redis\" but store.redis_url is not set")]
    MissingRedisUrl,

    #[error("state store connection failed: {0}")]
    StoreConnect(#[from] key_pool::Error),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

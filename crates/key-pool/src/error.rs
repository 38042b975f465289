//! Error types for pool operations

use std::time::Duration;

/// Errors from pool operations.
///
/// Only `ConfigMissing` is fatal. `NoEligibleCredential` is the expected
/// steady-state answer under load. The store variants are raised by
/// `StateStore` backends and absorbed by `StoreAdapter` into "no information".
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pool configuration error: {0}")]
    ConfigMissing(String),

    #[error("no eligible credential for model {model}")]
    NoEligibleCredential { model: String },

    #[error("state store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("state store {op} timed out after {}ms", timeout.as_millis())]
    StoreTimeout { op: &'static str, timeout: Duration },
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

//! Common types for the key rotation proxy
//!
//! Leaf types shared by the pool engine and the service binary: the zeroizing
//! `Secret` wrapper, the upstream `Credential`, comma-separated secret list
//! parsing, and configuration errors.

mod credential;
mod error;
mod secret;

pub use credential::{Credential, parse_secret_list};
pub use error::{Error, Result};
pub use secret::Secret;

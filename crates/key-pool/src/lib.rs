//! Fair rotation of upstream API credentials
//!
//! Selects one credential per forwarded request from a fixed pool, spreading
//! load across credentials and models while honoring per-model cooldowns,
//! daily per-credential quotas, and temporary bans after upstream throttling.
//! All shared state lives in an eventually-consistent key-value store with
//! per-entry TTL, so every guarantee here is best-effort.
//!
//! Request lifecycle:
//! 1. `KeyPool::checkout(model, now)` picks the first eligible candidate
//!    (not banned, not locked, under quota, not cooling down) and stamps it used
//! 2. The caller forwards the request with the claimed credential
//! 3. `ClaimGuard::complete(outcome)` updates counters, bans on throttling and
//!    releases the advisory lock
//! 4. A guard dropped without completing records `OtherFailure`
//!
//! Store failures and timeouts read as "no information" (eligible, zero
//! counts), so the rotation layer never takes the proxy down with it.

pub mod ban;
pub mod cooldown;
pub mod coordinator;
pub mod day;
pub mod engine;
pub mod error;
pub mod keys;
pub mod lock;
pub mod memory;
pub mod ordering;
pub mod outcome;
pub mod policy;
pub mod pool;
pub mod quota;
pub mod recorder;
pub mod redis_store;
pub mod settings;
pub mod stats;
pub mod store;

pub use coordinator::{Claim, SelectionCoordinator};
pub use day::DayClock;
pub use engine::KeyPool;
pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use ordering::OrderingKind;
pub use outcome::Outcome;
pub use policy::{Policy, PolicyTable};
pub use recorder::{ClaimGuard, UsageRecorder};
pub use redis_store::RedisStore;
pub use settings::{LockSettings, PoolSettings};
pub use stats::{KeyUsage, ModelTotals, StatsReport};
pub use store::{StateStore, StoreAdapter};

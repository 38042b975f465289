//! Pool tuning knobs
//!
//! Deserialized from the `[pool]` table of the service configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::day::{DEFAULT_TIME_ZONE, DayClock};
use crate::error::{Error, Result};
use crate::ordering::OrderingKind;
use crate::policy::PolicyTable;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub ordering: OrderingKind,
    /// IANA zone whose local midnight rolls the daily counters.
    pub time_zone: String,
    pub ban_ttl_secs: u64,
    pub usage_ttl_secs: u64,
    pub counter_ttl_secs: u64,
    pub cursor_ttl_secs: u64,
    pub store_timeout_ms: u64,
    /// Advisory locking is enabled by the presence of this table.
    pub lock: Option<LockSettings>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            ordering: OrderingKind::default(),
            time_zone: DEFAULT_TIME_ZONE.to_string(),
            ban_ttl_secs: 3600,
            usage_ttl_secs: 3600,
            counter_ttl_secs: 2 * 86_400,
            cursor_ttl_secs: 86_400,
            store_timeout_ms: 500,
            lock: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_lock_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_lock_ttl_secs() -> u64 {
    10
}

impl PoolSettings {
    pub fn validate(&self) -> Result<()> {
        DayClock::from_name(&self.time_zone)?;
        if self.store_timeout_ms == 0 {
            return Err(Error::ConfigMissing("store_timeout_ms must be > 0".into()));
        }
        if self.lock.is_some_and(|l| l.ttl_secs == 0) {
            return Err(Error::ConfigMissing("lock ttl_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Ban window, never shorter than the longest cooldown.
    pub fn ban_ttl(&self, policies: &PolicyTable) -> Duration {
        Duration::from_secs(self.ban_ttl_secs).max(policies.max_cooldown())
    }

    /// Usage record lifetime, never shorter than the longest cooldown.
    pub fn usage_ttl(&self, policies: &PolicyTable) -> Duration {
        Duration::from_secs(self.usage_ttl_secs).max(policies.max_cooldown())
    }

    pub fn counter_ttl(&self) -> Duration {
        Duration::from_secs(self.counter_ttl_secs)
    }

    pub fn cursor_ttl(&self) -> Duration {
        Duration::from_secs(self.cursor_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Option<Duration> {
        self.lock.map(|l| Duration::from_secs(l.ttl_secs))
    }
}

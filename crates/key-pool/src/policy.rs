//! Per-model usage policy
//!
//! Each model has a cooldown (minimum seconds between two uses of the same
//! credential) and an optional daily quota per credential. The table is static
//! for the process lifetime; models without an entry use the default policy.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

/// Cooldown applied to models nobody configured.
pub const DEFAULT_COOLDOWN_SECS: u64 = 30;

/// Usage policy for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Policy {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// `None` = unbounded.
    #[serde(default)]
    pub daily_quota: Option<u64>,
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            daily_quota: None,
        }
    }
}

impl Policy {
    pub fn new(cooldown_secs: u64, daily_quota: Option<u64>) -> Self {
        Self {
            cooldown_secs,
            daily_quota,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Whether `count` calls already exhaust the quota. Unbounded never does.
    pub fn quota_exhausted(&self, count: u64) -> bool {
        self.daily_quota.is_some_and(|quota| count >= quota)
    }

    /// Share of the daily quota used, in percent, capped at 100.
    /// `None` for unbounded quotas.
    pub fn usage_percent(&self, count: u64) -> Option<f64> {
        let quota = self.daily_quota?;
        if quota == 0 {
            return Some(100.0);
        }
        Some((count as f64 / quota as f64 * 100.0).min(100.0))
    }
}

/// Model name → policy, with a fallback.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    models: BTreeMap<String, Policy>,
    fallback: Policy,
}

impl PolicyTable {
    pub fn new(models: BTreeMap<String, Policy>, fallback: Policy) -> Self {
        Self { models, fallback }
    }

    /// The policy for `model`, or the fallback.
    pub fn get(&self, model: &str) -> Policy {
        self.models.get(model).copied().unwrap_or(self.fallback)
    }

    /// Configured model names, sorted.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn fallback(&self) -> Policy {
        self.fallback
    }

    /// Longest cooldown across configured models and the fallback.
    /// Ban and usage TTLs are raised to at least this.
    pub fn max_cooldown(&self) -> Duration {
        let secs = self
            .models
            .values()
            .map(|p| p.cooldown_secs)
            .chain(std::iter::once(self.fallback.cooldown_secs))
            .max()
            .unwrap_or(DEFAULT_COOLDOWN_SECS);
        Duration::from_secs(secs)
    }
}

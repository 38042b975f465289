//! Read-only usage rollup for reporting
//!
//! One row per (credential, configured model) for the current day, plus
//! per-model totals. Only reads; never writes to the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::Credential;
use serde::Serialize;

use crate::ban::BanList;
use crate::cooldown::CooldownLimiter;
use crate::day::DayClock;
use crate::policy::PolicyTable;
use crate::quota::DailyQuotaCounter;

/// Usage of one credential for one model today.
#[derive(Debug, Clone, Serialize)]
pub struct KeyUsage {
    /// `first4****last4`.
    pub key: String,
    pub model: String,
    pub count: u64,
    pub error_count: u64,
    pub daily_quota: Option<u64>,
    pub banned: bool,
    pub last_used: Option<DateTime<Utc>>,
    /// `last_used` rendered in the reference time zone.
    pub last_used_local: Option<String>,
    /// error_count / count, 0 when count is 0.
    pub error_ratio: f64,
    /// count / daily_quota in percent, capped at 100. `None` when unbounded.
    pub usage_percent: Option<f64>,
}

/// Totals for one model across all credentials.
#[derive(Debug, Clone, Serialize)]
pub struct ModelTotals {
    pub model: String,
    pub count: u64,
    pub error_count: u64,
    /// quota × credentials; `None` when unbounded.
    pub combined_quota: Option<u64>,
    pub usage_percent: Option<f64>,
    pub banned_keys: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub day: String,
    pub time_zone: String,
    pub generated_at: DateTime<Utc>,
    pub keys: Vec<KeyUsage>,
    pub models: Vec<ModelTotals>,
}

#[derive(Clone)]
pub struct StatsAggregator {
    credentials: Arc<[Credential]>,
    policies: Arc<PolicyTable>,
    quota: DailyQuotaCounter,
    bans: BanList,
    cooldown: CooldownLimiter,
    clock: DayClock,
}

impl StatsAggregator {
    pub fn new(
        credentials: Arc<[Credential]>,
        policies: Arc<PolicyTable>,
        quota: DailyQuotaCounter,
        bans: BanList,
        cooldown: CooldownLimiter,
        clock: DayClock,
    ) -> Self {
        Self {
            credentials,
            policies,
            quota,
            bans,
            cooldown,
            clock,
        }
    }

    /// Report over every configured model for the day containing `now`.
    pub async fn report(&self, now: DateTime<Utc>) -> StatsReport {
        let day = self.clock.day_key(now);
        let mut keys = Vec::new();
        let mut models = Vec::new();

        for model in self.policies.models() {
            let rows = self.model_rows(model, &day).await;
            models.push(self.totals(model, &rows));
            keys.extend(rows);
        }

        StatsReport {
            day,
            time_zone: self.clock.time_zone().name().to_string(),
            generated_at: now,
            keys,
            models,
        }
    }

    /// One row per credential for `model` on `day`.
    pub async fn model_rows(&self, model: &str, day: &str) -> Vec<KeyUsage> {
        let policy = self.policies.get(model);
        let mut rows = Vec::with_capacity(self.credentials.len());

        for credential in self.credentials.iter() {
            let (count, error_count, banned, last_used) = tokio::join!(
                self.quota.count(credential, model, day),
                self.quota.error_count(credential, model, day),
                self.bans.is_banned(credential, model),
                self.cooldown.last_used(credential, model),
            );
            rows.push(KeyUsage {
                key: credential.redacted(),
                model: model.to_string(),
                count,
                error_count,
                daily_quota: policy.daily_quota,
                banned,
                last_used,
                last_used_local: last_used.map(|t| self.clock.local_time(t)),
                error_ratio: error_ratio(count, error_count),
                usage_percent: policy.usage_percent(count),
            });
        }
        rows
    }

    fn totals(&self, model: &str, rows: &[KeyUsage]) -> ModelTotals {
        let policy = self.policies.get(model);
        let count: u64 = rows.iter().map(|r| r.count).sum();
        let error_count = rows.iter().map(|r| r.error_count).sum();
        let combined_quota = policy
            .daily_quota
            .map(|q| q.saturating_mul(self.credentials.len() as u64));
        let usage_percent = combined_quota.map(|q| {
            if q == 0 {
                100.0
            } else {
                (count as f64 / q as f64 * 100.0).min(100.0)
            }
        });
        ModelTotals {
            model: model.to_string(),
            count,
            error_count,
            combined_quota,
            usage_percent,
            banned_keys: rows.iter().filter(|r| r.banned).count(),
        }
    }
}

fn error_ratio(count: u64, error_count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        error_count as f64 / count as f64
    }
}

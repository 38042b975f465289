//! Wiring of the pool components over one shared store

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::Credential;
use tracing::info;

use crate::ban::BanList;
use crate::coordinator::SelectionCoordinator;
use crate::cooldown::CooldownLimiter;
use crate::day::DayClock;
use crate::error::Result;
use crate::lock::AdvisoryLock;
use crate::policy::{Policy, PolicyTable};
use crate::pool::CredentialPool;
use crate::quota::DailyQuotaCounter;
use crate::recorder::{ClaimGuard, UsageRecorder};
use crate::settings::PoolSettings;
use crate::stats::{StatsAggregator, StatsReport};
use crate::store::{StateStore, StoreAdapter};

/// Entry point for request handlers: claim a credential, then complete the
/// returned guard with the upstream outcome.
#[derive(Clone)]
pub struct KeyPool {
    coordinator: SelectionCoordinator,
    recorder: UsageRecorder,
    stats: StatsAggregator,
    policies: Arc<PolicyTable>,
    store: StoreAdapter,
}

impl KeyPool {
    /// Fails with `ConfigMissing` on an empty credential list or invalid
    /// settings.
    pub fn new(
        credentials: Vec<Credential>,
        policies: PolicyTable,
        settings: &PoolSettings,
        backend: Arc<dyn StateStore>,
    ) -> Result<Self> {
        settings.validate()?;
        let clock = DayClock::from_name(&settings.time_zone)?;
        let store = StoreAdapter::new(backend, settings.store_timeout());

        let ban_ttl = settings.ban_ttl(&policies);
        let usage_ttl = settings.usage_ttl(&policies);
        let policies = Arc::new(policies);

        let pool = CredentialPool::new(
            credentials,
            settings.ordering.strategy(),
            store.clone(),
            settings.cursor_ttl(),
        )?;
        let bans = BanList::new(store.clone(), ban_ttl);
        let quota = DailyQuotaCounter::new(store.clone(), policies.clone(), settings.counter_ttl());
        let cooldown = CooldownLimiter::new(store.clone(), policies.clone(), usage_ttl);
        let lock = settings
            .lock_ttl()
            .map(|ttl| AdvisoryLock::new(store.clone(), ttl));

        let stats = StatsAggregator::new(
            pool.credentials().into(),
            policies.clone(),
            quota.clone(),
            bans.clone(),
            cooldown.clone(),
            clock,
        );
        let recorder = UsageRecorder::new(quota.clone(), bans.clone(), lock.clone());
        let coordinator = SelectionCoordinator::new(pool, bans, quota, cooldown, lock, clock);

        info!(
            backend = store.backend(),
            time_zone = %settings.time_zone,
            ban_ttl_secs = ban_ttl.as_secs(),
            locking = settings.lock.is_some(),
            "key pool ready"
        );

        Ok(Self {
            coordinator,
            recorder,
            stats,
            policies,
            store,
        })
    }

    /// Claim a credential for `model` at `now`, wrapped in a guard that
    /// records the outcome.
    pub async fn checkout(&self, model: &str, now: DateTime<Utc>) -> Result<ClaimGuard> {
        let claim = self.coordinator.claim(model, now).await?;
        Ok(ClaimGuard::new(claim, self.recorder.clone()))
    }

    pub async fn report(&self, now: DateTime<Utc>) -> StatsReport {
        self.stats.report(now).await
    }

    pub fn coordinator(&self) -> &SelectionCoordinator {
        &self.coordinator
    }

    pub fn recorder(&self) -> &UsageRecorder {
        &self.recorder
    }

    pub fn policy(&self, model: &str) -> Policy {
        self.policies.get(model)
    }

    pub fn credentials(&self) -> &[Credential] {
        self.coordinator.pool().credentials()
    }

    pub fn backend(&self) -> &str {
        self.store.backend()
    }
}

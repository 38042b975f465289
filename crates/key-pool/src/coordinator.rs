//! Credential selection
//!
//! `claim` walks the pool's candidate order and takes the first credential
//! that passes, in order: not banned, not locked (when locking is enabled),
//! under today's quota, not cooling down. Claiming writes the advisory lock
//! (if enabled), advances the round-robin cursor (if the ordering uses one)
//! and stamps the usage record with `now`.
//!
//! Every check reads an eventually-consistent store without CAS, so two
//! concurrent claims can both pick the same credential. That is tolerated.

use chrono::{DateTime, Utc};
use common::Credential;
use tracing::debug;

use crate::ban::BanList;
use crate::cooldown::CooldownLimiter;
use crate::day::DayClock;
use crate::error::{Error, Result};
use crate::lock::AdvisoryLock;
use crate::pool::CredentialPool;
use crate::quota::DailyQuotaCounter;

/// A credential claimed for one forwarded call.
#[derive(Debug, Clone)]
pub struct Claim {
    pub credential: Credential,
    pub model: String,
    /// Day key the call is accounted to.
    pub day: String,
    /// Position of the credential in the pool.
    pub index: usize,
    /// Whether an advisory lock was written for this claim.
    pub locked: bool,
}

/// Why a candidate was passed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    Banned,
    Locked,
    OverQuota,
    CoolingDown,
}

#[derive(Clone)]
pub struct SelectionCoordinator {
    pool: CredentialPool,
    bans: BanList,
    quota: DailyQuotaCounter,
    cooldown: CooldownLimiter,
    lock: Option<AdvisoryLock>,
    clock: DayClock,
}

impl SelectionCoordinator {
    pub fn new(
        pool: CredentialPool,
        bans: BanList,
        quota: DailyQuotaCounter,
        cooldown: CooldownLimiter,
        lock: Option<AdvisoryLock>,
        clock: DayClock,
    ) -> Self {
        Self {
            pool,
            bans,
            quota,
            cooldown,
            lock,
            clock,
        }
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Claim a credential for `model` at `now`.
    ///
    /// Returns `NoEligibleCredential` when every candidate is skipped. No retry
    /// is attempted here.
    pub async fn claim(&self, model: &str, now: DateTime<Utc>) -> Result<Claim> {
        let day = self.clock.day_key(now);

        for (index, credential) in self.pool.list_candidates(model).await {
            if let Some(reason) = self.skip_reason(credential, model, &day, now).await {
                debug!(model, credential = %credential, ?reason, "candidate skipped");
                continue;
            }

            self.pool.advance_cursor(model, index).await;
            self.cooldown.mark_used(credential, model, now).await;
            // Acquired last; the caller's guard releases it.
            let locked = match &self.lock {
                Some(lock) => lock.acquire(credential, model).await,
                None => false,
            };

            metrics::counter!(
                "keypool_claims_total",
                "model" => model.to_string(),
                "result" => "claimed"
            )
            .increment(1);
            debug!(model, credential = %credential, index, day = %day, "credential claimed");

            return Ok(Claim {
                credential: credential.clone(),
                model: model.to_string(),
                day,
                index,
                locked,
            });
        }

        metrics::counter!(
            "keypool_claims_total",
            "model" => model.to_string(),
            "result" => "exhausted"
        )
        .increment(1);
        debug!(model, day = %day, "no eligible credential");
        Err(Error::NoEligibleCredential {
            model: model.to_string(),
        })
    }

    async fn skip_reason(
        &self,
        credential: &Credential,
        model: &str,
        day: &str,
        now: DateTime<Utc>,
    ) -> Option<Skip> {
        if self.bans.is_banned(credential, model).await {
            return Some(Skip::Banned);
        }
        if let Some(lock) = &self.lock {
            if lock.is_locked(credential, model).await {
                return Some(Skip::Locked);
            }
        }
        if self.quota.is_over_quota(credential, model, day).await {
            return Some(Skip::OverQuota);
        }
        if self.cooldown.is_cooling_down(credential, model, now).await {
            return Some(Skip::CoolingDown);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering::OrderingKind;
    use crate::policy::{Policy, PolicyTable};
    use crate::store::StoreAdapter;
    use crate::store::testing::{FailingStore, StalledStore, memory_adapter};
    use chrono::TimeDelta;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    const HOUR: Duration = Duration::from_secs(3600);

    struct Fixture {
        coordinator: SelectionCoordinator,
        bans: BanList,
        quota: DailyQuotaCounter,
        lock: AdvisoryLock,
        clock: DayClock,
    }

    fn fixture_with(
        store: StoreAdapter,
        keys: &[&str],
        policy: Policy,
        ordering: OrderingKind,
        locking: bool,
    ) -> Fixture {
        let mut models = BTreeMap::new();
        models.insert("m".to_string(), policy);
        let policies = Arc::new(PolicyTable::new(models, Policy::default()));
        let pool = CredentialPool::new(
            keys.iter().map(|k| Credential::new(*k)).collect(),
            ordering.strategy(),
            store.clone(),
            Duration::from_secs(86_400),
        )
        .unwrap();
        let bans = BanList::new(store.clone(), HOUR);
        let quota = DailyQuotaCounter::new(store.clone(), policies.clone(), 2 * 24 * HOUR);
        let cooldown = CooldownLimiter::new(store.clone(), policies, HOUR);
        let lock = AdvisoryLock::new(store, Duration::from_secs(10));
        let clock = DayClock::default();
        let coordinator = SelectionCoordinator::new(
            pool,
            bans.clone(),
            quota.clone(),
            cooldown,
            locking.then(|| lock.clone()),
            clock,
        );
        Fixture {
            coordinator,
            bans,
            quota,
            lock,
            clock,
        }
    }

    fn fixture(keys: &[&str], policy: Policy) -> Fixture {
        fixture_with(memory_adapter(), keys, policy, OrderingKind::Shuffle, false)
    }

    fn is_exhausted(result: &Result<Claim>) -> bool {
        matches!(result, Err(Error::NoEligibleCredential { .. }))
    }

    #[tokio::test]
    async fn second_claim_within_cooldown_is_refused() {
        let f = fixture(&["only"], Policy::new(10, None));
        let t0 = Utc::now();

        let first = f.coordinator.claim("m", t0).await.unwrap();
        assert_eq!(first.credential.expose(), "only");

        let second = f.coordinator.claim("m", t0 + TimeDelta::seconds(5)).await;
        assert!(is_exhausted(&second));

        let third = f.coordinator.claim("m", t0 + TimeDelta::seconds(11)).await;
        assert_eq!(third.unwrap().credential.expose(), "only");
    }

    #[tokio::test]
    async fn claimed_credential_is_cooling_down_until_cooldown_elapses() {
        let f = fixture(&["a", "b", "c"], Policy::new(30, None));
        let t0 = Utc::now();
        let claim = f.coordinator.claim("m", t0).await.unwrap();

        let cooldown = &f.coordinator.cooldown;
        for offset in [0, 10, 29] {
            let at = t0 + TimeDelta::seconds(offset);
            assert!(cooldown.is_cooling_down(&claim.credential, "m", at).await);
        }
        assert!(!cooldown.is_cooling_down(&claim.credential, "m", t0 + TimeDelta::seconds(30)).await);
    }

    #[tokio::test]
    async fn every_credential_cooling_down_is_exhaustion() {
        let f = fixture(&["a", "b", "c"], Policy::new(60, None));
        let t0 = Utc::now();
        let mut claimed = Vec::new();
        for _ in 0..3 {
            claimed.push(f.coordinator.claim("m", t0).await.unwrap().index);
        }
        claimed.sort_unstable();
        assert_eq!(claimed, vec![0, 1, 2]);

        assert!(is_exhausted(&f.coordinator.claim("m", t0).await));
    }

    #[tokio::test]
    async fn every_credential_banned_is_exhaustion() {
        let f = fixture(&["a", "b"], Policy::new(0, None));
        for key in f.coordinator.pool().credentials() {
            f.bans.ban_default(key, "m").await;
        }
        assert!(is_exhausted(&f.coordinator.claim("m", Utc::now()).await));
        // Bans are per model.
        assert!(f.coordinator.claim("other", Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn over_quota_credentials_are_skipped() {
        let f = fixture(&["a", "b"], Policy::new(0, Some(1)));
        let now = Utc::now();
        let day = f.clock.day_key(now);
        let a = f.coordinator.pool().credentials()[0].clone();
        f.quota.increment(&a, "m", &day, true).await;

        for _ in 0..5 {
            let claim = f.coordinator.claim("m", now).await.unwrap();
            assert_eq!(claim.credential.expose(), "b");
            assert_eq!(claim.day, day);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ban_holds_until_ttl_then_credential_returns() {
        let f = fixture(&["only"], Policy::new(10, None));
        let key = Credential::new("only");
        f.bans.ban_default(&key, "m").await;

        let t0 = Utc::now();
        assert!(is_exhausted(&f.coordinator.claim("m", t0).await));

        tokio::time::advance(HOUR + Duration::from_secs(1)).await;
        let later = t0 + TimeDelta::seconds(3601);
        assert!(f.coordinator.claim("m", later).await.is_ok());
    }

    #[tokio::test]
    async fn round_robin_rotates_through_pool() {
        let f = fixture_with(
            memory_adapter(),
            &["a", "b", "c"],
            Policy::new(0, None),
            OrderingKind::RoundRobin,
            false,
        );
        let now = Utc::now();
        let mut order = Vec::new();
        for _ in 0..6 {
            order.push(f.coordinator.claim("m", now).await.unwrap().index);
        }
        // Cold start reads the missing cursor as 0.
        assert_eq!(order, vec![1, 2, 0, 1, 2, 0]);
    }

    #[tokio::test]
    async fn round_robin_skips_ineligible_and_advances_past_them() {
        let f = fixture_with(
            memory_adapter(),
            &["a", "b", "c"],
            Policy::new(0, None),
            OrderingKind::RoundRobin,
            false,
        );
        let b = f.coordinator.pool().credentials()[1].clone();
        f.bans.ban_default(&b, "m").await;

        let now = Utc::now();
        let order: Vec<usize> = [
            f.coordinator.claim("m", now).await.unwrap().index,
            f.coordinator.claim("m", now).await.unwrap().index,
            f.coordinator.claim("m", now).await.unwrap().index,
        ]
        .into();
        assert_eq!(order, vec![2, 0, 2]);
    }

    #[tokio::test]
    async fn locked_claim_has_already_stamped_cursor_and_usage() {
        let f = fixture_with(
            memory_adapter(),
            &["a", "b", "c"],
            Policy::new(30, None),
            OrderingKind::RoundRobin,
            true,
        );
        let now = Utc::now();
        let claim = f.coordinator.claim("m", now).await.unwrap();

        assert!(claim.locked);
        assert!(f.lock.is_locked(&claim.credential, "m").await);
        assert_eq!(f.coordinator.pool().cursor("m").await, Some(claim.index));
        assert!(
            f.coordinator
                .cooldown
                .is_cooling_down(&claim.credential, "m", now)
                .await
        );
    }

    #[tokio::test]
    async fn locked_credentials_are_skipped_when_locking_enabled() {
        let f = fixture_with(
            memory_adapter(),
            &["a", "b"],
            Policy::new(0, None),
            OrderingKind::RoundRobin,
            true,
        );
        let now = Utc::now();

        let first = f.coordinator.claim("m", now).await.unwrap();
        assert!(first.locked);
        assert!(f.lock.is_locked(&first.credential, "m").await);

        let second = f.coordinator.claim("m", now).await.unwrap();
        assert_ne!(second.credential, first.credential);

        assert!(is_exhausted(&f.coordinator.claim("m", now).await));

        f.lock.release(&first.credential, "m").await;
        let third = f.coordinator.claim("m", now).await.unwrap();
        assert_eq!(third.credential, first.credential);
    }

    #[tokio::test]
    async fn locks_are_ignored_when_locking_disabled() {
        let f = fixture(&["only"], Policy::new(0, None));
        let key = Credential::new("only");
        f.lock.acquire(&key, "m").await;

        let claim = f.coordinator.claim("m", Utc::now()).await.unwrap();
        assert!(!claim.locked);
    }

    #[tokio::test]
    async fn failing_store_degrades_to_eligible() {
        let store = StoreAdapter::new(Arc::new(FailingStore), Duration::from_millis(50));
        let f = fixture_with(store, &["a"], Policy::new(60, Some(1)), OrderingKind::RoundRobin, true);
        let now = Utc::now();
        // Nothing sticks, so the same credential stays claimable.
        assert!(f.coordinator.claim("m", now).await.is_ok());
        let claim = f.coordinator.claim("m", now).await.unwrap();
        assert!(!claim.locked);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_does_not_block_claims() {
        let store = StoreAdapter::new(Arc::new(StalledStore), Duration::from_millis(50));
        let f = fixture_with(store, &["a"], Policy::new(60, None), OrderingKind::Shuffle, false);
        assert!(f.coordinator.claim("m", Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn claims_are_counted_by_result() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let f = fixture(&["only"], Policy::new(60, None));
        let now = Utc::now();
        f.coordinator.claim("m", now).await.unwrap();
        let _ = f.coordinator.claim("m", now).await;

        let output = handle.render();
        assert!(output.contains(r#"keypool_claims_total{model="m",result="claimed"} 1"#), "got: {output}");
        assert!(output.contains(r#"keypool_claims_total{model="m",result="exhausted"} 1"#), "got: {output}");
    }
}

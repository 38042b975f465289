//! Daily per-(credential, model) counters
//!
//! Two sibling counters per day: `count` (successful calls, checked against the
//! quota) and `error_count` (failed calls, for statistics). Increments are a
//! plain read followed by a write; concurrent increments can lose updates, so
//! the quota is a soft ceiling.

use std::sync::Arc;
use std::time::Duration;

use common::Credential;

use crate::keys;
use crate::policy::PolicyTable;
use crate::store::StoreAdapter;

#[derive(Clone)]
pub struct DailyQuotaCounter {
    store: StoreAdapter,
    policies: Arc<PolicyTable>,
    ttl: Duration,
}

impl DailyQuotaCounter {
    pub fn new(store: StoreAdapter, policies: Arc<PolicyTable>, ttl: Duration) -> Self {
        Self {
            store,
            policies,
            ttl,
        }
    }

    pub async fn count(&self, credential: &Credential, model: &str, day: &str) -> u64 {
        self.store.get_count(&keys::quota(model, credential, day)).await
    }

    pub async fn error_count(&self, credential: &Credential, model: &str, day: &str) -> u64 {
        self.store.get_count(&keys::error(model, credential, day)).await
    }

    /// Unbounded quotas are never exceeded.
    pub async fn is_over_quota(&self, credential: &Credential, model: &str, day: &str) -> bool {
        let policy = self.policies.get(model);
        if policy.daily_quota.is_none() {
            return false;
        }
        policy.quota_exhausted(self.count(credential, model, day).await)
    }

    /// Add one call to `count` when `success`, else to `error_count`.
    /// Each write refreshes the counter's expiry.
    pub async fn increment(&self, credential: &Credential, model: &str, day: &str, success: bool) {
        let key = if success {
            keys::quota(model, credential, day)
        } else {
            keys::error(model, credential, day)
        };
        let next = self.store.get_count(&key).await.saturating_add(1);
        self.store.put(&key, &next.to_string(), self.ttl).await;
    }
}

//! Per-(credential, model) cooldown
//!
//! The usage record holds the unix-millisecond timestamp of the last claim. A
//! pair is cooling down while less than the model's cooldown has elapsed since
//! then. A missing record (cold start, expiry, store failure) is never cooling
//! down.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::Credential;

use crate::keys;
use crate::policy::PolicyTable;
use crate::store::StoreAdapter;

#[derive(Clone)]
pub struct CooldownLimiter {
    store: StoreAdapter,
    policies: Arc<PolicyTable>,
    usage_ttl: Duration,
}

impl CooldownLimiter {
    pub fn new(store: StoreAdapter, policies: Arc<PolicyTable>, usage_ttl: Duration) -> Self {
        Self {
            store,
            policies,
            usage_ttl,
        }
    }

    /// When the pair was last claimed, if the record is still present.
    pub async fn last_used(&self, credential: &Credential, model: &str) -> Option<DateTime<Utc>> {
        let millis = self.store.get_i64(&keys::usage(model, credential)).await?;
        DateTime::from_timestamp_millis(millis)
    }

    /// Side-effect free.
    pub async fn is_cooling_down(
        &self,
        credential: &Credential,
        model: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let cooldown = self.policies.get(model).cooldown();
        if cooldown.is_zero() {
            return false;
        }
        let Some(last) = self.last_used(credential, model).await else {
            return false;
        };
        let elapsed_ms = now.timestamp_millis() - last.timestamp_millis();
        elapsed_ms < i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX)
    }

    /// Write the usage record for a claim made at `now`.
    pub async fn mark_used(&self, credential: &Credential, model: &str, now: DateTime<Utc>) -> bool {
        self.store
            .put(
                &keys::usage(model, credential),
                &now.timestamp_millis().to_string(),
                self.usage_ttl,
            )
            .await
    }
}

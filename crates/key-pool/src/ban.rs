//! Temporary bans after upstream throttling

use std::time::Duration;

use common::Credential;
use tracing::info;

use crate::keys;
use crate::store::StoreAdapter;

/// Presence of `ban:{model}:{credential}` excludes the pair until it expires.
#[derive(Clone)]
pub struct BanList {
    store: StoreAdapter,
    ttl: Duration,
}

impl BanList {
    /// `ttl` is the default ban window used by `ban_default`.
    pub fn new(store: StoreAdapter, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn is_banned(&self, credential: &Credential, model: &str) -> bool {
        self.store.exists(&keys::ban(model, credential)).await
    }

    /// Ban the pair for `ttl` from now. Banning again restarts the window.
    pub async fn ban(&self, credential: &Credential, model: &str, ttl: Duration) {
        self.store
            .put(&keys::ban(model, credential), "1", ttl)
            .await;
        metrics::counter!("keypool_bans_total", "model" => model.to_string()).increment(1);
        info!(
            model,
            credential = %credential,
            ttl_secs = ttl.as_secs(),
            "credential banned after upstream throttling"
        );
    }

    pub async fn ban_default(&self, credential: &Credential, model: &str) {
        self.ban(credential, model, self.ttl).await;
    }
}

//! Optional advisory lock on a claimed credential
//!
//! Narrows the window in which two concurrent requests claim the same pair.
//! It cannot close it: acquiring is an unconditional write, not a
//! compare-and-swap. The short TTL bounds how long a crashed holder can idle a
//! credential.

use std::time::Duration;

use common::Credential;

use crate::keys;
use crate::store::StoreAdapter;

#[derive(Clone)]
pub struct AdvisoryLock {
    store: StoreAdapter,
    ttl: Duration,
}

impl AdvisoryLock {
    pub fn new(store: StoreAdapter, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn is_locked(&self, credential: &Credential, model: &str) -> bool {
        self.store.exists(&keys::lock(model, credential)).await
    }

    /// Returns whether the store took the write.
    pub async fn acquire(&self, credential: &Credential, model: &str) -> bool {
        self.store
            .put(&keys::lock(model, credential), "1", self.ttl)
            .await
    }

    pub async fn release(&self, credential: &Credential, model: &str) {
        self.store.delete(&keys::lock(model, credential)).await;
    }
}

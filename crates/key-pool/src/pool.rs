//! Credential pool and candidate listing

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::Credential;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::keys;
use crate::ordering::CandidateOrder;
use crate::store::StoreAdapter;

/// The configured credentials and the strategy that orders them per request.
///
/// The credential set is immutable for the process lifetime. Duplicates are
/// dropped at construction (identity is the exact string).
#[derive(Clone)]
pub struct CredentialPool {
    credentials: Arc<[Credential]>,
    order: Arc<dyn CandidateOrder>,
    store: StoreAdapter,
    cursor_ttl: Duration,
}

impl CredentialPool {
    /// Build a pool. An empty credential list is `ConfigMissing`.
    pub fn new(
        credentials: Vec<Credential>,
        order: Arc<dyn CandidateOrder>,
        store: StoreAdapter,
        cursor_ttl: Duration,
    ) -> Result<Self> {
        let configured = credentials.len();
        let mut seen = HashSet::with_capacity(configured);
        let credentials: Vec<Credential> = credentials
            .into_iter()
            .filter(|c| seen.insert(c.clone()))
            .collect();

        if credentials.is_empty() {
            return Err(Error::ConfigMissing("no upstream credentials configured".into()));
        }
        if credentials.len() < configured {
            warn!(
                dropped = configured - credentials.len(),
                "duplicate credentials in configuration ignored"
            );
        }
        info!(
            credentials = credentials.len(),
            ordering = order.name(),
            "credential pool initialized"
        );

        Ok(Self {
            credentials: credentials.into(),
            order,
            store,
            cursor_ttl,
        })
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn ordering(&self) -> &'static str {
        self.order.name()
    }

    /// Every configured credential exactly once, in the order this request
    /// should try them, paired with its pool index.
    pub async fn list_candidates(&self, model: &str) -> Vec<(usize, &Credential)> {
        let last = if self.order.uses_cursor() {
            self.cursor(model).await
        } else {
            None
        };
        self.order
            .order(self.credentials.len(), last)
            .into_iter()
            .map(|i| (i, &self.credentials[i]))
            .collect()
    }

    /// Stored round-robin cursor for `model`.
    pub async fn cursor(&self, model: &str) -> Option<usize> {
        self.store
            .get_i64(&keys::cursor(model))
            .await
            .and_then(|v| usize::try_from(v).ok())
    }

    /// Record `index` as the last claimed credential. No-op for strategies
    /// that do not read a cursor.
    pub async fn advance_cursor(&self, model: &str, index: usize) {
        if self.order.uses_cursor() {
            self.store
                .put(&keys::cursor(model), &index.to_string(), self.cursor_ttl)
                .await;
        }
    }
}

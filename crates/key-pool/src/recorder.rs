//! Outcome recording and the claim guard
//!
//! After the forwarded call the recorder updates the daily counters, bans the
//! pair on a throttling signal, and releases the advisory lock. The lock is
//! released on every outcome.
//!
//! `ClaimGuard` ties a claim to its recording: `complete` records the given
//! outcome, and a guard dropped without completing (request aborted, handler
//! panicked, client went away) records `OtherFailure` on a background task so
//! the lock is never left to expire on its own.

use tracing::{debug, warn};

use crate::ban::BanList;
use crate::coordinator::Claim;
use crate::lock::AdvisoryLock;
use crate::outcome::Outcome;
use crate::quota::DailyQuotaCounter;

#[derive(Clone)]
pub struct UsageRecorder {
    quota: DailyQuotaCounter,
    bans: BanList,
    lock: Option<AdvisoryLock>,
}

impl UsageRecorder {
    pub fn new(quota: DailyQuotaCounter, bans: BanList, lock: Option<AdvisoryLock>) -> Self {
        Self { quota, bans, lock }
    }

    /// Apply `outcome` to the claimed (credential, model, day).
    ///
    /// - `Success`: count += 1
    /// - `Throttled`: ban, error_count += 1
    /// - `OtherFailure`: error_count += 1
    pub async fn record(&self, claim: &Claim, outcome: Outcome) {
        let Claim {
            credential,
            model,
            day,
            ..
        } = claim;

        match outcome {
            Outcome::Success => self.quota.increment(credential, model, day, true).await,
            Outcome::Throttled => {
                self.bans.ban_default(credential, model).await;
                self.quota.increment(credential, model, day, false).await;
            }
            Outcome::OtherFailure => self.quota.increment(credential, model, day, false).await,
        }

        if claim.locked {
            if let Some(lock) = &self.lock {
                lock.release(credential, model).await;
            }
        }

        metrics::counter!(
            "keypool_outcomes_total",
            "model" => model.clone(),
            "outcome" => outcome.label()
        )
        .increment(1);
        debug!(model = %model, credential = %credential, outcome = %outcome, "usage recorded");
    }
}

/// A claimed credential whose outcome has not been recorded yet.
pub struct ClaimGuard {
    claim: Claim,
    recorder: UsageRecorder,
    completed: bool,
}

impl ClaimGuard {
    pub fn new(claim: Claim, recorder: UsageRecorder) -> Self {
        Self {
            claim,
            recorder,
            completed: false,
        }
    }

    pub fn claim(&self) -> &Claim {
        &self.claim
    }

    pub fn credential(&self) -> &common::Credential {
        &self.claim.credential
    }

    /// Record `outcome` for this claim.
    ///
    /// The recording runs on its own task, so it finishes even if the caller
    /// is cancelled while awaiting it.
    pub async fn complete(mut self, outcome: Outcome) {
        self.completed = true;
        let recorder = self.recorder.clone();
        let claim = self.claim.clone();
        let task = tokio::spawn(async move { recorder.record(&claim, outcome).await });
        if let Err(e) = task.await {
            warn!(error = %e, "usage recording task failed");
        }
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let recorder = self.recorder.clone();
        let claim = self.claim.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(
                    model = %claim.model,
                    credential = %claim.credential,
                    "claim dropped before completion, recording failure"
                );
                handle.spawn(async move { recorder.record(&claim, Outcome::OtherFailure).await });
            }
            Err(_) => warn!(
                model = %claim.model,
                "claim dropped outside a runtime; lock left to expire"
            ),
        }
    }
}

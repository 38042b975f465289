//! Candidate ordering strategies
//!
//! The coordinator walks candidates in the order a strategy produces and takes
//! the first eligible one. Two strategies are supported:
//!
//! - **Round-robin**: start after the per-model cursor and wrap. Deterministic
//!   fairness when requests arrive one at a time.
//! - **Shuffle**: a fresh uniform permutation per request. Many concurrent,
//!   stateless requests rarely converge on the same first candidate, which
//!   matters when the store cannot serialize claims.

use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::Deserialize;

/// Configured ordering strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingKind {
    RoundRobin,
    #[default]
    Shuffle,
}

impl OrderingKind {
    pub fn strategy(self) -> Arc<dyn CandidateOrder> {
        match self {
            OrderingKind::RoundRobin => Arc::new(RoundRobin),
            OrderingKind::Shuffle => Arc::new(Shuffle),
        }
    }
}

/// Produces the order in which pool indices are tried.
pub trait CandidateOrder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the strategy reads the per-model cursor and expects it advanced
    /// on every claim.
    fn uses_cursor(&self) -> bool;

    /// A permutation of `0..n`. `last` is the stored cursor, if any.
    fn order(&self, n: usize, last: Option<usize>) -> Vec<usize>;
}

/// Start at `(last + 1) mod n`, then `(start + i) mod n`.
/// A missing cursor reads as 0, so a cold start begins at index `1 mod n`.
pub struct RoundRobin;

impl CandidateOrder for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn uses_cursor(&self) -> bool {
        true
    }

    fn order(&self, n: usize, last: Option<usize>) -> Vec<usize> {
        if n == 0 {
            return Vec::new();
        }
        let start = (last.unwrap_or(0) % n + 1) % n;
        (0..n).map(|i| (start + i) % n).collect()
    }
}

/// Fisher–Yates shuffle from the thread-local RNG.
pub struct Shuffle;

impl CandidateOrder for Shuffle {
    fn name(&self) -> &'static str {
        "shuffle"
    }

    fn uses_cursor(&self) -> bool {
        false
    }

    fn order(&self, n: usize, _last: Option<usize>) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut rand::rng());
        indices
    }
}

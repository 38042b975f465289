//! Upstream outcome classification

use std::fmt;

/// How a forwarded call ended, as far as the pool cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx: counts against the daily quota.
    Success,
    /// The upstream's rate-limit signal: ban the pair and count an error.
    Throttled,
    /// Anything else, including transport errors, timeouts and cancelled
    /// requests: count an error, no ban.
    OtherFailure,
}

impl Outcome {
    /// Classify an upstream HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Outcome::Success,
            429 => Outcome::Throttled,
            _ => Outcome::OtherFailure,
        }
    }

    /// Label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Throttled => "throttled",
            Outcome::OtherFailure => "other_failure",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

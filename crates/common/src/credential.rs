//! Upstream credentials
//!
//! A credential is an opaque API key string. Identity is the exact string; it
//! is never logged or rendered in full, only through one of the redacted forms.

use std::fmt;

use crate::Secret;

/// An upstream account secret managed by the pool.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(Secret<String>);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Secret::new(value.into()))
    }

    /// The raw key, for the upstream request header and the state store layout.
    pub fn expose(&self) -> &str {
        self.0.expose()
    }

    /// `first4****last4`, as shown on the statistics page.
    pub fn redacted(&self) -> String {
        self.redact_with(4, "****")
    }

    /// `first7......last7`, as reported by the key health check.
    pub fn redacted_wide(&self) -> String {
        self.redact_with(7, "......")
    }

    /// Keys too short to keep both ends hidden are fully masked.
    fn redact_with(&self, edge: usize, filler: &str) -> String {
        let chars: Vec<char> = self.expose().chars().collect();
        if chars.len() <= edge * 2 {
            return "*".repeat(chars.len().max(4));
        }
        let head: String = chars[..edge].iter().collect();
        let tail: String = chars[chars.len() - edge..].iter().collect();
        format!("{head}{filler}{tail}")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.redacted())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Split a comma-separated secret list, trimming entries and dropping empties.
pub fn parse_secret_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

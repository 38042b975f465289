//! Calendar days in a fixed reference time zone
//!
//! Daily counters roll over at local midnight of a configured zone, not UTC
//! and not wherever the process happens to run, so every instance agrees on
//! which day a call belongs to.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::{Error, Result};

/// Zone used when none is configured.
pub const DEFAULT_TIME_ZONE: &str = "America/Los_Angeles";

/// Maps instants to `YYYY-MM-DD` day keys in one time zone.
#[derive(Debug, Clone, Copy)]
pub struct DayClock {
    tz: Tz,
}

impl DayClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Parse an IANA zone name such as `America/Los_Angeles`.
    pub fn from_name(name: &str) -> Result<Self> {
        name.parse::<Tz>()
            .map(Self::new)
            .map_err(|_| Error::ConfigMissing(format!("unknown time zone: {name}")))
    }

    pub fn time_zone(&self) -> Tz {
        self.tz
    }

    /// The calendar date of `now` in the reference zone.
    pub fn day_key(&self, now: DateTime<Utc>) -> String {
        now.with_timezone(&self.tz).format("%Y-%m-%d").to_string()
    }

    /// `at` as local wall-clock time, for display.
    pub fn local_time(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.tz)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }
}

impl Default for DayClock {
    fn default() -> Self {
        Self::new(chrono_tz::America::Los_Angeles)
    }
}

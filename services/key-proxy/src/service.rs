//! Process-wide counters and lifecycle constants

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How long in-flight requests may run after a shutdown signal.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Counters reported by `/health`. Shared between handlers via `Arc`.
#[derive(Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    /// Requests currently being forwarded; logged if the drain times out.
    pub in_flight: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Mark a request in flight until the returned guard drops.
    pub fn track_in_flight(&self) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlight(self.in_flight.clone())
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InFlight(Arc<AtomicU64>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_guard_decrements_on_drop() {
        let metrics = ServiceMetrics::new();
        let a = metrics.track_in_flight();
        let b = metrics.track_in_flight();
        assert_eq!(metrics.in_flight.load(Ordering::Relaxed), 2);
        drop(a);
        assert_eq!(metrics.in_flight.load(Ordering::Relaxed), 1);
        drop(b);
        assert_eq!(metrics.in_flight.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn clones_share_counters() {
        let metrics = ServiceMetrics::new();
        let clone = metrics.clone();
        clone.requests_total.fetch_add(3, Ordering::Relaxed);
        assert_eq!(metrics.requests_total.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn drain_timeout_is_five_seconds() {
        assert_eq!(DRAIN_TIMEOUT, Duration::from_secs(5));
    }
}

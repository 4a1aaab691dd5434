//! Shared health state for the /health endpoint.
//! Updated by the collectors, read by the API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Process-wide collection counters.
pub struct HealthState {
    started_at: Instant,
    /// Unix seconds at which the last collection task finished (0 = none).
    last_collection_at: AtomicU64,
    /// Upstream fetches that failed and were skipped.
    fetch_errors: AtomicU64,
    /// Apps passed through the opportunity pipeline.
    apps_scored: AtomicU64,
    trend_points_saved: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            last_collection_at: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
            apps_scored: AtomicU64::new(0),
            trend_points_saved: AtomicU64::new(0),
        }
    }

    pub fn mark_collection_finished(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.last_collection_at.store(now, Ordering::Relaxed);
    }

    pub fn inc_fetch_errors(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_apps_scored(&self, n: u64) {
        self.apps_scored.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_trend_points(&self, n: u64) {
        self.trend_points_saved.fetch_add(n, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn last_collection_at(&self) -> u64 {
        self.last_collection_at.load(Ordering::Relaxed)
    }

    pub fn fetch_errors(&self) -> u64 {
        self.fetch_errors.load(Ordering::Relaxed)
    }

    pub fn apps_scored(&self) -> u64 {
        self.apps_scored.load(Ordering::Relaxed)
    }

    pub fn trend_points_saved(&self) -> u64 {
        self.trend_points_saved.load(Ordering::Relaxed)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let h = HealthState::new();
        assert_eq!(h.last_collection_at(), 0);
        h.add_apps_scored(12);
        h.add_apps_scored(3);
        h.add_trend_points(40);
        h.inc_fetch_errors();
        h.mark_collection_finished();
        assert_eq!(h.apps_scored(), 15);
        assert_eq!(h.trend_points_saved(), 40);
        assert_eq!(h.fetch_errors(), 1);
        assert!(h.last_collection_at() > 0);
    }
}

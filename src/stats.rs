//! Request counters reported at each maintenance cycle.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::resolver::QueryAction;

pub struct Stats {
    pub requests: AtomicU64,
    pub cached: AtomicU64,
    pub refreshed: AtomicU64,
    pub forwarded: AtomicU64,
    pub passthrough: AtomicU64,
    pub failed: AtomicU64,
    /// Cumulative response time in microseconds for averaging.
    total_response_time_us: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            cached: AtomicU64::new(0),
            refreshed: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            passthrough: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
        }
    }

    pub fn record(&self, action: &QueryAction, response_time_ms: f64) {
        let counter = match action {
            QueryAction::Cached(_) => &self.cached,
            QueryAction::Refreshed(_) => &self.refreshed,
            QueryAction::Forwarded(_) => &self.forwarded,
            QueryAction::Passthrough(_) => &self.passthrough,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add((response_time_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let requests = self.requests.swap(0, Ordering::Relaxed);
        let cached = self.cached.swap(0, Ordering::Relaxed);
        let refreshed = self.refreshed.swap(0, Ordering::Relaxed);
        let forwarded = self.forwarded.swap(0, Ordering::Relaxed);
        let passthrough = self.passthrough.swap(0, Ordering::Relaxed);
        let failed = self.failed.swap(0, Ordering::Relaxed);
        let total_us = self.total_response_time_us.swap(0, Ordering::Relaxed);

        let answered = requests - failed.min(requests);
        let avg_response_ms = if answered > 0 {
            (total_us as f64 / answered as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            requests,
            cached,
            refreshed,
            forwarded,
            passthrough,
            failed,
            avg_response_ms,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub cached: u64,
    pub refreshed: u64,
    pub forwarded: u64,
    pub passthrough: u64,
    pub failed: u64,
    pub avg_response_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_counts_and_resets() {
        let stats = Stats::new();
        stats.record(&QueryAction::Cached(vec![]), 1.0);
        stats.record(&QueryAction::Forwarded(vec![]), 3.0);
        stats.record_failed();

        let snapshot = stats.snapshot_and_reset();

        assert_eq!(snapshot.requests, 3);
        assert_eq!(snapshot.cached, 1);
        assert_eq!(snapshot.forwarded, 1);
        assert_eq!(snapshot.failed, 1);
        assert!((snapshot.avg_response_ms - 2.0).abs() < 1e-9);

        let empty = stats.snapshot_and_reset();
        assert_eq!(empty.requests, 0);
        assert_eq!(empty.avg_response_ms, 0.0);
    }
}

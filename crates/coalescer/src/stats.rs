//! Atomically observable counters for a [`crate::Coalescer`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Scalar counters maintained by a [`crate::Coalescer`]. Each counter is
/// monotonically non-decreasing between `reset_stats()` calls; no ordering
/// guarantee is made across distinct counters.
#[derive(Debug, Default)]
pub struct CoalescerStats {
    pub(crate) total_requests: AtomicU64,
    pub(crate) actual_queries: AtomicU64,
    pub(crate) coalesced_requests: AtomicU64,
    pub(crate) timeout_requests: AtomicU64,
    pub(crate) overflow_requests: AtomicU64,
    pub(crate) version_gap_skipped_requests: AtomicU64,
    pub(crate) active_groups: AtomicU64,
}

impl CoalescerStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Take a point-in-time snapshot of every counter, plus the derived
    /// coalescing rate.
    pub fn snapshot(&self) -> CoalescerStatsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let coalesced_requests = self.coalesced_requests.load(Ordering::Relaxed);
        let coalescing_rate = if total_requests == 0 {
            0.0
        } else {
            coalesced_requests as f64 / total_requests as f64
        };

        CoalescerStatsSnapshot {
            total_requests,
            actual_queries: self.actual_queries.load(Ordering::Relaxed),
            coalesced_requests,
            timeout_requests: self.timeout_requests.load(Ordering::Relaxed),
            overflow_requests: self.overflow_requests.load(Ordering::Relaxed),
            version_gap_skipped_requests: self
                .version_gap_skipped_requests
                .load(Ordering::Relaxed),
            active_groups: self.active_groups.load(Ordering::Relaxed),
            coalescing_rate,
        }
    }

    /// Zero every cumulative counter. `active_groups` is a live gauge, not
    /// a cumulative counter, so it is left untouched: zeroing it while
    /// groups are actually in flight would misreport live state.
    pub(crate) fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.actual_queries.store(0, Ordering::Relaxed);
        self.coalesced_requests.store(0, Ordering::Relaxed);
        self.timeout_requests.store(0, Ordering::Relaxed);
        self.overflow_requests.store(0, Ordering::Relaxed);
        self.version_gap_skipped_requests.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of [`CoalescerStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoalescerStatsSnapshot {
    pub total_requests: u64,
    pub actual_queries: u64,
    pub coalesced_requests: u64,
    pub timeout_requests: u64,
    pub overflow_requests: u64,
    pub version_gap_skipped_requests: u64,
    pub active_groups: u64,
    /// `coalesced_requests / total_requests`, or `0.0` if no requests have
    /// been observed yet.
    pub coalescing_rate: f64,
}

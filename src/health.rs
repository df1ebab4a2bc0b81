//! Lock-free health counters and the status snapshot served by [`crate::facade::PublisherHandle::health_check`].
//!
//! Per spec §5 ("Health and metric registries are process-wide and mutated only through
//! lock-free counters"), every counter here is a bare atomic; reading a snapshot never
//! blocks the actor's hot path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Atomic counters owned by one publisher actor.
#[derive(Debug, Default)]
pub struct HealthCounters {
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    records_acked: AtomicU64,
    recoveries: AtomicU64,
    lag_poll_failures: AtomicU64,
    fenced: AtomicBool,
}

impl HealthCounters {
    pub fn record_commit(&self, records_acked: u64) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        self.records_acked.fetch_add(records_acked, Ordering::Relaxed);
    }

    pub fn record_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lag_poll_failure(&self) {
        self.lag_poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_fenced(&self) {
        self.fenced.store(true, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthCountersSnapshot {
        HealthCountersSnapshot {
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            records_acked: self.records_acked.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            lag_poll_failures: self.lag_poll_failures.load(Ordering::Relaxed),
            fenced: self.fenced.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`HealthCounters`], cheap to pass around and compare in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthCountersSnapshot {
    pub transactions_committed: u64,
    pub transactions_aborted: u64,
    pub records_acked: u64,
    pub recoveries: u64,
    pub lag_poll_failures: u64,
    pub fenced: bool,
}

/// The reply to a [`crate::facade::PublisherHandle::health_check`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStatus {
    pub up: bool,
    pub state: &'static str,
    pub counters: HealthCountersSnapshot,
}

impl HealthStatus {
    /// The status reported when the actor could not be reached at all (terminated,
    /// channel closed, or ask timed out). Per spec §4.4: "any error yields a `DOWN` result
    /// rather than a failed future."
    pub fn down() -> Self {
        Self {
            up: false,
            state: "down",
            counters: HealthCountersSnapshot::default(),
        }
    }
}

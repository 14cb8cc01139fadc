//! Metrics collection for lock clients.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lock client metrics. May be shared between clients to aggregate.
#[derive(Debug, Default)]
pub struct LockMetrics {
    /// Tokens created.
    pub tokens_created: AtomicU64,
    /// Locks acquired on the first rank check.
    pub acquired_immediately: AtomicU64,
    /// Locks acquired after waiting on a predecessor.
    pub acquired_after_wait: AtomicU64,
    /// Watch waits started.
    pub wait_cycles: AtomicU64,
    /// Wakeups after which the client was still not first.
    pub spurious_wakeups: AtomicU64,
    /// Bounded attempts that gave up.
    pub timeouts: AtomicU64,
    /// Successful releases.
    pub released: AtomicU64,
    /// Failed releases.
    pub release_failures: AtomicU64,
    /// Errors that poisoned a client.
    pub fatal_errors: AtomicU64,
}

impl LockMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a token created.
    pub fn token_created(&self) {
        self.tokens_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lock acquired without waiting.
    pub fn acquired_immediately(&self) {
        self.acquired_immediately.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lock acquired after waiting.
    pub fn acquired_after_wait(&self) {
        self.acquired_after_wait.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a watch wait.
    pub fn wait_cycle(&self) {
        self.wait_cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a wakeup that did not grant the lock.
    pub fn spurious_wakeup(&self) {
        self.spurious_wakeups.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a bounded attempt that gave up.
    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a release.
    pub fn released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed release.
    pub fn release_failed(&self) {
        self.release_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fatal error.
    pub fn fatal_error(&self) {
        self.fatal_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> LockMetricsSnapshot {
        LockMetricsSnapshot {
            tokens_created: self.tokens_created.load(Ordering::Relaxed),
            acquired_immediately: self.acquired_immediately.load(Ordering::Relaxed),
            acquired_after_wait: self.acquired_after_wait.load(Ordering::Relaxed),
            wait_cycles: self.wait_cycles.load(Ordering::Relaxed),
            spurious_wakeups: self.spurious_wakeups.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
            fatal_errors: self.fatal_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetricsSnapshot {
    pub tokens_created: u64,
    pub acquired_immediately: u64,
    pub acquired_after_wait: u64,
    pub wait_cycles: u64,
    pub spurious_wakeups: u64,
    pub timeouts: u64,
    pub released: u64,
    pub release_failures: u64,
    pub fatal_errors: u64,
}

impl LockMetricsSnapshot {
    /// Total acquisitions.
    pub fn acquisitions(&self) -> u64 {
        self.acquired_immediately + self.acquired_after_wait
    }

    /// Tokens neither released nor withdrawn.
    pub fn outstanding(&self) -> u64 {
        self.tokens_created
            .saturating_sub(self.released + self.timeouts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = LockMetrics::new();
        metrics.token_created();
        metrics.token_created();
        metrics.acquired_immediately();
        metrics.acquired_after_wait();
        metrics.released();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.acquisitions(), 2);
        assert_eq!(snapshot.outstanding(), 1);
    }
}

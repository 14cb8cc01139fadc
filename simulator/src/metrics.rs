//! Simulation metrics.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use turnstile_client::LockMetricsSnapshot;

/// Tracks how many contenders believe they hold the lock.
#[derive(Debug, Default)]
pub struct Occupancy {
    holders: AtomicUsize,
    max_holders: AtomicUsize,
}

impl Occupancy {
    /// Record a holder entering. Returns the holder count including it.
    pub fn enter(&self) -> usize {
        let now = self.holders.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_holders.fetch_max(now, Ordering::SeqCst);
        now
    }

    /// Record a holder leaving.
    pub fn leave(&self) {
        self.holders.fetch_sub(1, Ordering::SeqCst);
    }

    /// Highest holder count seen.
    pub fn max(&self) -> usize {
        self.max_holders.load(Ordering::SeqCst)
    }
}

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Contenders that got the lock.
    pub acquired: u64,
    /// Contenders whose bounded wait ran out.
    pub timed_out: u64,
    /// Contenders that failed, by error code.
    pub failures: BTreeMap<String, u64>,
    /// Token sequence numbers in acquisition order.
    pub acquisition_order: Vec<u64>,
    /// Wait samples (ms).
    wait_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            acquired: 0,
            timed_out: 0,
            failures: BTreeMap::new(),
            acquisition_order: Vec::new(),
            wait_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record an acquisition.
    pub fn record_acquired(&mut self, sequence: u64, wait_ms: u64) {
        self.acquired += 1;
        self.acquisition_order.push(sequence);

        if self.wait_samples.len() >= self.max_samples {
            self.wait_samples.pop_front();
        }
        self.wait_samples.push_back(wait_ms);
    }

    /// Record a bounded wait that gave up.
    pub fn record_timeout(&mut self) {
        self.timed_out += 1;
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self, code: &str) {
        *self.failures.entry(code.to_string()).or_insert(0) += 1;
    }

    /// Total failures.
    pub fn failed(&self) -> u64 {
        self.failures.values().sum()
    }

    /// Get average wait in ms.
    pub fn average_wait_ms(&self) -> u64 {
        if self.wait_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.wait_samples.iter().sum();
        sum / self.wait_samples.len() as u64
    }

    /// Get p99 wait.
    pub fn p99_wait_ms(&self) -> u64 {
        self.percentile_wait(99)
    }

    fn percentile_wait(&self, percentile: usize) -> u64 {
        if self.wait_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.wait_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Check that acquisitions followed token order.
    pub fn is_fifo(&self) -> bool {
        self.acquisition_order.windows(2).all(|w| w[0] < w[1])
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one scenario run, printed as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenario: String,
    pub clients: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub acquired: u64,
    pub timed_out: u64,
    pub failed: u64,
    pub failures: BTreeMap<String, u64>,
    pub acquisition_order: Vec<u64>,
    pub max_concurrent_holders: usize,
    pub average_wait_ms: u64,
    pub p99_wait_ms: u64,
    pub leftover_tokens: Vec<String>,
    pub violations: Vec<String>,
    pub lock_metrics: LockMetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_acquired(1, 0);
        metrics.record_acquired(2, 20);
        metrics.record_acquired(3, 40);
        metrics.record_timeout();
        metrics.record_failure("TOKEN_LOST");

        assert_eq!(metrics.acquired, 3);
        assert_eq!(metrics.timed_out, 1);
        assert_eq!(metrics.failed(), 1);
        assert_eq!(metrics.average_wait_ms(), 20);
        assert_eq!(metrics.p99_wait_ms(), 40);
        assert!(metrics.is_fifo());
    }

    #[test]
    fn test_out_of_order_is_not_fifo() {
        let mut metrics = SimulationMetrics::new();
        metrics.record_acquired(2, 0);
        metrics.record_acquired(1, 0);
        assert!(!metrics.is_fifo());
    }

    #[test]
    fn test_occupancy_tracks_maximum() {
        let occupancy = Occupancy::default();
        assert_eq!(occupancy.enter(), 1);
        occupancy.leave();
        assert_eq!(occupancy.enter(), 1);
        assert_eq!(occupancy.enter(), 2);
        occupancy.leave();
        occupancy.leave();
        assert_eq!(occupancy.max(), 2);
    }
}

//! Turnstile Lock Client
//!
//! A mutual-exclusion lock shared across processes, coordinated through a
//! hierarchical, watch-capable coordination service. Each attempt creates an
//! ephemeral sequential token under a root node; the holder is the owner of
//! the smallest token, and every waiter watches only the token immediately
//! ahead of it, so a release wakes exactly one waiter.

pub mod client;
pub mod competitors;
pub mod config;
pub mod metrics;
pub mod state;
pub mod watch;

pub use client::LockClient;
pub use competitors::{CompetitorSet, Rank};
pub use config::LockConfig;
pub use metrics::{LockMetrics, LockMetricsSnapshot};
pub use state::LockState;
pub use watch::{WaitOutcome, WatchDispatcher, WatchGate};

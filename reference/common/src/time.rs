//! Time utilities and constants for the Turnstile protocol.

use std::time::{Duration, Instant};

/// Protocol constants.
pub mod constants {
    use super::Duration;

    /// Width of the zero-padded sequence suffix assigned by the service.
    pub const SEQUENCE_WIDTH: usize = 10;

    /// Default root path under which tokens are created.
    pub const DEFAULT_ROOT_PATH: &str = "/locks";

    /// Default separator between lock name and sequence suffix.
    pub const DEFAULT_SEPARATOR: &str = "_lock_";

    /// Default session timeout (30 seconds).
    pub fn default_session_timeout() -> Duration {
        Duration::from_secs(30)
    }
}

/// A fixed point in time an operation must finish by.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now() + duration,
        }
    }

    /// Check if the deadline has passed.
    pub fn is_exceeded(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Time left, zero once exceeded.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

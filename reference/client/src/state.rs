//! Lock client state definitions.

use serde::{Deserialize, Serialize};

/// Where a lock client is in the acquisition protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    /// No token outstanding.
    Idle,
    /// Token created, rank not yet evaluated.
    TokenCreated,
    /// Queued behind another token.
    Waiting,
    /// Own token is the smallest; the lock is held.
    Acquired,
    /// Token deleted and session closed.
    Released,
}

impl LockState {
    /// Check if the lock is held.
    pub fn holds_lock(&self) -> bool {
        matches!(self, LockState::Acquired)
    }

    /// Check if a token is outstanding.
    pub fn has_token(&self) -> bool {
        matches!(
            self,
            LockState::TokenCreated | LockState::Waiting | LockState::Acquired
        )
    }

    /// Check if the client can no longer be used.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LockState::Released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(LockState::Acquired.holds_lock());
        assert!(!LockState::Waiting.holds_lock());
        assert!(LockState::Waiting.has_token());
        assert!(!LockState::Idle.has_token());
        assert!(LockState::Released.is_terminal());
    }
}

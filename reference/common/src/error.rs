//! Error types for the Turnstile lock protocol.

use thiserror::Error;

/// Faults reported by the coordination service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    /// The service could not be reached.
    #[error("Connection loss: {0}")]
    ConnectionLoss(String),

    /// The session was declared dead by the service.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// The session was closed by its owner.
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Node does not exist.
    #[error("No node: {0}")]
    NoNode(String),

    /// Node already exists.
    #[error("Node exists: {0}")]
    NodeExists(String),

    /// Node still has children.
    #[error("Node not empty: {0}")]
    NotEmpty(String),

    /// Conditional delete did not match the node version.
    #[error("Bad version for {path}: expected {expected}, actual {actual}")]
    BadVersion {
        path: String,
        expected: i32,
        actual: i32,
    },

    /// Ephemeral nodes cannot have children.
    #[error("Ephemeral node cannot have children: {0}")]
    NoChildrenForEphemerals(String),

    /// Malformed path.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl CoordinationError {
    /// Check if this error invalidates the session it occurred on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoordinationError::ConnectionLoss(_)
                | CoordinationError::SessionExpired(_)
                | CoordinationError::SessionClosed(_)
        )
    }

    /// Get error code for log events.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoordinationError::ConnectionLoss(_) => "CONNECTION_LOSS",
            CoordinationError::SessionExpired(_) => "SESSION_EXPIRED",
            CoordinationError::SessionClosed(_) => "SESSION_CLOSED",
            CoordinationError::NoNode(_) => "NO_NODE",
            CoordinationError::NodeExists(_) => "NODE_EXISTS",
            CoordinationError::NotEmpty(_) => "NOT_EMPTY",
            CoordinationError::BadVersion { .. } => "BAD_VERSION",
            CoordinationError::NoChildrenForEphemerals(_) => "NO_CHILDREN_FOR_EPHEMERALS",
            CoordinationError::InvalidPath(_) => "INVALID_PATH",
        }
    }
}

/// Result type alias for coordination service calls.
pub type CoordinationResult<T> = std::result::Result<T, CoordinationError>;

/// Errors surfaced by a lock client.
///
/// Contention is never an error: "not my turn yet" is reported as a `false`
/// outcome. Fatal variants poison the client that observed them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The resource name cannot be used to build tokens.
    #[error("Invalid lock name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// The coordination service is unreachable.
    #[error("Coordination service unavailable: {0}")]
    CoordinationUnavailable(String),

    /// The session backing this client is no longer valid.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// The token could not be deleted while the session was live.
    #[error("Unlock failed for {token}: {reason}")]
    Unlock { token: String, reason: String },

    /// The client's own token vanished from the competitor set.
    #[error("Token lost: {0}")]
    TokenLost(String),

    /// Any other coordination fault.
    #[error("Coordination error: {0}")]
    Coordination(CoordinationError),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LockError {
    /// Check if this error must poison the client.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LockError::CoordinationUnavailable(_)
                | LockError::SessionExpired(_)
                | LockError::TokenLost(_)
        )
    }

    /// Get error code for log events.
    pub fn error_code(&self) -> &'static str {
        match self {
            LockError::InvalidName { .. } => "INVALID_NAME",
            LockError::CoordinationUnavailable(_) => "COORDINATION_UNAVAILABLE",
            LockError::SessionExpired(_) => "SESSION_EXPIRED",
            LockError::Unlock { .. } => "UNLOCK_FAILED",
            LockError::TokenLost(_) => "TOKEN_LOST",
            LockError::Coordination(e) => e.error_code(),
            LockError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl From<CoordinationError> for LockError {
    fn from(err: CoordinationError) -> Self {
        match err {
            CoordinationError::ConnectionLoss(msg) => LockError::CoordinationUnavailable(msg),
            CoordinationError::SessionExpired(msg) | CoordinationError::SessionClosed(msg) => {
                LockError::SessionExpired(msg)
            }
            other => LockError::Coordination(other),
        }
    }
}

/// Result type alias for lock client operations.
pub type LockResult<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordination_error_mapping() {
        let err: LockError = CoordinationError::ConnectionLoss("down".into()).into();
        assert_eq!(err, LockError::CoordinationUnavailable("down".into()));
        assert!(err.is_fatal());

        let err: LockError = CoordinationError::SessionClosed("0x1".into()).into();
        assert!(matches!(err, LockError::SessionExpired(_)));
        assert!(err.is_fatal());

        let err: LockError = CoordinationError::NoNode("/locks".into()).into();
        assert!(matches!(err, LockError::Coordination(CoordinationError::NoNode(_))));
        assert!(!err.is_fatal());
        assert_eq!(err.error_code(), "NO_NODE");
    }

    #[test]
    fn test_non_fatal_errors() {
        let err = LockError::InvalidName {
            name: "a_lock_b".into(),
            reason: "separator".into(),
        };
        assert!(!err.is_fatal());

        let err = LockError::Unlock {
            token: "/locks/a_lock_0000000001".into(),
            reason: "bad version".into(),
        };
        assert!(!err.is_fatal());
    }
}

//! Identifier types for Turnstile protocol entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{CoordinationError, LockError, LockResult};
use crate::time::constants::SEQUENCE_WIDTH;

/// Name of the logical resource protected by a lock.
///
/// Every token created for the resource is named
/// `<name><separator><sequence>`, so the name may not contain the separator.
/// It also becomes a single path segment, so it may not be empty or contain `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockName(String);

impl LockName {
    /// Validate and wrap a resource name.
    pub fn new(name: impl Into<String>, separator: &str) -> LockResult<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(LockError::InvalidName {
                name,
                reason: "lock name is empty".to_string(),
            });
        }

        if separator.is_empty() || name.contains(separator) {
            return Err(LockError::InvalidName {
                reason: format!("lock name contains reserved separator '{}'", separator),
                name,
            });
        }

        if name.contains('/') {
            return Err(LockError::InvalidName {
                name,
                reason: "lock name contains '/'".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path prefix handed to a sequential create: `<root>/<name><separator>`.
    pub fn token_prefix(&self, root: &str, separator: &str) -> String {
        format!("{}/{}{}", root, self.0, separator)
    }

    /// Check whether a child node under the root is a token for this lock.
    pub fn owns(&self, node_name: &str, separator: &str) -> bool {
        node_name
            .split_once(separator)
            .map(|(prefix, _)| prefix == self.0)
            .unwrap_or(false)
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Render a sequence number as the fixed-width suffix the service assigns.
pub fn format_sequence(sequence: u64) -> String {
    format!("{:0width$}", sequence, width = SEQUENCE_WIDTH)
}

/// Parse a fixed-width sequence suffix.
pub fn parse_sequence(suffix: &str) -> Option<u64> {
    if suffix.len() != SEQUENCE_WIDTH || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// A queued lock request: the ephemeral sequential node a client created
/// under the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    /// Full path, e.g. `/locks/res_lock_0000000001`.
    pub path: String,
    /// Last path segment, e.g. `res_lock_0000000001`.
    pub node_name: String,
    /// Resource name prefix.
    pub lock_name: String,
    /// Service-assigned sequence suffix.
    pub sequence: u64,
}

impl Token {
    /// Parse the path assigned by a sequential create.
    pub fn parse(root: &str, assigned_path: &str, separator: &str) -> LockResult<Self> {
        let malformed = || LockError::Coordination(CoordinationError::InvalidPath(assigned_path.to_string()));

        let node_name = assigned_path
            .strip_prefix(root)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .ok_or_else(malformed)?;

        let (lock_name, suffix) = node_name.rsplit_once(separator).ok_or_else(malformed)?;
        let sequence = parse_sequence(suffix).ok_or_else(malformed)?;

        Ok(Self {
            path: assigned_path.to_string(),
            node_name: node_name.to_string(),
            lock_name: lock_name.to_string(),
            sequence,
        })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Identifier of a coordination session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    /// Create a session ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Identifier of a lock client instance, used to correlate log events.
/// Uses UUID v7 for time-ordered identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Create a new client ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

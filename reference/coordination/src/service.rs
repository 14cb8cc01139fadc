//! Coordination service contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use turnstile_common::{CoordinationResult, SessionId};

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent,
    /// Survives the creating session; name gets a sequence suffix.
    PersistentSequential,
    /// Removed when the creating session ends.
    Ephemeral,
    /// Removed when the creating session ends; name gets a sequence suffix.
    EphemeralSequential,
}

impl CreateMode {
    /// Check if nodes created with this mode are tied to the session.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    /// Check if the service appends a sequence suffix.
    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Node metadata returned by an existence check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Transaction id that created the node.
    pub czxid: i64,
    /// Data version.
    pub version: i32,
    /// Owning session for ephemeral nodes.
    pub ephemeral_owner: Option<SessionId>,
    /// Number of children.
    pub num_children: i32,
    /// Creation time.
    pub ctime: DateTime<Utc>,
}

/// Kind of a node event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Session state change, no node involved.
    None,
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

/// Session connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Connected and operational.
    Connected,
    /// Connection lost; the session may still be alive on the service.
    Disconnected,
    /// Session declared dead; its ephemeral nodes are gone.
    Expired,
    /// Session closed by its owner.
    Closed,
}

impl SessionState {
    /// Check if the session can never be used again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Expired | SessionState::Closed)
    }
}

/// A fired watch or a session state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedEvent {
    /// What happened.
    pub kind: EventKind,
    /// Session state at delivery time.
    pub state: SessionState,
    /// Node the event concerns; absent for session events.
    pub path: Option<String>,
}

impl WatchedEvent {
    /// Event for a node.
    pub fn node(kind: EventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            state: SessionState::Connected,
            path: Some(path.into()),
        }
    }

    /// Event for a session state change.
    pub fn session(state: SessionState) -> Self {
        Self {
            kind: EventKind::None,
            state,
            path: None,
        }
    }
}

/// The per-session dispatch entry point for every fired watch and every
/// session state change.
pub trait Watcher: Send + Sync {
    /// Handle one event. Must not block.
    fn process(&self, event: WatchedEvent);
}

/// Operations a session offers. Every call is a synchronous round trip that
/// completes or fails; none of them wait for other clients.
#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Id of the session this handle is bound to.
    fn session_id(&self) -> SessionId;

    /// Check whether a node exists. With `watch` set and the node present,
    /// a one-shot watch is registered and later delivered to the session's
    /// [`Watcher`].
    async fn exists(&self, path: &str, watch: bool) -> CoordinationResult<Option<Stat>>;

    /// Create a node and return the path actually assigned.
    async fn create(&self, path: &str, mode: CreateMode) -> CoordinationResult<String>;

    /// Snapshot of child names. Registers no watch.
    async fn get_children(&self, path: &str) -> CoordinationResult<Vec<String>>;

    /// Delete a node; `None` deletes regardless of version.
    async fn delete(&self, path: &str, version: Option<i32>) -> CoordinationResult<()>;

    /// End the session, removing its ephemeral nodes.
    async fn close(&self) -> CoordinationResult<()>;
}

/// Opens sessions against a coordination service.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a session whose events are delivered to `watcher`.
    async fn connect(
        &self,
        connect_string: &str,
        session_timeout: Duration,
        watcher: Arc<dyn Watcher>,
    ) -> CoordinationResult<Arc<dyn CoordinationService>>;
}

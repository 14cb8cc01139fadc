//! In-process coordination ensemble.
//!
//! Implements the [`CoordinationService`] contract over a node tree held in
//! memory. Used by the test suites and the simulator; it keeps the service
//! semantics the lock protocol relies on (per-parent monotonic sequence
//! suffixes, ephemeral cleanup on session end, one-shot exists watches) and
//! adds fault injection for unavailability, session expiry, process crashes
//! and external deletions.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use turnstile_common::{format_sequence, CoordinationError, CoordinationResult, SessionId};

use crate::service::{
    CoordinationService, CreateMode, EventKind, SessionFactory, SessionState, Stat, WatchedEvent,
    Watcher,
};

/// Events collected under the tree lock, delivered after it is released.
type Delivery = Vec<(Arc<dyn Watcher>, WatchedEvent)>;

struct Node {
    stat: Stat,
    children: BTreeSet<String>,
    next_sequence: u64,
}

impl Node {
    fn new(czxid: i64, ephemeral_owner: Option<SessionId>) -> Self {
        Self {
            stat: Stat {
                czxid,
                version: 0,
                ephemeral_owner,
                num_children: 0,
                ctime: Utc::now(),
            },
            children: BTreeSet::new(),
            next_sequence: 0,
        }
    }
}

struct Tree {
    nodes: HashMap<String, Node>,
    /// One-shot exists watches: path -> sessions to notify.
    watches: HashMap<String, HashSet<SessionId>>,
    zxid: i64,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), Node::new(0, None));
        Self {
            nodes,
            watches: HashMap::new(),
            zxid: 0,
        }
    }

    fn remove_node(&mut self, path: &str) {
        if self.nodes.remove(path).is_none() {
            return;
        }
        if let Some(parent) = self.nodes.get_mut(parent_of(path)) {
            parent.children.remove(name_of(path));
            parent.stat.num_children -= 1;
        }
    }
}

struct SessionRecord {
    watcher: Arc<dyn Watcher>,
    state: SessionState,
    timeout: Duration,
}

struct EnsembleInner {
    tree: Mutex<Tree>,
    sessions: DashMap<SessionId, SessionRecord>,
    next_session: AtomicU64,
    available: AtomicBool,
}

impl EnsembleInner {
    fn check_session(&self, id: SessionId) -> CoordinationResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CoordinationError::ConnectionLoss(
                "coordination service unavailable".to_string(),
            ));
        }

        match self.sessions.get(&id).map(|s| s.state) {
            Some(SessionState::Connected) => Ok(()),
            Some(SessionState::Disconnected) => Err(CoordinationError::ConnectionLoss(format!(
                "session {} disconnected",
                id
            ))),
            Some(SessionState::Closed) => Err(CoordinationError::SessionClosed(id.to_string())),
            Some(SessionState::Expired) | None => {
                Err(CoordinationError::SessionExpired(id.to_string()))
            }
        }
    }

    /// Take the watches registered on `path`. Lock order is tree, then sessions.
    fn fire(&self, tree: &mut Tree, path: &str, kind: EventKind) -> Delivery {
        let Some(watchers) = tree.watches.remove(path) else {
            return Vec::new();
        };

        watchers
            .into_iter()
            .filter_map(|sid| {
                self.sessions
                    .get(&sid)
                    .filter(|s| !s.state.is_terminal())
                    .map(|s| (s.watcher.clone(), WatchedEvent::node(kind, path)))
            })
            .collect()
    }

    fn create(
        &self,
        owner: SessionId,
        path: &str,
        mode: CreateMode,
    ) -> CoordinationResult<(String, Delivery)> {
        if !path.starts_with('/') {
            return Err(CoordinationError::InvalidPath(path.to_string()));
        }

        let mut tree = self.tree.lock();
        let parent_path = parent_of(path).to_string();

        let parent = tree
            .nodes
            .get_mut(&parent_path)
            .ok_or_else(|| CoordinationError::NoNode(parent_path.clone()))?;

        if parent.stat.ephemeral_owner.is_some() {
            return Err(CoordinationError::NoChildrenForEphemerals(parent_path));
        }

        let assigned = if mode.is_sequential() {
            parent.next_sequence += 1;
            format!("{}{}", path, format_sequence(parent.next_sequence))
        } else {
            path.to_string()
        };

        validate_path(&assigned)?;

        if tree.nodes.contains_key(&assigned) {
            return Err(CoordinationError::NodeExists(assigned));
        }

        tree.zxid += 1;
        let ephemeral_owner = mode.is_ephemeral().then_some(owner);
        let node = Node::new(tree.zxid, ephemeral_owner);
        tree.nodes.insert(assigned.clone(), node);

        if let Some(parent) = tree.nodes.get_mut(&parent_path) {
            parent.children.insert(name_of(&assigned).to_string());
            parent.stat.num_children += 1;
        }

        let delivery = self.fire(&mut tree, &assigned, EventKind::NodeCreated);
        Ok((assigned, delivery))
    }

    fn delete(&self, path: &str, version: Option<i32>) -> CoordinationResult<Delivery> {
        if path == "/" {
            return Err(CoordinationError::InvalidPath(path.to_string()));
        }

        let mut tree = self.tree.lock();
        let node = tree
            .nodes
            .get(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;

        if let Some(expected) = version {
            if expected != node.stat.version {
                return Err(CoordinationError::BadVersion {
                    path: path.to_string(),
                    expected,
                    actual: node.stat.version,
                });
            }
        }

        if !node.children.is_empty() {
            return Err(CoordinationError::NotEmpty(path.to_string()));
        }

        tree.remove_node(path);
        Ok(self.fire(&mut tree, path, EventKind::NodeDeleted))
    }

    /// Remove everything the session owns and its pending watches.
    fn release_session(&self, id: SessionId) -> Delivery {
        let mut tree = self.tree.lock();

        let mut owned: Vec<String> = tree
            .nodes
            .iter()
            .filter(|(_, node)| node.stat.ephemeral_owner == Some(id))
            .map(|(path, _)| path.clone())
            .collect();
        owned.sort();

        let mut delivery = Vec::new();
        for path in owned {
            tree.remove_node(&path);
            debug!(session_id = %id, path = %path, "Ephemeral node removed");
            delivery.extend(self.fire(&mut tree, &path, EventKind::NodeDeleted));
        }

        for sessions in tree.watches.values_mut() {
            sessions.remove(&id);
        }
        tree.watches.retain(|_, sessions| !sessions.is_empty());

        delivery
    }

    /// Move a session to a terminal state. Returns its watcher if it was live.
    fn terminate(&self, id: SessionId, state: SessionState) -> Option<Arc<dyn Watcher>> {
        let mut record = self.sessions.get_mut(&id)?;
        if record.state.is_terminal() {
            return None;
        }
        record.state = state;
        Some(record.watcher.clone())
    }

    fn end_session(&self, id: SessionId, state: SessionState) {
        let Some(watcher) = self.terminate(id, state) else {
            return;
        };

        deliver(self.release_session(id));
        watcher.process(WatchedEvent::session(state));

        info!(session_id = %id, state = ?state, "Session ended");
    }
}

fn deliver(delivery: Delivery) {
    for (watcher, event) in delivery {
        watcher.process(event);
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn validate_path(path: &str) -> CoordinationResult<()> {
    let valid = path.starts_with('/')
        && (path == "/" || !path.ends_with('/'))
        && !path.contains("//");

    if valid {
        Ok(())
    } else {
        Err(CoordinationError::InvalidPath(path.to_string()))
    }
}

/// An in-process coordination service shared by many sessions.
#[derive(Clone)]
pub struct MemoryEnsemble {
    inner: Arc<EnsembleInner>,
}

impl MemoryEnsemble {
    /// Create an ensemble holding only the root node.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EnsembleInner {
                tree: Mutex::new(Tree::new()),
                sessions: DashMap::new(),
                next_session: AtomicU64::new(1),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Open a session directly.
    pub fn open_session(
        &self,
        session_timeout: Duration,
        watcher: Arc<dyn Watcher>,
    ) -> CoordinationResult<MemorySession> {
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(CoordinationError::ConnectionLoss(
                "coordination service unavailable".to_string(),
            ));
        }

        let id = SessionId::new(self.inner.next_session.fetch_add(1, Ordering::SeqCst));
        self.inner.sessions.insert(
            id,
            SessionRecord {
                watcher: watcher.clone(),
                state: SessionState::Connected,
                timeout: session_timeout,
            },
        );

        watcher.process(WatchedEvent::session(SessionState::Connected));
        debug!(session_id = %id, timeout_ms = session_timeout.as_millis() as u64, "Session opened");

        Ok(MemorySession {
            inner: self.inner.clone(),
            id,
        })
    }

    /// Make the service reachable or unreachable for every session.
    pub fn set_available(&self, available: bool) {
        let previous = self.inner.available.swap(available, Ordering::SeqCst);
        if previous == available {
            return;
        }

        let state = if available {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        };

        let watchers: Vec<Arc<dyn Watcher>> = self
            .inner
            .sessions
            .iter()
            .filter(|s| s.state == SessionState::Connected)
            .map(|s| s.watcher.clone())
            .collect();

        for watcher in watchers {
            watcher.process(WatchedEvent::session(state));
        }

        warn!(available, "Coordination availability changed");
    }

    /// Declare a session dead now: its ephemeral nodes are deleted and its
    /// watcher receives `Expired`.
    pub fn expire_session(&self, id: SessionId) {
        self.inner.end_session(id, SessionState::Expired);
    }

    /// Model a crashed client: the session stops responding and is expired
    /// once its session timeout elapses. Requires a running tokio runtime.
    pub fn crash_session(&self, id: SessionId) {
        let timeout = {
            let Some(mut record) = self.inner.sessions.get_mut(&id) else {
                return;
            };
            if record.state.is_terminal() {
                return;
            }
            record.state = SessionState::Disconnected;
            record.timeout
        };

        warn!(session_id = %id, timeout_ms = timeout.as_millis() as u64, "Session crashed");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            inner.end_session(id, SessionState::Expired);
        });
    }

    /// Delete a node on behalf of an outside actor.
    pub fn delete_node(&self, path: &str) -> CoordinationResult<()> {
        let delivery = self.inner.delete(path, None)?;
        deliver(delivery);
        info!(path = %path, "Node deleted externally");
        Ok(())
    }

    /// Sorted child names of `path`, empty if it does not exist.
    pub fn children(&self, path: &str) -> Vec<String> {
        self.inner
            .tree
            .lock()
            .nodes
            .get(path)
            .map(|n| n.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check whether a node exists.
    pub fn contains(&self, path: &str) -> bool {
        self.inner.tree.lock().nodes.contains_key(path)
    }

    /// Current state of a session.
    pub fn session_state(&self, id: SessionId) -> Option<SessionState> {
        self.inner.sessions.get(&id).map(|s| s.state)
    }

    /// Number of sessions not yet closed or expired.
    pub fn live_sessions(&self) -> usize {
        self.inner
            .sessions
            .iter()
            .filter(|s| !s.state.is_terminal())
            .count()
    }
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionFactory for MemoryEnsemble {
    async fn connect(
        &self,
        connect_string: &str,
        session_timeout: Duration,
        watcher: Arc<dyn Watcher>,
    ) -> CoordinationResult<Arc<dyn CoordinationService>> {
        debug!(connect_string = %connect_string, "Connecting to in-memory ensemble");
        let session = self.open_session(session_timeout, watcher)?;
        Ok(Arc::new(session))
    }
}

/// One session on a [`MemoryEnsemble`].
pub struct MemorySession {
    inner: Arc<EnsembleInner>,
    id: SessionId,
}

#[async_trait]
impl CoordinationService for MemorySession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    async fn exists(&self, path: &str, watch: bool) -> CoordinationResult<Option<Stat>> {
        self.inner.check_session(self.id)?;

        let mut tree = self.inner.tree.lock();
        let stat = tree.nodes.get(path).map(|n| n.stat.clone());

        if watch && stat.is_some() {
            tree.watches
                .entry(path.to_string())
                .or_default()
                .insert(self.id);
        }

        Ok(stat)
    }

    async fn create(&self, path: &str, mode: CreateMode) -> CoordinationResult<String> {
        self.inner.check_session(self.id)?;

        let (assigned, delivery) = self.inner.create(self.id, path, mode)?;
        deliver(delivery);
        Ok(assigned)
    }

    async fn get_children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        self.inner.check_session(self.id)?;

        self.inner
            .tree
            .lock()
            .nodes
            .get(path)
            .map(|n| n.children.iter().cloned().collect())
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    async fn delete(&self, path: &str, version: Option<i32>) -> CoordinationResult<()> {
        self.inner.check_session(self.id)?;

        let delivery = self.inner.delete(path, version)?;
        deliver(delivery);
        Ok(())
    }

    async fn close(&self) -> CoordinationResult<()> {
        self.inner.end_session(self.id, SessionState::Closed);
        Ok(())
    }
}

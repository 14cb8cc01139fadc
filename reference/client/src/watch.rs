//! Watch dispatch.
//!
//! The coordination service pushes every fired watch and every session state
//! change into one [`Watcher`] per session. [`WatchDispatcher`] is that
//! watcher: it turns the pushed events into one-shot [`WatchGate`]s a waiter
//! blocks on with a deadline. Each gate resolves at most once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use turnstile_coordination::{SessionState, WatchedEvent, Watcher};

/// Result of waiting on a predecessor token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The target no longer existed when the watch was set.
    Satisfied,
    /// The watch fired: the target changed, or the session state did.
    Fired(WatchedEvent),
    /// The duration elapsed first.
    TimedOut,
}

impl WaitOutcome {
    /// Check if the wait ended because of a change rather than the clock.
    pub fn is_wakeup(&self) -> bool {
        !matches!(self, WaitOutcome::TimedOut)
    }
}

struct PendingGate {
    id: u64,
    tx: oneshot::Sender<WatchedEvent>,
}

/// Per-session event sink that resolves armed gates.
pub struct WatchDispatcher {
    pending: Mutex<HashMap<String, Vec<PendingGate>>>,
    next_gate: AtomicU64,
    session_state: Mutex<SessionState>,
}

impl WatchDispatcher {
    /// Create a dispatcher for a fresh session.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            next_gate: AtomicU64::new(0),
            session_state: Mutex::new(SessionState::Connected),
        })
    }

    /// Register a gate for the next event on `path`. Arm before setting the
    /// service watch so an event racing the registration is not lost.
    pub fn arm(self: &Arc<Self>, path: &str) -> WatchGate {
        let (tx, rx) = oneshot::channel();
        let id = self.next_gate.fetch_add(1, Ordering::Relaxed);

        self.pending
            .lock()
            .entry(path.to_string())
            .or_default()
            .push(PendingGate { id, tx });

        WatchGate {
            path: path.to_string(),
            id,
            rx,
            dispatcher: Arc::downgrade(self),
        }
    }

    /// Last session state reported by the service.
    pub fn session_state(&self) -> SessionState {
        *self.session_state.lock()
    }

    /// Number of gates still waiting.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().values().map(Vec::len).sum()
    }

    fn disarm(&self, path: &str, id: u64) {
        let mut pending = self.pending.lock();
        if let Some(gates) = pending.get_mut(path) {
            gates.retain(|g| g.id != id);
            if gates.is_empty() {
                pending.remove(path);
            }
        }
    }
}

impl Watcher for WatchDispatcher {
    fn process(&self, event: WatchedEvent) {
        let gates: Vec<PendingGate> = match &event.path {
            Some(path) => self.pending.lock().remove(path).unwrap_or_default(),
            None => {
                *self.session_state.lock() = event.state;
                if event.state == SessionState::Connected {
                    return;
                }
                self.pending
                    .lock()
                    .drain()
                    .flat_map(|(_, gates)| gates)
                    .collect()
            }
        };

        trace!(
            path = ?event.path,
            kind = ?event.kind,
            state = ?event.state,
            gates = gates.len(),
            "Dispatching watch event"
        );

        for gate in gates {
            // Receiver already gone means the waiter gave up.
            let _ = gate.tx.send(event.clone());
        }
    }
}

/// One armed wait. Dropping it disarms it.
pub struct WatchGate {
    path: String,
    id: u64,
    rx: oneshot::Receiver<WatchedEvent>,
    dispatcher: Weak<WatchDispatcher>,
}

impl WatchGate {
    /// Path the gate listens on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Suspend until the gate fires or `duration` elapses.
    pub async fn wait(mut self, duration: Duration) -> WaitOutcome {
        match tokio::time::timeout(duration, &mut self.rx).await {
            Ok(Ok(event)) => WaitOutcome::Fired(event),
            Ok(Err(_)) | Err(_) => WaitOutcome::TimedOut,
        }
    }
}

impl Drop for WatchGate {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.disarm(&self.path, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_coordination::EventKind;

    #[tokio::test]
    async fn test_gate_fires_on_node_event() {
        let dispatcher = WatchDispatcher::new();
        let gate = dispatcher.arm("/locks/a");

        dispatcher.process(WatchedEvent::node(EventKind::NodeDeleted, "/locks/a"));

        match gate.wait(Duration::from_secs(1)).await {
            WaitOutcome::Fired(event) => assert_eq!(event.kind, EventKind::NodeDeleted),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_event_for_other_path_is_ignored() {
        let dispatcher = WatchDispatcher::new();
        let gate = dispatcher.arm("/locks/a");

        dispatcher.process(WatchedEvent::node(EventKind::NodeDeleted, "/locks/b"));

        assert_eq!(gate.wait(Duration::from_millis(20)).await, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_gate_resolves_only_once() {
        let dispatcher = WatchDispatcher::new();
        let first = dispatcher.arm("/locks/a");

        dispatcher.process(WatchedEvent::node(EventKind::NodeDeleted, "/locks/a"));
        let second = dispatcher.arm("/locks/a");
        dispatcher.process(WatchedEvent::node(EventKind::NodeDeleted, "/locks/a"));

        assert!(first.wait(Duration::from_secs(1)).await.is_wakeup());
        assert!(second.wait(Duration::from_secs(1)).await.is_wakeup());
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_session_event_releases_all_gates() {
        let dispatcher = WatchDispatcher::new();
        let a = dispatcher.arm("/locks/a");
        let b = dispatcher.arm("/locks/b");

        dispatcher.process(WatchedEvent::session(SessionState::Expired));

        assert!(a.wait(Duration::from_secs(1)).await.is_wakeup());
        assert!(b.wait(Duration::from_secs(1)).await.is_wakeup());
        assert_eq!(dispatcher.session_state(), SessionState::Expired);
    }

    #[tokio::test]
    async fn test_connected_event_keeps_gates_armed() {
        let dispatcher = WatchDispatcher::new();
        let _gate = dispatcher.arm("/locks/a");

        dispatcher.process(WatchedEvent::session(SessionState::Connected));

        assert_eq!(dispatcher.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_gate_is_disarmed() {
        let dispatcher = WatchDispatcher::new();
        let gate = dispatcher.arm("/locks/a");
        assert_eq!(dispatcher.pending_count(), 1);

        assert_eq!(gate.wait(Duration::from_millis(10)).await, WaitOutcome::TimedOut);
        assert_eq!(dispatcher.pending_count(), 0);

        // A late event for the stale watch is harmless.
        dispatcher.process(WatchedEvent::node(EventKind::NodeDeleted, "/locks/a"));
    }
}

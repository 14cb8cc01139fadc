//! Lock client: the acquisition and release protocol.
//!
//! Each attempt creates one ephemeral sequential token under the root. The
//! client lists the competitor set, and if its token is not the smallest it
//! watches the token immediately ahead of it. When that watch fires the rank
//! is evaluated again from a fresh listing, so a predecessor that vanished out
//! of order only moves the wait to the next token ahead.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use turnstile_common::{
    ClientId, CoordinationError, Deadline, LockError, LockName, LockResult, SessionId, Token,
};
use turnstile_coordination::{CoordinationService, CreateMode, SessionFactory, SessionState};

use crate::competitors::{CompetitorSet, Rank};
use crate::config::LockConfig;
use crate::metrics::LockMetrics;
use crate::state::LockState;
use crate::watch::{WaitOutcome, WatchDispatcher};

/// A distributed lock on one named resource.
///
/// One client serves one logical lock attempt and owns one session; `unlock`
/// closes that session. The client is not meant to be shared between tasks:
/// every operation takes `&mut self`.
pub struct LockClient {
    /// Instance ID for log correlation.
    client_id: ClientId,
    /// Configuration.
    config: LockConfig,
    /// Resource name as given by the caller; validated on each attempt.
    resource: String,
    /// Session on the coordination service.
    session: Arc<dyn CoordinationService>,
    /// Watcher registered for `session`.
    dispatcher: Arc<WatchDispatcher>,
    /// Protocol state.
    state: LockState,
    /// Token of the current attempt.
    current: Option<Token>,
    /// Node name of the token immediately ahead, as of the last rank check.
    wait_target: Option<String>,
    /// First fatal error observed. Set once, never cleared.
    poisoned: Option<LockError>,
    /// Metrics sink.
    metrics: Arc<LockMetrics>,
}

impl LockClient {
    /// Open a session and make sure the root node exists.
    #[instrument(skip_all, fields(resource = %resource.as_ref()))]
    pub async fn connect(
        factory: &dyn SessionFactory,
        resource: impl AsRef<str>,
        config: LockConfig,
    ) -> LockResult<Self> {
        config.validate().map_err(LockError::Configuration)?;

        let dispatcher = WatchDispatcher::new();
        let session = factory
            .connect(&config.connect_string, config.session_timeout, dispatcher.clone())
            .await?;

        let client = Self::with_session(session, dispatcher, resource.as_ref(), config);
        client.ensure_root().await?;

        info!(
            client_id = %client.client_id,
            session_id = %client.session.session_id(),
            root = %client.config.root_path,
            "Lock client connected"
        );

        Ok(client)
    }

    /// Build a client over an existing session. `dispatcher` must be the
    /// watcher that session delivers its events to.
    pub fn with_session(
        session: Arc<dyn CoordinationService>,
        dispatcher: Arc<WatchDispatcher>,
        resource: impl Into<String>,
        config: LockConfig,
    ) -> Self {
        Self {
            client_id: ClientId::new(),
            config,
            resource: resource.into(),
            session,
            dispatcher,
            state: LockState::Idle,
            current: None,
            wait_target: None,
            poisoned: None,
            metrics: Arc::new(LockMetrics::new()),
        }
    }

    /// Report into a shared metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<LockMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Make one attempt without waiting.
    ///
    /// Creates a token and returns `true` if it is the smallest. Otherwise the
    /// token stays queued, the predecessor is recorded as the wait target and
    /// `false` is returned. Every call creates a new token.
    #[instrument(skip(self), fields(client_id = %self.client_id, lock = %self.resource))]
    pub async fn try_lock(&mut self) -> LockResult<bool> {
        self.ensure_usable()?;

        let name = LockName::new(self.resource.as_str(), &self.config.separator)?;

        if let Some(existing) = &self.current {
            warn!(token = %existing, "Token already outstanding, creating another");
        }

        let prefix = name.token_prefix(&self.config.root_path, &self.config.separator);
        let assigned = self
            .session
            .create(&prefix, CreateMode::EphemeralSequential)
            .await
            .map_err(|e| self.fail(e.into()))?;

        let token = Token::parse(&self.config.root_path, &assigned, &self.config.separator)?;
        info!(token = %token, sequence = token.sequence, "Token created");

        self.metrics.token_created();
        self.current = Some(token);
        self.state = LockState::TokenCreated;
        self.wait_target = None;

        if self.evaluate_rank(&name).await? {
            self.metrics.acquired_immediately();
            return Ok(true);
        }

        Ok(false)
    }

    /// Block until the lock is held.
    #[instrument(skip(self), fields(client_id = %self.client_id, lock = %self.resource))]
    pub async fn lock(&mut self) -> LockResult<()> {
        self.ensure_usable()?;

        if self.try_lock().await? {
            return Ok(());
        }

        let cycle = self.config.wait_cycle;
        loop {
            let target = self.expect_wait_target()?;
            let outcome = self.wait_for_lock(&target, cycle).await?;

            if self.recheck(&outcome).await? {
                self.metrics.acquired_after_wait();
                return Ok(());
            }
        }
    }

    /// Same as [`lock`](Self::lock). Cancellation is by dropping the future.
    pub async fn lock_interruptibly(&mut self) -> LockResult<()> {
        self.lock().await
    }

    /// Block until the lock is held or `timeout` elapses.
    ///
    /// Returns `false` on timeout. With `withdraw_on_timeout` the token is
    /// deleted so it does not hold up later waiters.
    #[instrument(skip(self), fields(client_id = %self.client_id, lock = %self.resource))]
    pub async fn try_lock_for(&mut self, timeout: Duration) -> LockResult<bool> {
        self.ensure_usable()?;

        let deadline = Deadline::after(timeout);

        if self.try_lock().await? {
            return Ok(true);
        }

        loop {
            if deadline.is_exceeded() {
                self.give_up().await?;
                return Ok(false);
            }

            let target = self.expect_wait_target()?;
            let outcome = self.wait_for_lock(&target, deadline.remaining()).await?;

            if self.recheck(&outcome).await? {
                self.metrics.acquired_after_wait();
                return Ok(true);
            }
        }
    }

    /// Wait for `target` (a token node name under the root) to go away.
    ///
    /// Returns at once with [`WaitOutcome::Satisfied`] if it is already gone.
    /// Otherwise suspends until its watch fires or `duration` elapses. The
    /// rank is not re-evaluated here.
    #[instrument(skip(self), fields(client_id = %self.client_id))]
    pub async fn wait_for_lock(&mut self, target: &str, duration: Duration) -> LockResult<WaitOutcome> {
        let path = format!("{}/{}", self.config.root_path, target);

        let gate = self.dispatcher.arm(&path);
        let stat = self
            .session
            .exists(&path, true)
            .await
            .map_err(|e| self.fail(e.into()))?;

        if stat.is_none() {
            debug!(target = %path, "Predecessor already gone");
            return Ok(WaitOutcome::Satisfied);
        }

        info!(target = %path, timeout_ms = duration.as_millis() as u64, "Waiting for predecessor");
        self.metrics.wait_cycle();

        let outcome = gate.wait(duration).await;

        match &outcome {
            WaitOutcome::Fired(event) if event.path.is_none() => {
                warn!(state = ?event.state, "Woken by session event");
                self.ensure_usable()?;
            }
            WaitOutcome::Fired(event) => {
                debug!(target = %path, kind = ?event.kind, "Predecessor watch fired");
            }
            WaitOutcome::TimedOut => {
                debug!(target = %path, "Wait timed out");
            }
            WaitOutcome::Satisfied => {}
        }

        Ok(outcome)
    }

    /// Delete the token and close the session.
    ///
    /// A token already removed by someone else, or by session expiry, counts
    /// as released. The session is closed even when deletion fails.
    #[instrument(skip(self), fields(client_id = %self.client_id, lock = %self.resource))]
    pub async fn unlock(&mut self) -> LockResult<()> {
        let result = match self.current.take() {
            Some(token) => match self.session.delete(&token.path, None).await {
                Ok(()) => {
                    info!(token = %token, "Lock released");
                    Ok(())
                }
                Err(CoordinationError::NoNode(_))
                | Err(CoordinationError::SessionExpired(_))
                | Err(CoordinationError::SessionClosed(_)) => {
                    info!(token = %token, "Token already gone, treating as released");
                    Ok(())
                }
                Err(e) => {
                    error!(token = %token, error = %e, "Failed to delete token");
                    Err(LockError::Unlock {
                        token: token.path,
                        reason: e.to_string(),
                    })
                }
            },
            None => {
                debug!("No token to release");
                Ok(())
            }
        };

        if let Err(e) = self.session.close().await {
            warn!(error = %e, "Failed to close session");
        }

        match &result {
            Ok(()) => self.metrics.released(),
            Err(_) => self.metrics.release_failed(),
        }

        self.wait_target = None;
        self.state = LockState::Released;

        result
    }

    /// Current protocol state.
    pub fn state(&self) -> LockState {
        self.state
    }

    /// Check if the lock is held.
    pub fn is_held(&self) -> bool {
        self.state.holds_lock()
    }

    /// Token of the current attempt.
    pub fn current_token(&self) -> Option<&Token> {
        self.current.as_ref()
    }

    /// Node name of the token this client waits on.
    pub fn wait_target(&self) -> Option<&str> {
        self.wait_target.as_deref()
    }

    /// Check if a fatal error has been recorded.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// The recorded fatal error.
    pub fn poison(&self) -> Option<&LockError> {
        self.poisoned.as_ref()
    }

    /// Instance ID.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Session ID on the coordination service.
    pub fn session_id(&self) -> SessionId {
        self.session.session_id()
    }

    /// Resource name.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Metrics sink.
    pub fn metrics(&self) -> &Arc<LockMetrics> {
        &self.metrics
    }

    // --- Private methods ---

    /// Create the root path and any missing ancestors as persistent nodes.
    async fn ensure_root(&self) -> LockResult<()> {
        if self.session.exists(&self.config.root_path, false).await?.is_some() {
            return Ok(());
        }

        let mut path = String::new();
        for segment in self.config.root_path.split('/').filter(|s| !s.is_empty()) {
            path.push('/');
            path.push_str(segment);

            match self.session.create(&path, CreateMode::Persistent).await {
                Ok(_) => info!(path = %path, "Created root node"),
                Err(CoordinationError::NodeExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    /// Fail fast on a recorded fatal error or a dead session.
    fn ensure_usable(&mut self) -> LockResult<()> {
        if let Some(err) = &self.poisoned {
            return Err(err.clone());
        }

        if self.state.is_terminal() {
            return Err(self.fail(LockError::SessionExpired(
                "session closed by unlock".to_string(),
            )));
        }

        match self.dispatcher.session_state() {
            SessionState::Expired => Err(self.fail(LockError::SessionExpired(
                self.session.session_id().to_string(),
            ))),
            SessionState::Closed => Err(self.fail(LockError::SessionExpired(format!(
                "session {} closed",
                self.session.session_id()
            )))),
            SessionState::Connected | SessionState::Disconnected => Ok(()),
        }
    }

    /// Record `err` as poison if it is fatal and hand it back.
    fn fail(&mut self, err: LockError) -> LockError {
        if err.is_fatal() && self.poisoned.is_none() {
            error!(
                client_id = %self.client_id,
                code = err.error_code(),
                error = %err,
                "Fatal lock error, client poisoned"
            );
            self.metrics.fatal_error();
            self.poisoned = Some(err.clone());
        }
        err
    }

    /// List competitors and place the current token. Returns `true` when it
    /// is first; otherwise records the predecessor as the wait target.
    async fn evaluate_rank(&mut self, name: &LockName) -> LockResult<bool> {
        let Some(token) = self.current.clone() else {
            return Err(LockError::TokenLost("no token outstanding".to_string()));
        };

        let children = self
            .session
            .get_children(&self.config.root_path)
            .await
            .map_err(|e| self.fail(e.into()))?;

        let competitors = CompetitorSet::from_children(children, name, &self.config.separator);

        match competitors.rank_of(&token.node_name) {
            Some(Rank::First) => {
                self.state = LockState::Acquired;
                self.wait_target = None;
                info!(token = %token, contenders = competitors.len(), "Lock acquired");
                Ok(true)
            }
            Some(Rank::Behind {
                predecessor,
                position,
            }) => {
                debug!(
                    token = %token,
                    predecessor = %predecessor,
                    position,
                    "Queued behind predecessor"
                );
                self.state = LockState::Waiting;
                self.wait_target = Some(predecessor);
                Ok(false)
            }
            None => {
                self.current = None;
                self.state = LockState::Idle;
                Err(self.fail(LockError::TokenLost(token.path)))
            }
        }
    }

    /// Re-derive the rank after a wait.
    async fn recheck(&mut self, outcome: &WaitOutcome) -> LockResult<bool> {
        let name = LockName::new(self.resource.as_str(), &self.config.separator)?;
        let previous = self.wait_target.clone();

        let acquired = self.evaluate_rank(&name).await?;

        if !acquired && outcome.is_wakeup() {
            self.metrics.spurious_wakeup();
            debug!(
                previous = ?previous,
                next = ?self.wait_target,
                "Woken but still queued, waiting on new predecessor"
            );
        }

        Ok(acquired)
    }

    fn expect_wait_target(&self) -> LockResult<String> {
        self.wait_target.clone().ok_or_else(|| {
            LockError::TokenLost(format!("no wait target recorded in state {:?}", self.state))
        })
    }

    /// Abandon a bounded attempt.
    async fn give_up(&mut self) -> LockResult<()> {
        self.metrics.timeout();
        self.wait_target = None;

        if !self.config.withdraw_on_timeout {
            info!(token = ?self.current.as_ref().map(|t| t.path.as_str()), "Lock wait timed out");
            return Ok(());
        }

        if let Some(token) = self.current.take() {
            match self.session.delete(&token.path, None).await {
                Ok(()) | Err(CoordinationError::NoNode(_)) => {}
                Err(e) => return Err(self.fail(e.into())),
            }
            info!(token = %token, "Lock wait timed out, token withdrawn");
        }

        self.state = LockState::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_coordination::MemoryEnsemble;

    fn config() -> LockConfig {
        LockConfig::default().with_session_timeout(Duration::from_millis(500))
    }

    async fn client(ensemble: &MemoryEnsemble, resource: &str) -> LockClient {
        LockClient::connect(ensemble, resource, config()).await.unwrap()
    }

    #[tokio::test]
    async fn test_connect_creates_root() {
        let ensemble = MemoryEnsemble::new();
        let cfg = config().with_root_path("/app/locks");

        let client = LockClient::connect(&ensemble, "res", cfg).await.unwrap();

        assert!(ensemble.contains("/app/locks"));
        assert_eq!(client.state(), LockState::Idle);
        assert!(!client.is_poisoned());
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let ensemble = MemoryEnsemble::new();
        let cfg = config().with_root_path("locks");

        let err = LockClient::connect(&ensemble, "res", cfg).await.err().unwrap();
        assert!(matches!(err, LockError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_first_try_lock_acquires() {
        let ensemble = MemoryEnsemble::new();
        let mut a = client(&ensemble, "res").await;

        assert!(a.try_lock().await.unwrap());
        assert_eq!(a.state(), LockState::Acquired);
        assert_eq!(a.current_token().unwrap().sequence, 1);
        assert_eq!(a.wait_target(), None);
    }

    #[tokio::test]
    async fn test_second_try_lock_records_predecessor() {
        let ensemble = MemoryEnsemble::new();
        let mut a = client(&ensemble, "res").await;
        let mut b = client(&ensemble, "res").await;

        assert!(a.try_lock().await.unwrap());
        assert!(!b.try_lock().await.unwrap());

        assert_eq!(b.state(), LockState::Waiting);
        assert_eq!(b.wait_target(), Some("res_lock_0000000001"));
        assert_eq!(b.current_token().unwrap().node_name, "res_lock_0000000002");
    }

    #[tokio::test]
    async fn test_different_resources_do_not_contend() {
        let ensemble = MemoryEnsemble::new();
        let mut a = client(&ensemble, "orders").await;
        let mut b = client(&ensemble, "invoices").await;

        assert!(a.try_lock().await.unwrap());
        assert!(b.try_lock().await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_name_creates_no_token() {
        let ensemble = MemoryEnsemble::new();
        let mut c = client(&ensemble, "bad_lock_name").await;

        let err = c.try_lock().await.unwrap_err();
        assert!(matches!(err, LockError::InvalidName { .. }));
        assert!(ensemble.children("/locks").is_empty());
        assert!(!c.is_poisoned());

        let err = c.lock().await.unwrap_err();
        assert!(matches!(err, LockError::InvalidName { .. }));
        assert!(ensemble.children("/locks").is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_missing_target_is_satisfied() {
        let ensemble = MemoryEnsemble::new();
        let mut c = client(&ensemble, "res").await;

        let outcome = c
            .wait_for_lock("res_lock_0000000099", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Satisfied);
    }

    #[tokio::test]
    async fn test_unlock_deletes_token_and_closes_session() {
        let ensemble = MemoryEnsemble::new();
        let mut a = client(&ensemble, "res").await;

        a.lock().await.unwrap();
        let token = a.current_token().unwrap().path.clone();

        a.unlock().await.unwrap();

        assert!(!ensemble.contains(&token));
        assert_eq!(a.state(), LockState::Released);
        assert_eq!(
            ensemble.session_state(a.session_id()),
            Some(SessionState::Closed)
        );
        assert_eq!(a.metrics().snapshot().released, 1);
    }

    #[tokio::test]
    async fn test_unlock_after_external_delete_is_success() {
        let ensemble = MemoryEnsemble::new();
        let mut a = client(&ensemble, "res").await;

        a.lock().await.unwrap();
        let token = a.current_token().unwrap().path.clone();
        ensemble.delete_node(&token).unwrap();

        assert!(a.unlock().await.is_ok());
    }

    #[tokio::test]
    async fn test_unlock_after_session_expiry_is_success() {
        let ensemble = MemoryEnsemble::new();
        let mut a = client(&ensemble, "res").await;

        a.lock().await.unwrap();
        ensemble.expire_session(a.session_id());

        assert!(a.unlock().await.is_ok());
    }

    #[tokio::test]
    async fn test_unlock_failure_still_closes_session() {
        let ensemble = MemoryEnsemble::new();
        let mut a = client(&ensemble, "res").await;

        a.lock().await.unwrap();
        ensemble.set_available(false);

        let err = a.unlock().await.unwrap_err();
        assert!(matches!(err, LockError::Unlock { .. }));
        assert_eq!(
            ensemble.session_state(a.session_id()),
            Some(SessionState::Closed)
        );
        assert_eq!(a.metrics().snapshot().release_failures, 1);
    }

    #[tokio::test]
    async fn test_client_is_unusable_after_unlock() {
        let ensemble = MemoryEnsemble::new();
        let mut a = client(&ensemble, "res").await;

        a.lock().await.unwrap();
        a.unlock().await.unwrap();

        let err = a.try_lock().await.unwrap_err();
        assert!(matches!(err, LockError::SessionExpired(_)));
        assert!(a.is_poisoned());
    }

    #[tokio::test]
    async fn test_unavailable_service_poisons_client() {
        let ensemble = MemoryEnsemble::new();
        let mut a = client(&ensemble, "res").await;

        ensemble.set_available(false);
        let err = a.try_lock().await.unwrap_err();
        assert!(matches!(err, LockError::CoordinationUnavailable(_)));
        assert!(a.is_poisoned());

        ensemble.set_available(true);
        let again = a.lock().await.unwrap_err();
        assert_eq!(again, err);
        assert!(ensemble.children("/locks").is_empty());
        assert_eq!(a.metrics().snapshot().fatal_errors, 1);
    }

    #[tokio::test]
    async fn test_expired_session_fails_fast() {
        let ensemble = MemoryEnsemble::new();
        let mut a = client(&ensemble, "res").await;

        ensemble.expire_session(a.session_id());

        let err = a.lock().await.unwrap_err();
        assert!(matches!(err, LockError::SessionExpired(_)));
        assert!(a.is_poisoned());
    }

    #[tokio::test]
    async fn test_second_try_lock_creates_additional_token() {
        let ensemble = MemoryEnsemble::new();
        let mut a = client(&ensemble, "res").await;

        assert!(a.try_lock().await.unwrap());
        assert!(!a.try_lock().await.unwrap());

        assert_eq!(ensemble.children("/locks").len(), 2);
        assert_eq!(a.wait_target(), Some("res_lock_0000000001"));
    }
}

//! Simulated lock contenders.

use std::sync::Arc;
use std::time::Duration;

use turnstile_client::{LockClient, LockConfig, LockMetrics};
use turnstile_common::{LockResult, SessionId};
use turnstile_coordination::MemoryEnsemble;

/// One simulated process competing for the lock.
pub struct Contender {
    /// Position in creation order, from zero.
    pub index: usize,
    client: LockClient,
}

impl Contender {
    /// Block until the lock is held.
    pub async fn acquire(&mut self) -> LockResult<()> {
        self.client.lock().await
    }

    /// Try for at most `timeout`.
    pub async fn acquire_within(&mut self, timeout: Duration) -> LockResult<bool> {
        self.client.try_lock_for(timeout).await
    }

    /// Release and close the session.
    pub async fn release(&mut self) -> LockResult<()> {
        self.client.unlock().await
    }

    /// Sequence number of the current token.
    pub fn sequence(&self) -> Option<u64> {
        self.client.current_token().map(|t| t.sequence)
    }

    /// Session ID, for fault injection.
    pub fn session_id(&self) -> SessionId {
        self.client.session_id()
    }
}

/// Creates contenders on a shared ensemble.
pub struct ContenderFactory;

impl ContenderFactory {
    /// Connect `count` clients for `resource`, all reporting into `metrics`.
    pub async fn create_contenders(
        ensemble: &MemoryEnsemble,
        count: usize,
        resource: &str,
        config: &LockConfig,
        metrics: &Arc<LockMetrics>,
    ) -> LockResult<Vec<Contender>> {
        let mut contenders = Vec::with_capacity(count);

        for index in 0..count {
            let client = LockClient::connect(ensemble, resource, config.clone())
                .await?
                .with_metrics(metrics.clone());
            contenders.push(Contender { index, client });
        }

        Ok(contenders)
    }
}

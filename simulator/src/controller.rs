//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use turnstile_client::{LockConfig, LockMetrics};
use turnstile_coordination::MemoryEnsemble;

use crate::contender::{Contender, ContenderFactory};
use crate::metrics::{Occupancy, SimulationMetrics, SimulationReport};
use crate::scenario::{Scenario, ScenarioKind};

/// Resource every contender competes for.
const RESOURCE: &str = "simulated-resource";

/// How long to wait for a spawned contender to queue its token.
const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
enum Acquire {
    Blocking,
    Bounded(Duration),
}

/// Controls the simulation.
pub struct SimulationController {
    /// Shared coordination ensemble.
    ensemble: MemoryEnsemble,
    /// Number of contenders.
    client_count: usize,
    /// Client configuration.
    config: LockConfig,
    /// Base hold time.
    hold: Duration,
    /// Bound for bounded waits.
    timeout: Duration,
    /// Random number generator.
    rng: Arc<RwLock<StdRng>>,
    /// Metrics shared by every client.
    lock_metrics: Arc<LockMetrics>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
    /// Holder tracking.
    occupancy: Arc<Occupancy>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(
        client_count: usize,
        config: LockConfig,
        hold: Duration,
        timeout: Duration,
        seed: Option<u64>,
    ) -> anyhow::Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid lock configuration: {}", e))?;

        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            ensemble: MemoryEnsemble::new(),
            client_count,
            config,
            hold,
            timeout,
            rng: Arc::new(RwLock::new(rng)),
            lock_metrics: Arc::new(LockMetrics::new()),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
            occupancy: Arc::new(Occupancy::default()),
        })
    }

    /// Run a scenario and check its invariants.
    pub async fn run_scenario(&self, scenario: &Scenario) -> anyhow::Result<SimulationReport> {
        if self.client_count < scenario.min_clients {
            anyhow::bail!(
                "Scenario {} needs at least {} clients, got {}",
                scenario.name,
                scenario.min_clients,
                self.client_count
            );
        }

        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        let started_at = Utc::now();
        let start = Instant::now();

        let contenders = ContenderFactory::create_contenders(
            &self.ensemble,
            self.client_count,
            RESOURCE,
            &self.config,
            &self.lock_metrics,
        )
        .await?;

        let violations = match scenario.kind {
            ScenarioKind::Fifo => self.run_fifo(contenders).await?,
            ScenarioKind::Crash => self.run_crash(contenders).await?,
            ScenarioKind::Timeout => self.run_timeout(contenders).await?,
            ScenarioKind::ExternalDelete => self.run_external_delete(contenders).await?,
        };

        Ok(self
            .report(scenario, started_at, start.elapsed(), violations)
            .await)
    }

    async fn run_fifo(&self, contenders: Vec<Contender>) -> anyhow::Result<Vec<String>> {
        let handles = self.enqueue(contenders, Acquire::Blocking).await?;
        self.join(handles).await?;

        let metrics = self.metrics.read().await;
        let mut violations = Vec::new();
        expect(
            &mut violations,
            metrics.acquired == self.client_count as u64,
            format!("{} of {} clients acquired", metrics.acquired, self.client_count),
        );
        Ok(violations)
    }

    async fn run_crash(&self, contenders: Vec<Contender>) -> anyhow::Result<Vec<String>> {
        let (mut holder, rest) = split_holder(contenders)?;
        self.hold_first(&mut holder).await?;

        let handles = self.enqueue(rest, Acquire::Blocking).await?;

        info!(session_id = %holder.session_id(), "Crashing holder");
        self.ensemble.crash_session(holder.session_id());
        self.occupancy.leave();

        self.join(handles).await?;

        let metrics = self.metrics.read().await;
        let mut violations = Vec::new();
        expect(
            &mut violations,
            metrics.acquired == self.client_count as u64,
            format!(
                "{} of {} clients acquired after the crash",
                metrics.acquired, self.client_count
            ),
        );
        Ok(violations)
    }

    async fn run_timeout(&self, contenders: Vec<Contender>) -> anyhow::Result<Vec<String>> {
        let (mut holder, rest) = split_holder(contenders)?;
        let waiters = rest.len() as u64;
        self.hold_first(&mut holder).await?;

        let handles = self.enqueue(rest, Acquire::Bounded(self.timeout)).await?;
        self.join(handles).await?;

        self.occupancy.leave();
        holder.release().await?;

        let metrics = self.metrics.read().await;
        let mut violations = Vec::new();
        expect(
            &mut violations,
            metrics.timed_out == waiters,
            format!("{} of {} bounded waiters timed out", metrics.timed_out, waiters),
        );
        expect(
            &mut violations,
            metrics.acquired == 1,
            format!("{} acquisitions while the holder never released", metrics.acquired),
        );
        Ok(violations)
    }

    async fn run_external_delete(&self, contenders: Vec<Contender>) -> anyhow::Result<Vec<String>> {
        let (mut holder, rest) = split_holder(contenders)?;
        self.hold_first(&mut holder).await?;

        let handles = self.enqueue(rest, Acquire::Blocking).await?;
        tokio::time::sleep(self.hold).await;

        let queue = self.ensemble.children(&self.config.root_path);
        let victim = queue
            .get(1)
            .map(|name| format!("{}/{}", self.config.root_path, name))
            .ok_or_else(|| anyhow::anyhow!("Queue too short: {:?}", queue))?;

        info!(token = %victim, "Deleting queued token");
        self.ensemble.delete_node(&victim)?;
        tokio::time::sleep(self.hold).await;

        self.occupancy.leave();
        holder.release().await?;

        self.join(handles).await?;

        let metrics = self.metrics.read().await;
        let lost = metrics.failures.get("TOKEN_LOST").copied().unwrap_or(0);
        let mut violations = Vec::new();
        expect(
            &mut violations,
            lost == 1,
            format!("{} contenders lost their token, expected 1", lost),
        );
        expect(
            &mut violations,
            metrics.acquired == self.client_count as u64 - 1,
            format!(
                "{} of {} surviving clients acquired",
                metrics.acquired,
                self.client_count - 1
            ),
        );
        Ok(violations)
    }

    /// Take the lock with the first contender and keep it.
    async fn hold_first(&self, holder: &mut Contender) -> anyhow::Result<()> {
        holder.acquire().await?;
        self.occupancy.enter();
        self.metrics
            .write()
            .await
            .record_acquired(holder.sequence().unwrap_or_default(), 0);
        Ok(())
    }

    /// Spawn contenders one at a time, each after the previous one queued its
    /// token, so creation order matches contender order.
    async fn enqueue(
        &self,
        contenders: Vec<Contender>,
        mode: Acquire,
    ) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(contenders.len());

        for contender in contenders {
            let created = self.lock_metrics.snapshot().tokens_created;
            let hold = self.hold_time().await;

            handles.push(tokio::spawn(contend(
                contender,
                mode,
                hold,
                self.metrics.clone(),
                self.occupancy.clone(),
            )));

            self.await_tokens(created + 1).await?;
        }

        Ok(handles)
    }

    async fn await_tokens(&self, count: u64) -> anyhow::Result<()> {
        let deadline = Instant::now() + QUEUE_TIMEOUT;
        while self.lock_metrics.snapshot().tokens_created < count {
            if Instant::now() >= deadline {
                anyhow::bail!("Contender never queued token {}", count);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }

    async fn join(&self, handles: Vec<JoinHandle<()>>) -> anyhow::Result<()> {
        for result in join_all(handles).await {
            result?;
        }
        Ok(())
    }

    /// Base hold plus up to half of it in jitter.
    async fn hold_time(&self) -> Duration {
        let jitter = self.hold.as_millis() as u64 / 2;
        if jitter == 0 {
            return self.hold;
        }
        let extra = self.rng.write().await.gen_range(0..=jitter);
        self.hold + Duration::from_millis(extra)
    }

    async fn report(
        &self,
        scenario: &Scenario,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        mut violations: Vec<String>,
    ) -> SimulationReport {
        let metrics = self.metrics.read().await.clone();
        let max_holders = self.occupancy.max();
        let leftover_tokens = self.ensemble.children(&self.config.root_path);

        expect(
            &mut violations,
            max_holders <= 1,
            format!("Mutual exclusion violated: {} concurrent holders", max_holders),
        );
        expect(
            &mut violations,
            metrics.is_fifo(),
            format!("FIFO order violated: {:?}", metrics.acquisition_order),
        );
        expect(
            &mut violations,
            leftover_tokens.is_empty(),
            format!("Tokens left behind: {:?}", leftover_tokens),
        );

        SimulationReport {
            scenario: scenario.name.clone(),
            clients: self.client_count,
            started_at,
            elapsed_ms: elapsed.as_millis() as u64,
            acquired: metrics.acquired,
            timed_out: metrics.timed_out,
            failed: metrics.failed(),
            failures: metrics.failures.clone(),
            acquisition_order: metrics.acquisition_order.clone(),
            max_concurrent_holders: max_holders,
            average_wait_ms: metrics.average_wait_ms(),
            p99_wait_ms: metrics.p99_wait_ms(),
            leftover_tokens,
            violations,
            lock_metrics: self.lock_metrics.snapshot(),
        }
    }
}

/// One contender's full lifecycle: acquire, hold, release.
async fn contend(
    mut contender: Contender,
    mode: Acquire,
    hold: Duration,
    metrics: Arc<RwLock<SimulationMetrics>>,
    occupancy: Arc<Occupancy>,
) {
    let started = Instant::now();

    let result = match mode {
        Acquire::Blocking => contender.acquire().await.map(|()| true),
        Acquire::Bounded(timeout) => contender.acquire_within(timeout).await,
    };

    match result {
        Ok(true) => {
            let holders = occupancy.enter();
            if holders > 1 {
                warn!(contender = contender.index, holders, "Overlapping holders");
            }

            metrics.write().await.record_acquired(
                contender.sequence().unwrap_or_default(),
                started.elapsed().as_millis() as u64,
            );

            tokio::time::sleep(hold).await;
            occupancy.leave();
        }
        Ok(false) => {
            info!(contender = contender.index, "Gave up waiting");
            metrics.write().await.record_timeout();
        }
        Err(e) => {
            warn!(contender = contender.index, error = %e, "Contender failed");
            metrics.write().await.record_failure(e.error_code());
        }
    }

    if let Err(e) = contender.release().await {
        warn!(contender = contender.index, error = %e, "Release failed");
    }
}

fn split_holder(contenders: Vec<Contender>) -> anyhow::Result<(Contender, Vec<Contender>)> {
    let mut iter = contenders.into_iter();
    let holder = iter
        .next()
        .ok_or_else(|| anyhow::anyhow!("No contenders"))?;
    Ok((holder, iter.collect()))
}

fn expect(violations: &mut Vec<String>, holds: bool, message: String) {
    if !holds {
        violations.push(message);
    }
}

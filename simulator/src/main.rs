//! Turnstile Simulator
//!
//! Runs lock contention scenarios against an in-memory ensemble and checks
//! mutual exclusion and FIFO order.

use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use turnstile_client::LockConfig;

mod contender;
mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use scenario::Scenario;

/// Turnstile Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Turnstile lock contention simulator")]
struct Args {
    /// Number of contending clients
    #[arg(short, long, default_value = "5")]
    clients: usize,

    /// Scenario to run (fifo, crash, timeout, external-delete)
    #[arg(short, long, default_value = "fifo")]
    scenario: String,

    /// How long each holder keeps the lock
    #[arg(long, default_value = "10")]
    hold_ms: u64,

    /// Bound for try_lock_for in the timeout scenario
    #[arg(long, default_value = "50")]
    timeout_ms: u64,

    /// Session timeout; a crashed holder is released after this long
    #[arg(long, default_value = "500")]
    session_timeout_ms: u64,

    /// Random seed for hold-time jitter
    #[arg(long)]
    seed: Option<u64>,

    /// Emit logs as JSON (also enabled by LOG_FORMAT=json)
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    let json = args.json_logs || std::env::var("LOG_FORMAT").map_or(false, |f| f == "json");
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting Turnstile Simulator");
    info!("Clients: {}", args.clients);

    let scenario = Scenario::load(&args.scenario)?;
    let config = LockConfig::from_env()
        .with_session_timeout(Duration::from_millis(args.session_timeout_ms));

    let controller = SimulationController::new(
        args.clients,
        config,
        Duration::from_millis(args.hold_ms),
        Duration::from_millis(args.timeout_ms),
        args.seed,
    )?;

    let report = controller.run_scenario(&scenario).await?;

    info!("Simulation complete");
    info!("Acquired: {}", report.acquired);
    info!("Timed out: {}", report.timed_out);
    info!("Failed: {}", report.failed);
    info!("Average wait: {}ms", report.average_wait_ms);

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.violations.is_empty() {
        for violation in &report.violations {
            error!("Invariant violated: {}", violation);
        }
        anyhow::bail!("{} invariant violation(s)", report.violations.len());
    }

    Ok(())
}

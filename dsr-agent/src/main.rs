//! # dsr-agent
//!
//! Binary entry point that wires [`dsr_core`]'s reconciler and rollout
//! coordinator into a running process, backed by the in-memory `Store`
//! and `Engine` fakes — a persistence layer and a real container engine
//! are out of this crate's scope, but the control-plane logic they drive
//! runs exactly as it would against real ones.
//!
//! ## Usage
//!
//! ```bash
//! # Basic usage with environment-driven defaults
//! dsr-agent
//!
//! # Faster polling and verbose logging
//! dsr-agent --poll-interval-s 1 --log-level debug
//! ```
//!
//! ## Environment Variables
//!
//! See [`dsr_core::config::DsrConfig::from_env`] for the full list:
//! `POLL_INTERVAL_S`, `DOCKER_NETWORK`, `GATEWAY_TIMEOUT_S`,
//! `FAIL_THRESHOLD`, `ALLOW_EXTERNAL_TARGETS`.
//!
//! ## Exit codes
//!
//! - `0` — clean shutdown (Ctrl+C).
//! - `1` — the shutdown signal handler itself failed to install.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dsr_core::alert::NullAlertSink;
use dsr_core::config::DsrConfig;
use dsr_core::engine::FakeEngine;
use dsr_core::reconciler::Reconciler;
use dsr_core::registry::RuntimeRegistry;
use dsr_core::store::MemoryStore;

/// Command line arguments for the reconciler agent.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Override `POLL_INTERVAL_S` for this run.
    #[arg(long)]
    poll_interval_s: Option<u64>,

    /// Logging level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt().with_env_filter(&args.log_level).init();

    let mut config = DsrConfig::from_env();
    if let Some(poll_interval_s) = args.poll_interval_s {
        config.poll_interval = std::time::Duration::from_secs(poll_interval_s);
    }

    tracing::info!(?config, "starting reconciler agent");

    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(FakeEngine::new());
    let registry = Arc::new(RuntimeRegistry::new());

    let poll_interval = config.poll_interval;
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        engine,
        registry.clone(),
        Arc::new(NullAlertSink),
        config,
    ));
    let handle = reconciler.spawn();
    let status_task = tokio::spawn(status_loop(store, registry, poll_interval));

    let outcome = match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("shutdown signal received");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to listen for shutdown signal");
            ExitCode::FAILURE
        }
    };

    status_task.abort();
    handle.stop().await;
    outcome
}

/// Periodically logs a one-line summary of known services and in-flight
/// rollouts. Stands in for the out-of-scope HTTP status surface.
async fn status_loop(
    store: Arc<MemoryStore>,
    registry: Arc<RuntimeRegistry>,
    poll_interval: std::time::Duration,
) {
    use dsr_core::store::Store;

    let mut ticker = tokio::time::interval(poll_interval * 3);
    loop {
        ticker.tick().await;
        let service_count = store.list_services().map(|s| s.len()).unwrap_or(0);
        let rollout_count = registry.list_rollouts().len();
        tracing::info!(service_count, rollout_count, "status summary");
    }
}

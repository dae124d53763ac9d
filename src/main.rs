//! status-worker - health-check worker for the status page.
//!
//! Probes a fixed set of endpoints on an interval, keeps a singleton status
//! snapshot plus deduplicated incidents, and elects a single writer among
//! redundant instances through a lease in the shared store.

mod config;
mod db;
mod lease;
mod metrics;
mod probe;
mod scheduler;
#[cfg(test)]
mod testutil;
mod web;

use config::WorkerConfig;
use db::{Store, WORKER_LOCK_ID};
use scheduler::{CycleContext, Scheduler};
use web::Server;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{BufRead, Write};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "status-worker", about = "Health-check worker for the status page")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker loop (default).
    Run,
    /// Print row counts, the current snapshot, recent incidents and the lock.
    Inspect {
        /// Only list unresolved incidents.
        #[arg(long)]
        open_only: bool,
    },
    /// Delete the leader lock regardless of owner.
    ReleaseLock {
        /// Skip the confirmation prompt.
        #[arg(long, short)]
        yes: bool,
    },
    /// Stamp the snapshot and its services as checked now.
    Touch,
    /// Mark an incident resolved.
    Resolve {
        /// Incident id, e.g. inc-1700000000000-api-gateway.
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("status_worker=info".parse()?))
        .init();

    let cli = Cli::parse();

    // Load configuration; malformed values are fatal.
    let cfg = WorkerConfig::load()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(cfg).await,
        Command::Inspect { open_only } => inspect(&open_store(&cfg)?, open_only),
        Command::ReleaseLock { yes } => release_lock(&open_store(&cfg)?, yes),
        Command::Touch => touch(&open_store(&cfg)?),
        Command::Resolve { id } => resolve(&open_store(&cfg)?, &id),
    }
}

async fn run(cfg: WorkerConfig) -> Result<(), BoxError> {
    tracing::info!("Starting status worker, interval {:?}", cfg.interval);
    match &cfg.db_path {
        Some(path) => tracing::info!("Using shared store at {}", path.display()),
        None => tracing::info!(
            "No shared store configured; writing snapshots to {}",
            cfg.snapshot_path.display()
        ),
    }

    let metrics = metrics::select();
    let server = Server::new(cfg.metrics_port, metrics.clone());
    let listener = server.bind().await?;

    let ctx = CycleContext::from_config(&cfg, metrics)?;
    if let Some(lease) = &ctx.lease {
        tracing::info!("Leader election enabled as {}", lease.owner());
    }
    let scheduler = Scheduler::new(ctx);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_shutdown = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(listener, server_shutdown).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });
    let worker_handle = tokio::spawn(scheduler.run(shutdown_rx));

    wait_for_signal().await;
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = worker_handle.await;
    let _ = server_handle.await;

    tracing::info!("Status worker stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

// --- Operator commands ---

fn open_store(cfg: &WorkerConfig) -> Result<Store, BoxError> {
    let path = cfg.require_db_path()?;
    Ok(Store::new(path)?)
}

fn print_json<T: Serialize>(label: &str, value: &T) -> Result<(), BoxError> {
    println!("{}:\n{}\n", label, serde_json::to_string_pretty(value)?);
    Ok(())
}

fn inspect(store: &Store, open_only: bool) -> Result<(), BoxError> {
    print_json("Counts", &store.counts()?)?;
    print_json("Snapshot", &store.get_snapshot()?)?;
    let filter = open_only.then_some(false);
    print_json("Recent incidents (last 10)", &store.list_incidents(filter, 10)?)?;
    print_json("Worker lock", &store.get_lock(WORKER_LOCK_ID)?)?;
    Ok(())
}

fn release_lock(store: &Store, yes: bool) -> Result<(), BoxError> {
    let Some(lock) = store.get_lock(WORKER_LOCK_ID)? else {
        println!("No `{}` lock found. Nothing to delete.", WORKER_LOCK_ID);
        return Ok(());
    };
    print_json("Found lock", &lock)?;

    let forced = std::env::var_os("YES").is_some() || std::env::var_os("FORCE").is_some();
    if !(yes || forced || confirm(&format!("Delete the `{}` lock? (y/N): ", WORKER_LOCK_ID))?) {
        println!("Aborting: lock not deleted. Pass --yes (or set YES=1) to skip this prompt.");
        return Ok(());
    }

    if store.force_release_lock(WORKER_LOCK_ID)? {
        println!("Deleted lock held by {}", lock.owner);
    } else {
        println!("Lock disappeared before it could be deleted");
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool, BoxError> {
    print!("{}", prompt);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn touch(store: &Store) -> Result<(), BoxError> {
    if !store.touch_snapshot(Utc::now())? {
        return Err("no status snapshot found".into());
    }
    println!("Snapshot timestamps updated");
    Ok(())
}

fn resolve(store: &Store, id: &str) -> Result<(), BoxError> {
    if !store.resolve_incident(id, Utc::now())? {
        return Err(format!("no open incident with id {}", id).into());
    }
    println!("Resolved incident {}", id);
    Ok(())
}

//! Cycle orchestrator.
//!
//! Each tick: claim the lease (when a shared store is configured), probe
//! every target, persist the snapshot and incidents, update metrics. A
//! shutdown signal stops future ticks but never interrupts a running cycle.

use crate::config::WorkerConfig;
use crate::db::{LocalSnapshot, PersistOutcome, StatusSnapshot, Store};
use crate::lease::LeaseManager;
use crate::metrics::{record_cycle, MetricsSink, Pusher};
use crate::probe::{ProbeError, Prober, Target};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Acquiring,
    Probing,
    Persisting,
    ShuttingDown,
}

/// Where a cycle's snapshot ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    Shared(PersistOutcome),
    /// The shared store write failed and the local file was written instead.
    Fallback,
    /// No shared store is configured.
    Local,
    /// Every write failed; the reason has been logged.
    Nowhere,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another instance holds the lease; nothing was probed.
    Skipped,
    Completed { failed: usize, persisted: Persisted },
}

/// Everything a cycle needs, owned by the scheduler.
pub struct CycleContext {
    pub targets: Vec<Target>,
    pub interval: Duration,
    pub prober: Prober,
    pub store: Option<Store>,
    pub lease: Option<LeaseManager>,
    pub local: LocalSnapshot,
    pub metrics: Arc<dyn MetricsSink>,
    pub pusher: Option<Pusher>,
}

impl CycleContext {
    /// Assemble the context from configuration.
    ///
    /// An unreachable store is not fatal: the worker runs in local-file mode.
    /// Failing to build the HTTP client is.
    pub fn from_config(cfg: &WorkerConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self, ProbeError> {
        let prober = Prober::new(cfg.probe_timeout, cfg.probe_concurrency)?;

        let store = cfg.db_path.as_ref().and_then(|path| match Store::new(path) {
            Ok(store) => {
                tracing::info!("Connected to shared store at {}", path.display());
                Some(store)
            }
            Err(e) => {
                tracing::error!(
                    "Failed to open shared store at {}, falling back to local file: {}",
                    path.display(),
                    e
                );
                None
            }
        });

        let lease = store.as_ref().map(|s| {
            LeaseManager::new(s.clone(), cfg.owner.clone(), cfg.lock_ttl, cfg.renew_interval)
        });

        // Group pushes by owner only when that label means something.
        let grouping = (lease.is_some() || cfg.owner_overridden).then_some(cfg.owner.as_str());
        let pusher = cfg.push.as_ref().and_then(|push| match Pusher::new(push, grouping) {
            Ok(p) => {
                tracing::info!("Configured Pushgateway at {}", p.url());
                Some(p)
            }
            Err(e) => {
                tracing::warn!("Failed to configure Pushgateway: {}", e);
                None
            }
        });

        let local = LocalSnapshot::new(cfg.snapshot_path.clone());
        if store.is_none() {
            if let Some(previous) = local.read() {
                tracing::info!(
                    "Found local snapshot from {} ({} services down)",
                    previous.last_checked,
                    previous.failed_count()
                );
            }
        }

        Ok(Self {
            targets: cfg.targets.clone(),
            interval: cfg.interval,
            prober,
            store,
            lease,
            local,
            metrics,
            pusher,
        })
    }
}

/// Drives the repeating probe cycle.
pub struct Scheduler {
    ctx: CycleContext,
    state: CycleState,
}

impl Scheduler {
    pub fn new(ctx: CycleContext) -> Self {
        Self {
            ctx,
            state: CycleState::Idle,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> CycleState {
        self.state
    }

    fn transition(&mut self, next: CycleState) {
        tracing::debug!("Scheduler: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run one full cycle.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.transition(CycleState::Acquiring);
        if let Some(lease) = self.ctx.lease.as_mut() {
            if !lease.try_acquire() {
                tracing::warn!("Another worker holds the lock; skipping this run");
                self.transition(CycleState::Idle);
                return CycleOutcome::Skipped;
            }
        }

        self.transition(CycleState::Probing);
        let results = self.ctx.prober.probe_all(&self.ctx.targets).await;

        self.transition(CycleState::Persisting);
        let snapshot = StatusSnapshot::from_results(&results);
        let failed = snapshot.failed_count();
        let persisted = self.persist(&snapshot);

        record_cycle(self.ctx.metrics.as_ref(), failed, Utc::now());
        if let Some(pusher) = &self.ctx.pusher {
            if self.ctx.metrics.enabled() {
                pusher.push_in_background(self.ctx.metrics.render());
            }
        }

        tracing::info!(
            "Checked {} targets, {} down, persisted: {:?}",
            results.len(),
            failed,
            persisted
        );
        self.transition(CycleState::Idle);
        CycleOutcome::Completed { failed, persisted }
    }

    fn persist(&self, snapshot: &StatusSnapshot) -> Persisted {
        let Some(store) = &self.ctx.store else {
            return self.write_local(snapshot, Persisted::Local);
        };

        match store.persist(snapshot, Utc::now()) {
            Ok(outcome) => {
                tracing::debug!(
                    "Persisted health check results ({} incidents opened, {} updated)",
                    outcome.incidents_opened,
                    outcome.incidents_updated
                );
                Persisted::Shared(outcome)
            }
            Err(e) => {
                tracing::error!("Failed to persist to shared store: {}", e);
                self.write_local(snapshot, Persisted::Fallback)
            }
        }
    }

    fn write_local(&self, snapshot: &StatusSnapshot, on_success: Persisted) -> Persisted {
        match self.ctx.local.write(snapshot) {
            Ok(()) => {
                tracing::debug!("Wrote status snapshot to {}", self.ctx.local.path().display());
                on_success
            }
            Err(e) => {
                tracing::error!("Failed to write local snapshot: {}", e);
                Persisted::Nowhere
            }
        }
    }

    /// Run cycles until `shutdown` becomes true, then shut down cleanly.
    ///
    /// The first cycle starts immediately.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Starting health-check worker with {} targets, interval {:?}",
            self.ctx.targets.len(),
            self.ctx.interval
        );

        let mut interval = tokio::time::interval(self.ctx.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = interval.tick() => {}
            }
            self.run_cycle().await;
        }

        self.shutdown();
    }

    fn shutdown(mut self) {
        self.transition(CycleState::ShuttingDown);
        tracing::info!("Shutting down worker");

        if let Some(lease) = self.ctx.lease.as_mut() {
            lease.release();
        }
        if self.ctx.store.take().is_some() {
            tracing::info!("Closed shared store");
        }
    }
}

//! Lease-based leader election over the shared store.
//!
//! An instance is leader while it holds the `status_worker` lock row. The
//! lease is claimed with a single conditional upsert, renewed on a timer that
//! only runs while the lease is held, and released on graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::db::{Store, WORKER_LOCK_ID};

pub struct LeaseManager {
    store: Store,
    owner: String,
    pid: u32,
    ttl: Duration,
    renew_interval: Duration,
    held: Arc<AtomicBool>,
    renewal: Option<JoinHandle<()>>,
}

impl LeaseManager {
    pub fn new(store: Store, owner: impl Into<String>, ttl: Duration, renew_interval: Duration) -> Self {
        Self {
            store,
            owner: owner.into(),
            pid: std::process::id(),
            ttl,
            renew_interval,
            held: Arc::new(AtomicBool::new(false)),
            renewal: None,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[cfg(test)]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Claim or re-confirm the lease. Store errors count as a denial.
    ///
    /// Starts the renewal timer when the lease is newly held.
    pub fn try_acquire(&mut self) -> bool {
        let acquired = match self
            .store
            .try_acquire_lock(WORKER_LOCK_ID, &self.owner, self.pid, self.ttl, Utc::now())
        {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::warn!("Lease: acquisition failed: {}", e);
                false
            }
        };

        self.held.store(acquired, Ordering::SeqCst);
        if acquired {
            self.start_renewal();
        } else {
            self.stop_renewal();
        }
        acquired
    }

    /// Extend the lease once. Returns false if it is no longer ours.
    #[cfg(test)]
    pub fn renew(&self) -> bool {
        renew_once(&self.store, &self.owner, self.ttl, &self.held)
    }

    fn start_renewal(&mut self) {
        if self.renewal.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let store = self.store.clone();
        let owner = self.owner.clone();
        let ttl = self.ttl;
        let period = self.renew_interval;
        let held = self.held.clone();

        tracing::debug!("Lease: starting renewal every {:?}", period);
        self.renewal = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; the lease was just claimed.
            interval.tick().await;

            loop {
                interval.tick().await;
                if !renew_once(&store, &owner, ttl, &held) {
                    break;
                }
            }
        }));
    }

    fn stop_renewal(&mut self) {
        if let Some(handle) = self.renewal.take() {
            handle.abort();
        }
    }

    /// Stop renewing and delete the lock if we hold it.
    pub fn release(&mut self) {
        self.stop_renewal();

        if !self.held.swap(false, Ordering::SeqCst) {
            return;
        }

        match self.store.release_lock(WORKER_LOCK_ID, &self.owner) {
            Ok(true) => tracing::info!("Lease: released leader lock"),
            Ok(false) => tracing::warn!("Lease: lock was no longer ours at release"),
            Err(e) => tracing::error!("Lease: failed to release lock: {}", e),
        }
    }
}

impl Drop for LeaseManager {
    fn drop(&mut self) {
        self.stop_renewal();
    }
}

fn renew_once(store: &Store, owner: &str, ttl: Duration, held: &AtomicBool) -> bool {
    let renewed = match store.renew_lock(WORKER_LOCK_ID, owner, ttl, Utc::now()) {
        Ok(true) => {
            tracing::debug!("Lease: renewed");
            true
        }
        Ok(false) => {
            tracing::warn!("Lease: renewal refused; another worker may have taken the lock");
            false
        }
        Err(e) => {
            tracing::warn!("Lease: renewal failed: {}", e);
            false
        }
    };

    if !renewed {
        held.store(false, Ordering::SeqCst);
    }
    renewed
}

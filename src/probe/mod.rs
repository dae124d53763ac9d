//! Probe module for endpoint health checks.
//!
//! A probe never fails: every outcome, including timeouts and connection
//! errors, is folded into a [`CheckResult`].

mod http;

pub use http::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Probe error types, rendered into [`CheckResult::error`].
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// A monitored endpoint. Loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub url: String,
}

impl Target {
    pub fn new(id: &str, name: &str, url: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            url: url.into(),
        }
    }
}

/// Outcome of probing one target in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub target_id: String,
    pub target_name: String,
    pub ok: bool,
    /// 0 when no response was received
    pub http_status: u16,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Runs bounded-timeout GET probes against targets.
#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
    timeout: Duration,
    concurrency: usize,
}

impl Prober {
    pub fn new(timeout: Duration, concurrency: usize) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            timeout,
            concurrency: concurrency.max(1),
        })
    }

    /// Probe a single target.
    pub async fn probe(&self, target: &Target) -> CheckResult {
        let start = Instant::now();
        let result = run_http_probe(&self.client, &target.url, self.timeout).await;
        let elapsed = start.elapsed().as_millis() as u64;

        let checked_at = Utc::now();
        match result {
            Ok(status) => {
                let ok = is_success(status);
                CheckResult {
                    target_id: target.id.clone(),
                    target_name: target.name.clone(),
                    ok,
                    http_status: status,
                    latency_ms: Some(elapsed),
                    error: (!ok).then(|| format!("unexpected status {}", status)),
                    checked_at,
                }
            }
            Err(e) => {
                tracing::debug!("Probe failed for {}: {}", target.name, e);
                CheckResult {
                    target_id: target.id.clone(),
                    target_name: target.name.clone(),
                    ok: false,
                    http_status: 0,
                    latency_ms: None,
                    error: Some(e.to_string()),
                    checked_at,
                }
            }
        }
    }

    /// Probe every target, at most `concurrency` at a time.
    ///
    /// Results come back in target order.
    pub async fn probe_all(&self, targets: &[Target]) -> Vec<CheckResult> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();

        for (idx, target) in targets.iter().cloned().enumerate() {
            let prober = self.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (idx, prober.probe(&target).await)
            });
        }

        let mut slots: Vec<Option<CheckResult>> = vec![None; targets.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => tracing::error!("Probe task failed: {}", e),
            }
        }

        // A panicked probe task still reports its target as down.
        slots
            .into_iter()
            .zip(targets)
            .map(|(slot, target)| {
                slot.unwrap_or_else(|| CheckResult {
                    target_id: target.id.clone(),
                    target_name: target.name.clone(),
                    ok: false,
                    http_status: 0,
                    latency_ms: None,
                    error: Some("probe task aborted".to_string()),
                    checked_at: Utc::now(),
                })
            })
            .collect()
    }
}

//! Prometheus-backed metrics sink.

use chrono::{DateTime, Utc};
use prometheus::{Encoder, Gauge, IntCounter, Registry, TextEncoder};

use super::MetricsSink;

/// Holds the worker metrics in a private registry.
pub struct PrometheusSink {
    registry: Registry,
    checks_total: IntCounter,
    checks_failed_total: IntCounter,
    last_check_timestamp: Gauge,
}

impl PrometheusSink {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let checks_total = IntCounter::new("status_worker_checks_total", "Total status checks performed")?;
        let checks_failed_total =
            IntCounter::new("status_worker_checks_failed_total", "Total failed checks")?;
        let last_check_timestamp =
            Gauge::new("status_worker_last_check_timestamp", "Unix timestamp of last check")?;

        registry.register(Box::new(checks_total.clone()))?;
        registry.register(Box::new(checks_failed_total.clone()))?;
        registry.register(Box::new(last_check_timestamp.clone()))?;

        Ok(Self {
            registry,
            checks_total,
            checks_failed_total,
            last_check_timestamp,
        })
    }
}

impl MetricsSink for PrometheusSink {
    fn inc_checks(&self) {
        self.checks_total.inc();
    }

    fn inc_failed(&self, count: u64) {
        self.checks_failed_total.inc_by(count);
    }

    fn set_last_check(&self, at: DateTime<Utc>) {
        self.last_check_timestamp
            .set(at.timestamp_millis() as f64 / 1000.0);
    }

    fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            tracing::error!("Metrics: encoding failed: {}", e);
            return format!("# metrics error: {}\n", e);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn enabled(&self) -> bool {
        true
    }
}

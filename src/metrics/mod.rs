//! Worker metrics.
//!
//! Call sites only see [`MetricsSink`]. [`select`] picks the Prometheus
//! exporter when it is compiled in and its metrics register, and the no-op
//! sink otherwise, so metrics can never take the worker down.

#[cfg(feature = "prometheus")]
mod exporter;
mod push;

#[cfg(feature = "prometheus")]
pub use exporter::*;
pub use push::*;

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Content type of the text exposition format.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// The three per-cycle worker signals plus their rendered exposition.
pub trait MetricsSink: Send + Sync {
    /// `checks_total`: once per cycle that ran.
    fn inc_checks(&self);
    /// `checks_failed_total`: by the number of down results in the cycle.
    fn inc_failed(&self, count: u64);
    /// `last_check_timestamp`: the cycle's end time.
    fn set_last_check(&self, at: DateTime<Utc>);
    /// Body served at `/metrics`.
    fn render(&self) -> String;
    /// Whether the body carries real metrics (and so is worth pushing).
    fn enabled(&self) -> bool;
}

/// Record one completed cycle.
pub fn record_cycle(sink: &dyn MetricsSink, failed: usize, finished_at: DateTime<Utc>) {
    sink.inc_checks();
    if failed > 0 {
        sink.inc_failed(failed as u64);
    }
    sink.set_last_check(finished_at);
}

/// Stand-in used when the exporter is unavailable.
#[derive(Debug, Default)]
pub struct NoopSink {
    reason: String,
}

impl NoopSink {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl MetricsSink for NoopSink {
    fn inc_checks(&self) {}
    fn inc_failed(&self, _count: u64) {}
    fn set_last_check(&self, _at: DateTime<Utc>) {}

    fn render(&self) -> String {
        format!("# metrics disabled: {}\n", self.reason)
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// Choose the metrics implementation once at startup.
#[cfg(feature = "prometheus")]
pub fn select() -> Arc<dyn MetricsSink> {
    match PrometheusSink::new() {
        Ok(sink) => {
            tracing::info!("Metrics: Prometheus exporter enabled");
            Arc::new(sink)
        }
        Err(e) => {
            tracing::warn!("Metrics: exporter unavailable, metrics disabled: {}", e);
            Arc::new(NoopSink::new(format!("exporter failed to initialise ({})", e)))
        }
    }
}

/// Choose the metrics implementation once at startup.
#[cfg(not(feature = "prometheus"))]
pub fn select() -> Arc<dyn MetricsSink> {
    tracing::warn!("Metrics: built without the prometheus feature; metrics disabled");
    Arc::new(NoopSink::new("built without the prometheus feature"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_sink_renders_placeholder() {
        let sink = NoopSink::new("prometheus not available");
        record_cycle(&sink, 3, Utc::now());
        assert!(!sink.enabled());
        assert_eq!(sink.render(), "# metrics disabled: prometheus not available\n");
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn test_select_prefers_exporter() {
        assert!(select().enabled());
    }
}

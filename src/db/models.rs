//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probe::CheckResult;

/// Placeholder uptime figures shown on the status page.
const UPTIME_UP: &str = "99.9%";
const UPTIME_DOWN: &str = "0%";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallState {
    Operational,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Operational,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStatus {
    pub status: OverallState,
    #[serde(rename = "uptime30d")]
    pub uptime_30d: String,
}

/// One service row of the status page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub id: String,
    pub name: String,
    pub status: ServiceState,
    pub uptime: String,
    pub latency: String,
    pub last_checked: DateTime<Utc>,
}

impl ServiceStatus {
    pub fn is_down(&self) -> bool {
        self.status == ServiceState::Down
    }
}

/// The singleton aggregate status document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub last_checked: DateTime<Utc>,
    pub overall: OverallStatus,
    pub services: Vec<ServiceStatus>,
    pub incidents: Vec<Incident>,
}

impl StatusSnapshot {
    /// Build the snapshot for one cycle's results.
    ///
    /// The snapshot depends only on `results`, so replaying a result set
    /// produces an identical document.
    pub fn from_results(results: &[CheckResult]) -> Self {
        let last_checked = results
            .iter()
            .map(|r| r.checked_at)
            .max()
            .unwrap_or_else(Utc::now);

        let status = if results.iter().all(|r| r.ok) {
            OverallState::Operational
        } else {
            OverallState::Degraded
        };

        let services = results
            .iter()
            .map(|r| ServiceStatus {
                id: r.target_id.clone(),
                name: r.target_name.clone(),
                status: if r.ok { ServiceState::Operational } else { ServiceState::Down },
                uptime: if r.ok { UPTIME_UP } else { UPTIME_DOWN }.to_string(),
                latency: r
                    .latency_ms
                    .map(|ms| format!("{}ms", ms))
                    .unwrap_or_else(|| "n/a".to_string()),
                last_checked: r.checked_at,
            })
            .collect();

        Self {
            last_checked,
            overall: OverallStatus {
                status,
                uptime_30d: UPTIME_UP.to_string(),
            },
            services,
            incidents: Vec::new(),
        }
    }

    pub fn failed_count(&self) -> usize {
        self.services.iter().filter(|s| s.is_down()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "minor" => Some(Severity::Minor),
            "major" => Some(Severity::Major),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// A deduplicated outage record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved: bool,
    pub severity: Severity,
    pub services: Vec<String>,
    pub occurrences: i64,
}

/// Title shared by every incident raised for an unreachable service.
pub fn unreachable_title(service_name: &str) -> String {
    format!("{} Unreachable", service_name)
}

/// The leader-election lease row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerLock {
    pub id: String,
    pub owner: String,
    pub pid: u32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row counts for the inspect command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCounts {
    pub status_meta: i64,
    pub incidents: i64,
    pub worker_locks: i64,
}

/// What a successful persist changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub incidents_opened: usize,
    pub incidents_updated: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, ok: bool, latency: Option<u64>) -> CheckResult {
        CheckResult {
            target_id: id.to_string(),
            target_name: id.to_uppercase(),
            ok,
            http_status: if ok { 200 } else { 0 },
            latency_ms: latency,
            error: None,
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn test_snapshot_all_ok_is_operational() {
        let snap = StatusSnapshot::from_results(&[
            result("a", true, Some(12)),
            result("b", true, Some(40)),
            result("c", true, Some(3)),
        ]);
        assert_eq!(snap.overall.status, OverallState::Operational);
        assert_eq!(snap.failed_count(), 0);
        assert_eq!(snap.services[0].latency, "12ms");
        assert_eq!(snap.services[0].uptime, "99.9%");
    }

    #[test]
    fn test_snapshot_one_down_is_degraded() {
        let snap = StatusSnapshot::from_results(&[
            result("a", true, Some(12)),
            result("b", false, None),
            result("c", true, Some(3)),
        ]);
        assert_eq!(snap.overall.status, OverallState::Degraded);
        assert_eq!(snap.failed_count(), 1);
        assert_eq!(snap.services[1].status, ServiceState::Down);
        assert_eq!(snap.services[1].latency, "n/a");
        assert_eq!(snap.services[1].uptime, "0%");
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snap = StatusSnapshot::from_results(&[result("a", false, None)]);
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("lastChecked").is_some());
        assert_eq!(json["overall"]["status"], "degraded");
        assert_eq!(json["overall"]["uptime30d"], "99.9%");
        assert_eq!(json["services"][0]["status"], "down");
        assert!(json["services"][0].get("lastChecked").is_some());
        assert_eq!(json["incidents"], serde_json::json!([]));
    }

    #[test]
    fn test_snapshot_is_deterministic() {
        let results = vec![result("a", true, Some(5)), result("b", false, None)];
        assert_eq!(
            StatusSnapshot::from_results(&results),
            StatusSnapshot::from_results(&results)
        );
    }
}

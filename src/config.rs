//! Configuration module for the status worker.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unlike a best-effort loader, any variable that is present but malformed is
//! rejected so that a misconfigured worker never starts.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

use crate::probe::Target;

/// Upper bound for every `_MS` setting: one year.
pub const MAX_DURATION_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Upper bound for `STATUS_WORKER_PROBE_CONCURRENCY`.
pub const MAX_PROBE_CONCURRENCY: u64 = 1024;

/// Configuration error types. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{var} must be at most {max}, got {value}")]
    TooLarge { var: &'static str, value: u64, max: u64 },
    #[error("renew interval ({renew:?}) must be shorter than the lock TTL ({ttl:?})")]
    RenewNotShorterThanTtl { renew: Duration, ttl: Duration },
    #[error("target list is empty")]
    NoTargets,
    #[error("duplicate target id {0:?}")]
    DuplicateTarget(String),
    #[error("target {id:?} has an invalid url {url:?}")]
    InvalidTargetUrl { id: String, url: String },
    #[error("invalid pushgateway url {0:?}")]
    InvalidPushgatewayUrl(String),
    #[error("failed to read targets file {path}: {source}")]
    TargetsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse targets file {path}: {source}")]
    TargetsParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} is required for this command")]
    Missing(&'static str),
}

/// Credentials attached to pushgateway requests.
#[derive(Debug, Clone, PartialEq)]
pub enum PushAuth {
    /// A complete `Authorization` header value.
    Header(String),
    Basic { user: String, password: String },
}

/// Pushgateway settings; present only when a gateway url is configured.
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub url: Url,
    pub auth: Option<PushAuth>,
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Time between cycle starts (default: 30s)
    pub interval: Duration,
    /// Path to the shared SQLite store; `None` selects local-file mode
    pub db_path: Option<PathBuf>,
    /// Lease time-to-live (default: 60s)
    pub lock_ttl: Duration,
    /// Lease renewal period (default: TTL / 2)
    pub renew_interval: Duration,
    /// Per-target request timeout (default: 8s)
    pub probe_timeout: Duration,
    /// Maximum number of targets probed at once (default: 5)
    pub probe_concurrency: usize,
    /// Port of the metrics scrape endpoint (default: 9500)
    pub metrics_port: u16,
    /// Local snapshot file (default: "public/demo-status.json")
    pub snapshot_path: PathBuf,
    /// Lease owner id and pushgateway grouping label
    pub owner: String,
    /// Whether `owner` was set explicitly rather than generated
    pub owner_overridden: bool,
    pub push: Option<PushConfig>,
    pub targets: Vec<Target>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let ttl = Duration::from_millis(60_000);
        Self {
            interval: Duration::from_millis(30_000),
            db_path: None,
            lock_ttl: ttl,
            renew_interval: ttl / 2,
            probe_timeout: Duration::from_millis(8_000),
            probe_concurrency: 5,
            metrics_port: 9500,
            snapshot_path: PathBuf::from("public").join("demo-status.json"),
            owner: generate_owner_id(),
            owner_overridden: false,
            push: None,
            targets: default_targets(&HashMap::new()),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `STATUS_WORKER_INTERVAL_MS`: cycle interval (default: 30000)
    /// - `STATUS_WORKER_DB_PATH`: shared store path (default: unset)
    /// - `STATUS_WORKER_LOCK_TTL_MS`: lease TTL (default: 60000)
    /// - `STATUS_WORKER_RENEW_INTERVAL_MS`: renewal period (default: TTL / 2)
    /// - `STATUS_WORKER_PROBE_TIMEOUT_MS`: per-target timeout (default: 8000)
    /// - `STATUS_WORKER_PROBE_CONCURRENCY`: parallel probes (default: 5)
    /// - `STATUS_WORKER_METRICS_PORT`: scrape port (default: 9500)
    /// - `STATUS_WORKER_SNAPSHOT_PATH`: local snapshot file
    /// - `STATUS_WORKER_OWNER`: owner id override
    /// - `STATUS_WORKER_PUSHGATEWAY_URL` (+ `_USER`, `_PASSWORD`, `_AUTH`)
    /// - `STATUS_WORKER_TARGETS_FILE`: JSON target list replacing the defaults
    /// - `API_GATEWAY_URL`, `ANALYSIS_ENGINE_URL`, `MONGO_PING_URL`,
    ///   `FIREBASE_HEALTH_URL`, `SHAP_URL`: default target overrides
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Build a configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| vars.get(key).map(String::as_str).filter(|v| !v.is_empty());

        let interval = millis(get("STATUS_WORKER_INTERVAL_MS"), "STATUS_WORKER_INTERVAL_MS", 30_000)?;
        let lock_ttl = millis(get("STATUS_WORKER_LOCK_TTL_MS"), "STATUS_WORKER_LOCK_TTL_MS", 60_000)?;
        let renew_interval = match get("STATUS_WORKER_RENEW_INTERVAL_MS") {
            Some(v) => Duration::from_millis(parse_bounded(v, "STATUS_WORKER_RENEW_INTERVAL_MS", MAX_DURATION_MS)?),
            None => lock_ttl / 2,
        };
        if renew_interval.is_zero() {
            return Err(ConfigError::Zero("STATUS_WORKER_RENEW_INTERVAL_MS"));
        }
        if renew_interval >= lock_ttl {
            return Err(ConfigError::RenewNotShorterThanTtl {
                renew: renew_interval,
                ttl: lock_ttl,
            });
        }

        let probe_timeout = millis(
            get("STATUS_WORKER_PROBE_TIMEOUT_MS"),
            "STATUS_WORKER_PROBE_TIMEOUT_MS",
            8_000,
        )?;

        let probe_concurrency = match get("STATUS_WORKER_PROBE_CONCURRENCY") {
            Some(v) => parse_bounded(v, "STATUS_WORKER_PROBE_CONCURRENCY", MAX_PROBE_CONCURRENCY)? as usize,
            None => 5,
        };

        let metrics_port = match get("STATUS_WORKER_METRICS_PORT") {
            Some(v) => v.parse().map_err(|_| ConfigError::InvalidNumber {
                var: "STATUS_WORKER_METRICS_PORT",
                value: v.to_string(),
            })?,
            None => 9500,
        };

        let (owner, owner_overridden) = match get("STATUS_WORKER_OWNER") {
            Some(o) => (o.to_string(), true),
            None => (generate_owner_id(), false),
        };

        let push = match get("STATUS_WORKER_PUSHGATEWAY_URL") {
            Some(raw) => {
                let url = Url::parse(raw)
                    .map_err(|_| ConfigError::InvalidPushgatewayUrl(raw.to_string()))?;
                let auth = match (
                    get("STATUS_WORKER_PUSHGATEWAY_AUTH"),
                    get("STATUS_WORKER_PUSHGATEWAY_USER"),
                    get("STATUS_WORKER_PUSHGATEWAY_PASSWORD"),
                ) {
                    (Some(pre), _, _) if pre.starts_with("Basic ") => Some(PushAuth::Header(pre.to_string())),
                    (Some(pre), _, _) => Some(PushAuth::Header(format!("Basic {}", pre))),
                    (None, Some(user), Some(password)) => Some(PushAuth::Basic {
                        user: user.to_string(),
                        password: password.to_string(),
                    }),
                    _ => None,
                };
                Some(PushConfig { url, auth })
            }
            None => None,
        };

        let targets = match get("STATUS_WORKER_TARGETS_FILE") {
            Some(path) => load_targets_file(PathBuf::from(path))?,
            None => default_targets(vars),
        };
        validate_targets(&targets)?;

        Ok(Self {
            interval,
            db_path: get("STATUS_WORKER_DB_PATH").map(PathBuf::from),
            lock_ttl,
            renew_interval,
            probe_timeout,
            probe_concurrency,
            metrics_port,
            snapshot_path: get("STATUS_WORKER_SNAPSHOT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("public").join("demo-status.json")),
            owner,
            owner_overridden,
            push,
            targets,
        })
    }

    /// The shared store path, required by the operator subcommands.
    pub fn require_db_path(&self) -> Result<&PathBuf, ConfigError> {
        self.db_path
            .as_ref()
            .ok_or(ConfigError::Missing("STATUS_WORKER_DB_PATH"))
    }
}

/// The five targets of the reference deployment, each overridable by env.
pub fn default_targets(vars: &HashMap<String, String>) -> Vec<Target> {
    let pick = |key: &str, fallback: &str| {
        vars.get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    };

    vec![
        Target::new("api-gateway", "API Gateway", pick("API_GATEWAY_URL", "https://localhost:3000/api/health")),
        Target::new("analysis-engine", "Analysis Engine", pick("ANALYSIS_ENGINE_URL", "https://localhost:8000/health")),
        Target::new("mongodb", "MongoDB Atlas", pick("MONGO_PING_URL", "https://localhost:27017")),
        Target::new(
            "firebase",
            "Firebase Auth",
            pick(
                "FIREBASE_HEALTH_URL",
                "https://www.googleapis.com/identitytoolkit/v3/relyingparty/getProjectConfig",
            ),
        ),
        Target::new("shap", "SHAP Processing", pick("SHAP_URL", "https://localhost:8501/health")),
    ]
}

fn load_targets_file(path: PathBuf) -> Result<Vec<Target>, ConfigError> {
    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::TargetsFile {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::TargetsParse { path, source })
}

fn validate_targets(targets: &[Target]) -> Result<(), ConfigError> {
    if targets.is_empty() {
        return Err(ConfigError::NoTargets);
    }

    let mut seen = std::collections::HashSet::new();
    for t in targets {
        if !seen.insert(t.id.as_str()) {
            return Err(ConfigError::DuplicateTarget(t.id.clone()));
        }
        let valid = Url::parse(&t.url)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !valid {
            return Err(ConfigError::InvalidTargetUrl {
                id: t.id.clone(),
                url: t.url.clone(),
            });
        }
    }

    Ok(())
}

fn millis(value: Option<&str>, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match value {
        Some(v) => Ok(Duration::from_millis(parse_bounded(v, var, MAX_DURATION_MS)?)),
        None => Ok(Duration::from_millis(default)),
    }
}

fn parse_bounded(value: &str, var: &'static str, max: u64) -> Result<u64, ConfigError> {
    let n: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: value.to_string(),
    })?;
    if n == 0 {
        return Err(ConfigError::Zero(var));
    }
    if n > max {
        return Err(ConfigError::TooLarge { var, value: n, max });
    }
    Ok(n)
}

/// `<hostname>:<pid>:<6 random base36 chars>`
fn generate_owner_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let suffix: String = (0..6)
        .map(|_| ALPHABET[rand::random::<usize>() % ALPHABET.len()] as char)
        .collect();
    format!("{}:{}:{}", hostname(), std::process::id(), suffix)
}

fn hostname() -> String {
    env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let cfg = WorkerConfig::from_vars(&HashMap::new()).unwrap();
        assert_eq!(cfg.interval, Duration::from_secs(30));
        assert_eq!(cfg.lock_ttl, Duration::from_secs(60));
        assert_eq!(cfg.renew_interval, Duration::from_secs(30));
        assert_eq!(cfg.probe_timeout, Duration::from_secs(8));
        assert_eq!(cfg.metrics_port, 9500);
        assert!(cfg.db_path.is_none());
        assert!(cfg.push.is_none());
        assert!(!cfg.owner_overridden);
        assert_eq!(cfg.targets.len(), 5);
        assert_eq!(cfg.owner.split(':').count(), 3);
    }

    #[test]
    fn test_renew_defaults_to_half_ttl() {
        let cfg = WorkerConfig::from_vars(&vars(&[("STATUS_WORKER_LOCK_TTL_MS", "10000")])).unwrap();
        assert_eq!(cfg.renew_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_target_url_override() {
        let cfg = WorkerConfig::from_vars(&vars(&[("SHAP_URL", "http://shap.internal/health")])).unwrap();
        let shap = cfg.targets.iter().find(|t| t.id == "shap").unwrap();
        assert_eq!(shap.url, "http://shap.internal/health");
    }

    #[test]
    fn test_malformed_values_are_fatal() {
        assert!(matches!(
            WorkerConfig::from_vars(&vars(&[("STATUS_WORKER_INTERVAL_MS", "soon")])),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            WorkerConfig::from_vars(&vars(&[("STATUS_WORKER_LOCK_TTL_MS", "0")])),
            Err(ConfigError::Zero(_))
        ));
        assert!(matches!(
            WorkerConfig::from_vars(&vars(&[
                ("STATUS_WORKER_LOCK_TTL_MS", "1000"),
                ("STATUS_WORKER_RENEW_INTERVAL_MS", "1000"),
            ])),
            Err(ConfigError::RenewNotShorterThanTtl { .. })
        ));
        assert!(matches!(
            WorkerConfig::from_vars(&vars(&[("API_GATEWAY_URL", "not a url")])),
            Err(ConfigError::InvalidTargetUrl { .. })
        ));
    }

    #[test]
    fn test_oversized_values_are_fatal() {
        let huge = u64::MAX.to_string();
        assert!(matches!(
            WorkerConfig::from_vars(&vars(&[("STATUS_WORKER_LOCK_TTL_MS", &huge)])),
            Err(ConfigError::TooLarge { var: "STATUS_WORKER_LOCK_TTL_MS", .. })
        ));

        let just_over = (MAX_DURATION_MS + 1).to_string();
        assert!(matches!(
            WorkerConfig::from_vars(&vars(&[("STATUS_WORKER_INTERVAL_MS", &just_over)])),
            Err(ConfigError::TooLarge { .. })
        ));
        assert!(matches!(
            WorkerConfig::from_vars(&vars(&[("STATUS_WORKER_PROBE_CONCURRENCY", "100000")])),
            Err(ConfigError::TooLarge { .. })
        ));

        let max = MAX_DURATION_MS.to_string();
        let cfg = WorkerConfig::from_vars(&vars(&[("STATUS_WORKER_LOCK_TTL_MS", &max)])).unwrap();
        assert_eq!(cfg.lock_ttl, Duration::from_millis(MAX_DURATION_MS));
    }

    #[test]
    fn test_targets_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id":"a","name":"A","url":"http://a.test/"}},{{"id":"b","name":"B","url":"https://b.test/health"}}]"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let cfg = WorkerConfig::from_vars(&vars(&[("STATUS_WORKER_TARGETS_FILE", &path)])).unwrap();
        assert_eq!(cfg.targets.len(), 2);
        assert_eq!(cfg.targets[1].name, "B");
    }

    #[test]
    fn test_duplicate_and_empty_targets_rejected() {
        let mut dup = tempfile::NamedTempFile::new().unwrap();
        write!(
            dup,
            r#"[{{"id":"a","name":"A","url":"http://a.test/"}},{{"id":"a","name":"A2","url":"http://a2.test/"}}]"#
        )
        .unwrap();
        let path = dup.path().to_string_lossy().to_string();
        assert!(matches!(
            WorkerConfig::from_vars(&vars(&[("STATUS_WORKER_TARGETS_FILE", &path)])),
            Err(ConfigError::DuplicateTarget(id)) if id == "a"
        ));

        let mut empty = tempfile::NamedTempFile::new().unwrap();
        write!(empty, "[]").unwrap();
        let path = empty.path().to_string_lossy().to_string();
        assert!(matches!(
            WorkerConfig::from_vars(&vars(&[("STATUS_WORKER_TARGETS_FILE", &path)])),
            Err(ConfigError::NoTargets)
        ));
    }

    #[test]
    fn test_pushgateway_auth() {
        let cfg = WorkerConfig::from_vars(&vars(&[
            ("STATUS_WORKER_PUSHGATEWAY_URL", "http://push.test:9091"),
            ("STATUS_WORKER_PUSHGATEWAY_AUTH", "dXNlcjpwYXNz"),
        ]))
        .unwrap();
        let push = cfg.push.unwrap();
        assert_eq!(push.auth, Some(PushAuth::Header("Basic dXNlcjpwYXNz".to_string())));

        let cfg = WorkerConfig::from_vars(&vars(&[
            ("STATUS_WORKER_PUSHGATEWAY_URL", "http://push.test:9091"),
            ("STATUS_WORKER_PUSHGATEWAY_USER", "user"),
            ("STATUS_WORKER_PUSHGATEWAY_PASSWORD", "pass"),
        ]))
        .unwrap();
        assert!(matches!(cfg.push.unwrap().auth, Some(PushAuth::Basic { .. })));
    }

    #[test]
    fn test_owner_override() {
        let cfg = WorkerConfig::from_vars(&vars(&[("STATUS_WORKER_OWNER", "ci-runner")])).unwrap();
        assert_eq!(cfg.owner, "ci-runner");
        assert!(cfg.owner_overridden);
    }
}

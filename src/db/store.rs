//! SQLite shared store implementation.
//!
//! Several worker processes may open the same database file. Every
//! cross-process invariant (one snapshot row, one open incident per service,
//! one lease owner) is enforced by a single SQL statement or transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use super::models::*;

/// Key of the singleton status document.
pub const SNAPSHOT_KEY: &str = "singleton";

/// Key of the leader-election lock row.
pub const WORKER_LOCK_ID: &str = "status_worker";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Document error: {0}")]
    Document(#[from] serde_json::Error),
    #[error("Connection mutex poisoned")]
    Poisoned,
    #[error("Lease TTL {0:?} is out of range")]
    TtlOutOfRange(Duration),
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (creating if needed) the store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Open an existing store without write access.
    #[cfg(test)]
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Status & incidents ---

    /// Upsert the singleton snapshot and record an incident for every down
    /// service, all in one transaction.
    ///
    /// Open incidents are only ever created or bumped here, never resolved.
    pub fn persist(&self, snapshot: &StatusSnapshot, now: DateTime<Utc>) -> Result<PersistOutcome, DbError> {
        let document = serde_json::to_string(snapshot)?;
        let now_ms = now.timestamp_millis();

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO status_meta (id, document, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET document=excluded.document, updated_at=excluded.updated_at",
            params![SNAPSHOT_KEY, document, now_ms],
        )?;

        let mut outcome = PersistOutcome::default();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO incidents (id, title, description, service_id, severity, resolved, occurrences, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, 1, ?6, ?6)
                 ON CONFLICT(title, service_id) WHERE resolved = 0 DO UPDATE SET
                 occurrences = occurrences + 1, updated_at = excluded.updated_at
                 RETURNING occurrences",
            )?;

            for service in snapshot.services.iter().filter(|s| s.is_down()) {
                let occurrences: i64 = stmt.query_row(
                    params![
                        format!("inc-{}-{}", now_ms, service.id),
                        unreachable_title(&service.name),
                        format!("Health check failed for {} ({})", service.name, service.id),
                        service.id,
                        Severity::Major.as_str(),
                        now_ms,
                    ],
                    |row| row.get(0),
                )?;

                if occurrences == 1 {
                    outcome.incidents_opened += 1;
                } else {
                    outcome.incidents_updated += 1;
                }
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// Get the current snapshot, if one has been written.
    pub fn get_snapshot(&self) -> Result<Option<StatusSnapshot>, DbError> {
        let conn = self.conn()?;
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM status_meta WHERE id = ?1",
                params![SNAPSHOT_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match document {
            Some(d) => Ok(Some(serde_json::from_str(&d)?)),
            None => Ok(None),
        }
    }

    /// Stamp the snapshot and each of its services as checked at `now`.
    ///
    /// Returns false when there is no snapshot.
    pub fn touch_snapshot(&self, now: DateTime<Utc>) -> Result<bool, DbError> {
        let Some(mut snapshot) = self.get_snapshot()? else {
            return Ok(false);
        };

        snapshot.last_checked = now;
        for service in &mut snapshot.services {
            service.last_checked = now;
        }

        let conn = self.conn()?;
        conn.execute(
            "UPDATE status_meta SET document = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(&snapshot)?, now.timestamp_millis(), SNAPSHOT_KEY],
        )?;
        Ok(true)
    }

    /// List incidents, newest first, optionally filtered by resolution.
    pub fn list_incidents(&self, resolved: Option<bool>, limit: i64) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, description, service_id, severity, resolved, occurrences, created_at, updated_at
             FROM incidents
             WHERE ?1 IS NULL OR resolved = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;

        let incidents = stmt
            .query_map(params![resolved, limit], |row| {
                let severity: String = row.get(4)?;
                Ok(Incident {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    services: vec![row.get(3)?],
                    severity: Severity::parse(&severity).unwrap_or(Severity::Major),
                    resolved: row.get(5)?,
                    occurrences: row.get(6)?,
                    created_at: timestamp_at(row, 7)?,
                    updated_at: timestamp_at(row, 8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(incidents)
    }

    /// Mark an incident resolved. Returns false if no open incident has this id.
    pub fn resolve_incident(&self, id: &str, now: DateTime<Utc>) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE incidents SET resolved = 1, updated_at = ?1 WHERE id = ?2 AND resolved = 0",
            params![now.timestamp_millis(), id],
        )?;
        Ok(changed > 0)
    }

    // --- Worker lock ---

    /// Claim the lock if it is absent, expired, or already ours.
    ///
    /// A single conditional upsert: when another owner holds an unexpired
    /// lease the update is skipped and no row is returned.
    pub fn try_acquire_lock(
        &self,
        lock_id: &str,
        owner: &str,
        pid: u32,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let now_ms = now.timestamp_millis();
        let expires_ms = expiry_millis(now_ms, ttl)?;

        let conn = self.conn()?;
        let holder: Option<String> = conn
            .query_row(
                "INSERT INTO worker_locks (id, owner, pid, expires_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                 owner = excluded.owner, pid = excluded.pid,
                 expires_at = excluded.expires_at, updated_at = excluded.updated_at
                 WHERE worker_locks.expires_at < ?5 OR worker_locks.owner = excluded.owner
                 RETURNING owner",
                params![lock_id, owner, pid, expires_ms, now_ms],
                |row| row.get(0),
            )
            .optional()?;

        Ok(holder.as_deref() == Some(owner))
    }

    /// Extend the lease if `owner` still holds it.
    ///
    /// `expires_at` strictly increases on every successful renewal.
    pub fn renew_lock(
        &self,
        lock_id: &str,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let now_ms = now.timestamp_millis();
        let expires_ms = expiry_millis(now_ms, ttl)?;

        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE worker_locks SET expires_at = MAX(?1, expires_at + 1), updated_at = ?2
             WHERE id = ?3 AND owner = ?4",
            params![expires_ms, now_ms, lock_id, owner],
        )?;
        Ok(changed > 0)
    }

    /// Delete the lock if `owner` holds it.
    pub fn release_lock(&self, lock_id: &str, owner: &str) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "DELETE FROM worker_locks WHERE id = ?1 AND owner = ?2",
            params![lock_id, owner],
        )?;
        Ok(changed > 0)
    }

    /// Delete the lock regardless of owner. Operator recovery only.
    pub fn force_release_lock(&self, lock_id: &str) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM worker_locks WHERE id = ?1", params![lock_id])?;
        Ok(changed > 0)
    }

    pub fn get_lock(&self, lock_id: &str) -> Result<Option<WorkerLock>, DbError> {
        let conn = self.conn()?;
        let lock = conn
            .query_row(
                "SELECT id, owner, pid, expires_at, created_at, updated_at FROM worker_locks WHERE id = ?1",
                params![lock_id],
                |row| {
                    Ok(WorkerLock {
                        id: row.get(0)?,
                        owner: row.get(1)?,
                        pid: row.get(2)?,
                        expires_at: timestamp_at(row, 3)?,
                        created_at: timestamp_at(row, 4)?,
                        updated_at: timestamp_at(row, 5)?,
                    })
                },
            )
            .optional()?;
        Ok(lock)
    }

    // --- Inspection ---

    pub fn counts(&self) -> Result<StoreCounts, DbError> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<i64, rusqlite::Error> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
        };
        Ok(StoreCounts {
            status_meta: count("status_meta")?,
            incidents: count("incidents")?,
            worker_locks: count("worker_locks")?,
        })
    }
}

/// `now_ms + ttl`, or an error if it would leave the representable range.
fn expiry_millis(now_ms: i64, ttl: Duration) -> Result<i64, DbError> {
    i64::try_from(ttl.as_millis())
        .ok()
        .and_then(|ttl_ms| now_ms.checked_add(ttl_ms))
        .filter(|ms| DateTime::from_timestamp_millis(*ms).is_some())
        .ok_or(DbError::TtlOutOfRange(ttl))
}

/// Read a Unix-millisecond column; out-of-range values are a row error.
fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

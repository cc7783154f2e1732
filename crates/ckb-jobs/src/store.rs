// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job persistence.
//!
//! Terminal states are sticky at the SQL level: transitions guard on the
//! current status, so a completed row can never regress and a cancelled
//! row can never complete.

use crate::types::{Job, JobStatus};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;

/// Errors from the job store.
#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    /// The underlying database failed.
    #[error("job store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored blob could not be decoded.
    #[error("corrupt job row: {0}")]
    Corrupt(String),
}

/// Convenience alias.
pub type JobStoreResult<T> = Result<T, JobStoreError>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id           TEXT PRIMARY KEY,
    job_type     TEXT NOT NULL,
    scope        TEXT NOT NULL,
    status       TEXT NOT NULL,
    progress     INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,
    started_at   TEXT,
    completed_at TEXT,
    error        TEXT,
    result       TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at);
"#;

/// SQLite-backed job store.
#[derive(Debug)]
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> JobStoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory store, mainly for tests.
    pub fn open_in_memory() -> JobStoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> JobStoreResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Persist a fresh queued job.
    pub fn insert(&self, job: &Job) -> JobStoreResult<()> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        conn.execute(
            "INSERT INTO jobs (id, job_type, scope, status, progress, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job.id,
                job.job_type,
                job.scope.to_string(),
                job.status.as_str(),
                job.progress,
                job.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Transition `queued → running`. Returns `false` when the job is not
    /// queued (already claimed, cancelled, or unknown).
    pub fn claim_running(&self, id: &str) -> JobStoreResult<bool> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        let changed = conn.execute(
            "UPDATE jobs SET status = 'running', started_at = ?2
             WHERE id = ?1 AND status = 'queued'",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    /// Transition `running → completed` with the serialized result.
    pub fn mark_completed(&self, id: &str, result: &serde_json::Value) -> JobStoreResult<bool> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        let changed = conn.execute(
            "UPDATE jobs SET status = 'completed', progress = 100,
                             completed_at = ?2, result = ?3
             WHERE id = ?1 AND status = 'running'",
            params![id, Utc::now().to_rfc3339(), result.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Transition `running → failed` with the error message.
    pub fn mark_failed(&self, id: &str, error: &str) -> JobStoreResult<bool> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        let changed = conn.execute(
            "UPDATE jobs SET status = 'failed', completed_at = ?2, error = ?3
             WHERE id = ?1 AND status = 'running'",
            params![id, Utc::now().to_rfc3339(), error],
        )?;
        Ok(changed > 0)
    }

    /// Transition `queued|running → cancelled`.
    pub fn mark_cancelled(&self, id: &str) -> JobStoreResult<bool> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        let changed = conn.execute(
            "UPDATE jobs SET status = 'cancelled', completed_at = ?2
             WHERE id = ?1 AND status IN ('queued', 'running')",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    /// Best-effort progress write-through.
    pub fn set_progress(&self, id: &str, progress: u8) -> JobStoreResult<()> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        conn.execute(
            "UPDATE jobs SET progress = ?2 WHERE id = ?1 AND status = 'running'",
            params![id, progress.min(100)],
        )?;
        Ok(())
    }

    /// Fetch one job.
    pub fn get(&self, id: &str) -> JobStoreResult<Option<Job>> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, job_type, scope, status, progress, created_at,
                    started_at, completed_at, error, result
             FROM jobs WHERE id = ?1",
        )?;
        stmt.query_row(params![id], job_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// List jobs, optionally filtered by status, in `created_at` order.
    pub fn list(&self, status: Option<JobStatus>, limit: usize) -> JobStoreResult<Vec<Job>> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        let mut out = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT id, job_type, scope, status, progress, created_at,
                            started_at, completed_at, error, result
                     FROM jobs WHERE status = ?1
                     ORDER BY created_at ASC, id ASC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![status.as_str(), limit as i64], job_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, job_type, scope, status, progress, created_at,
                            started_at, completed_at, error, result
                     FROM jobs ORDER BY created_at ASC, id ASC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit as i64], job_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Queued jobs in submission order, for the recovery scan.
    pub fn queued(&self, limit: usize) -> JobStoreResult<Vec<Job>> {
        self.list(Some(JobStatus::Queued), limit)
    }

    /// Remove terminal rows older than `cutoff`. Returns how many went.
    pub fn prune_terminal(&self, cutoff: DateTime<Utc>) -> JobStoreResult<usize> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        let removed = conn.execute(
            "DELETE FROM jobs
             WHERE status IN ('completed', 'failed', 'cancelled')
               AND completed_at IS NOT NULL AND completed_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(removed)
    }
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let scope: String = row.get(2)?;
    let status: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    let result: Option<String> = row.get(9)?;
    Ok(Job {
        id: row.get(0)?,
        job_type: row.get(1)?,
        scope: serde_json::from_str(&scope).unwrap_or(serde_json::Value::Null),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
        progress: row.get::<_, i64>(4)? as u8,
        created_at: parse_ts(&created_at),
        started_at: row.get::<_, Option<String>>(6)?.map(|s| parse_ts(&s)),
        completed_at: row.get::<_, Option<String>>(7)?.map(|s| parse_ts(&s)),
        error: row.get(8)?,
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

//! Process-wide SQLite connection pool
//!
//! Shared by the durable queue and the run history. WAL journal mode, busy
//! timeout of five seconds, schema created at connect time. When every
//! connection is taken, acquiring waits until one frees or the configured
//! acquire timeout elapses.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS jobs (
        seq              INTEGER PRIMARY KEY AUTOINCREMENT,
        id               TEXT NOT NULL UNIQUE,
        queue            TEXT NOT NULL,
        name             TEXT NOT NULL,
        payload          TEXT NOT NULL,
        options          TEXT NOT NULL,
        priority         INTEGER NOT NULL,
        state            TEXT NOT NULL,
        attempts_made    INTEGER NOT NULL DEFAULT 0,
        run_at           INTEGER NOT NULL,
        created_at       INTEGER NOT NULL,
        finished_at      INTEGER,
        last_error       TEXT,
        summary          TEXT,
        repeat_count     INTEGER NOT NULL DEFAULT 0,
        cancel_requested INTEGER NOT NULL DEFAULT 0
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_ready ON jobs (queue, state, priority, run_at, seq)",
    r#"CREATE TABLE IF NOT EXISTS runs (
        run_id      TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        job_id      TEXT,
        attempt     INTEGER NOT NULL,
        status      TEXT NOT NULL,
        failed_step TEXT,
        error_kind  TEXT,
        started_at  INTEGER NOT NULL,
        ended_at    INTEGER NOT NULL,
        result      TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_runs_workflow ON runs (workflow_id, started_at)",
];

/// Connection pool usage at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub max_connections: u32,
    pub open: u32,
    pub idle: u32,
    pub in_use: u32,
    pub utilization_percent: f64,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    max_connections: u32,
}

impl Database {
    /// Open (creating if needed) the database at `path`
    pub async fn connect(
        path: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StorageError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let max_connections = max_connections.max(1);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        tracing::debug!(path, max_connections, "Database ready");
        Ok(Self {
            pool,
            max_connections,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn stats(&self) -> PoolStats {
        let open = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        let in_use = open.saturating_sub(idle);
        PoolStats {
            max_connections: self.max_connections,
            open,
            idle,
            in_use,
            utilization_percent: in_use as f64 * 100.0 / self.max_connections as f64,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Whether a sqlx error means the pool had no connection to hand out
pub(crate) fn is_pool_exhausted(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::PoolTimedOut)
}

pub(crate) fn to_millis(at: &chrono::DateTime<chrono::Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

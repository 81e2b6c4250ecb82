//! SQLite run history

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::pool::{from_millis, to_millis, Database};
use crate::engine::{ErrorKind, HistoryError, RunHistory, RunRecord, RunStatus};

fn storage_error(error: sqlx::Error) -> HistoryError {
    HistoryError::Storage(error.to_string())
}

struct RunRow {
    run_id: String,
    workflow_id: String,
    fingerprint: String,
    job_id: Option<String>,
    attempt: i64,
    status: String,
    failed_step: Option<String>,
    error_kind: Option<String>,
    started_at: i64,
    ended_at: i64,
    result: String,
}

impl RunRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_id: row.try_get("run_id")?,
            workflow_id: row.try_get("workflow_id")?,
            fingerprint: row.try_get("fingerprint")?,
            job_id: row.try_get("job_id")?,
            attempt: row.try_get("attempt")?,
            status: row.try_get("status")?,
            failed_step: row.try_get("failed_step")?,
            error_kind: row.try_get("error_kind")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            result: row.try_get("result")?,
        })
    }

    fn into_record(self) -> Result<RunRecord, HistoryError> {
        let status = RunStatus::parse(&self.status)
            .ok_or_else(|| HistoryError::Storage(format!("invalid run status '{}'", self.status)))?;
        let error_kind = match self.error_kind.as_deref() {
            Some(kind) => Some(
                ErrorKind::parse(kind)
                    .ok_or_else(|| HistoryError::Storage(format!("invalid error kind '{kind}'")))?,
            ),
            None => None,
        };

        Ok(RunRecord {
            run_id: self.run_id,
            workflow_id: self.workflow_id,
            fingerprint: self.fingerprint,
            job_id: self.job_id,
            attempt: self.attempt as u32,
            status,
            failed_step: self.failed_step,
            error_kind,
            started_at: from_millis(self.started_at),
            ended_at: from_millis(self.ended_at),
            result: serde_json::from_str(&self.result)?,
        })
    }
}

fn decode(row: &SqliteRow) -> Result<RunRecord, HistoryError> {
    RunRow::from_row(row).map_err(storage_error)?.into_record()
}

pub struct SqliteRunHistory {
    db: Database,
}

impl SqliteRunHistory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RunHistory for SqliteRunHistory {
    async fn record(&self, record: RunRecord) -> Result<(), HistoryError> {
        let result = sqlx::query(
            r#"INSERT INTO runs (run_id, workflow_id, fingerprint, job_id, attempt, status,
                                 failed_step, error_kind, started_at, ended_at, result)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.run_id)
        .bind(&record.workflow_id)
        .bind(&record.fingerprint)
        .bind(&record.job_id)
        .bind(record.attempt as i64)
        .bind(record.status.as_str())
        .bind(&record.failed_step)
        .bind(record.error_kind.map(|k| k.as_str()))
        .bind(to_millis(&record.started_at))
        .bind(to_millis(&record.ended_at))
        .bind(serde_json::to_string(&record.result)?)
        .execute(self.db.pool())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(HistoryError::Duplicate(record.run_id))
            }
            Err(e) => Err(storage_error(e)),
        }
    }

    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>, HistoryError> {
        let row = sqlx::query("SELECT * FROM runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(storage_error)?;
        row.as_ref().map(decode).transpose()
    }

    async fn list(&self, workflow_id: &str, limit: usize) -> Result<Vec<RunRecord>, HistoryError> {
        let rows = sqlx::query(
            "SELECT * FROM runs WHERE workflow_id = ? ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(workflow_id)
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .map_err(storage_error)?;

        rows.iter().map(decode).collect()
    }
}

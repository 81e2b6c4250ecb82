//! SQLite queue backend
//!
//! Jobs live in the `jobs` table; options, payload and summary are JSON
//! columns. Claiming is one `UPDATE .. RETURNING` statement, so two workers
//! sharing the database never claim the same job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::pool::{from_millis, is_pool_exhausted, to_millis, Database};
use crate::queue::{JobRecord, JobState, JobSummary, NewJob, QueueBackend, QueueCounts, QueueError};

const COLUMNS: &str = "id, queue, name, payload, options, state, attempts_made, run_at, \
                       created_at, finished_at, last_error, summary, repeat_count, cancel_requested";

fn storage_error(error: sqlx::Error) -> QueueError {
    if is_pool_exhausted(&error) {
        QueueError::ResourceExhausted("database connection pool exhausted".to_string())
    } else {
        QueueError::Storage(error.to_string())
    }
}

struct JobRow {
    id: String,
    queue: String,
    name: String,
    payload: String,
    options: String,
    state: String,
    attempts_made: i64,
    run_at: i64,
    created_at: i64,
    finished_at: Option<i64>,
    last_error: Option<String>,
    summary: Option<String>,
    repeat_count: i64,
    cancel_requested: i64,
}

impl JobRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            queue: row.try_get("queue")?,
            name: row.try_get("name")?,
            payload: row.try_get("payload")?,
            options: row.try_get("options")?,
            state: row.try_get("state")?,
            attempts_made: row.try_get("attempts_made")?,
            run_at: row.try_get("run_at")?,
            created_at: row.try_get("created_at")?,
            finished_at: row.try_get("finished_at")?,
            last_error: row.try_get("last_error")?,
            summary: row.try_get("summary")?,
            repeat_count: row.try_get("repeat_count")?,
            cancel_requested: row.try_get("cancel_requested")?,
        })
    }

    fn into_record(self) -> Result<JobRecord, QueueError> {
        let id = self
            .id
            .parse::<Uuid>()
            .map_err(|e| QueueError::Storage(format!("invalid job id '{}': {e}", self.id)))?;
        let state = JobState::parse(&self.state)
            .ok_or_else(|| QueueError::Storage(format!("invalid job state '{}'", self.state)))?;
        let summary = self
            .summary
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(JobRecord {
            id,
            queue: self.queue,
            name: self.name,
            payload: serde_json::from_str(&self.payload)?,
            options: serde_json::from_str(&self.options)?,
            state,
            attempts_made: self.attempts_made as u32,
            run_at: from_millis(self.run_at),
            created_at: from_millis(self.created_at),
            finished_at: self.finished_at.map(from_millis),
            last_error: self.last_error,
            summary,
            repeat_count: self.repeat_count as u32,
            cancel_requested: self.cancel_requested != 0,
        })
    }
}

fn decode(row: &SqliteRow) -> Result<JobRecord, QueueError> {
    JobRow::from_row(row).map_err(storage_error)?.into_record()
}

pub struct SqliteQueue {
    db: Database,
}

impl SqliteQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await
            .map_err(storage_error)?;
        row.as_ref().map(decode).transpose()
    }

    /// Error for an update that matched no active job
    async fn not_active(&self, id: Uuid) -> QueueError {
        match self.fetch(id).await {
            Ok(Some(job)) if job.state == JobState::Active && job.cancel_requested => {
                QueueError::CancelRequested(id)
            }
            Ok(Some(job)) => QueueError::InvalidState {
                id,
                state: job.state,
                expected: JobState::Active,
            },
            Ok(None) => QueueError::NotFound(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl QueueBackend for SqliteQueue {
    async fn push(&self, job: NewJob, now: DateTime<Utc>) -> Result<JobRecord, QueueError> {
        let record = JobRecord::from_new(job, now);

        sqlx::query(
            r#"INSERT INTO jobs (id, queue, name, payload, options, priority, state,
                                 attempts_made, run_at, created_at, repeat_count)
               VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(&record.queue)
        .bind(&record.name)
        .bind(serde_json::to_string(&record.payload)?)
        .bind(serde_json::to_string(&record.options)?)
        .bind(record.options.priority)
        .bind(record.state.as_str())
        .bind(to_millis(&record.run_at))
        .bind(to_millis(&record.created_at))
        .bind(record.repeat_count as i64)
        .execute(self.db.pool())
        .await
        .map_err(storage_error)?;

        Ok(record)
    }

    async fn claim(&self, queue: &str, now: DateTime<Utc>) -> Result<Option<JobRecord>, QueueError> {
        let row = sqlx::query(&format!(
            r#"UPDATE jobs SET state = 'active', attempts_made = attempts_made + 1
               WHERE id = (
                   SELECT id FROM jobs
                   WHERE queue = ? AND state = 'waiting' AND run_at <= ?
                   ORDER BY priority, run_at, seq
                   LIMIT 1
               )
               RETURNING {COLUMNS}"#
        ))
        .bind(queue)
        .bind(to_millis(&now))
        .fetch_optional(self.db.pool())
        .await
        .map_err(storage_error)?;

        row.as_ref().map(decode).transpose()
    }

    async fn complete(
        &self,
        id: Uuid,
        summary: JobSummary,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, QueueError> {
        let row = sqlx::query(&format!(
            r#"UPDATE jobs SET state = 'completed', finished_at = ?, summary = ?, last_error = NULL
               WHERE id = ? AND state = 'active'
               RETURNING {COLUMNS}"#
        ))
        .bind(to_millis(&now))
        .bind(serde_json::to_string(&summary)?)
        .bind(id.to_string())
        .fetch_optional(self.db.pool())
        .await
        .map_err(storage_error)?;

        match row {
            Some(row) => decode(&row),
            None => Err(self.not_active(id).await),
        }
    }

    async fn fail(
        &self,
        id: Uuid,
        error: &str,
        summary: Option<JobSummary>,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, QueueError> {
        let summary = summary.as_ref().map(serde_json::to_string).transpose()?;
        let row = sqlx::query(&format!(
            r#"UPDATE jobs SET state = 'failed', finished_at = ?, last_error = ?,
                               summary = COALESCE(?, summary)
               WHERE id = ? AND state = 'active'
               RETURNING {COLUMNS}"#
        ))
        .bind(to_millis(&now))
        .bind(error)
        .bind(summary)
        .bind(id.to_string())
        .fetch_optional(self.db.pool())
        .await
        .map_err(storage_error)?;

        match row {
            Some(row) => decode(&row),
            None => Err(self.not_active(id).await),
        }
    }

    async fn retry(&self, id: Uuid, error: &str, run_at: DateTime<Utc>) -> Result<JobRecord, QueueError> {
        let row = sqlx::query(&format!(
            r#"UPDATE jobs SET state = 'waiting', run_at = ?, last_error = ?
               WHERE id = ? AND state = 'active' AND cancel_requested = 0
               RETURNING {COLUMNS}"#
        ))
        .bind(to_millis(&run_at))
        .bind(error)
        .bind(id.to_string())
        .fetch_optional(self.db.pool())
        .await
        .map_err(storage_error)?;

        match row {
            Some(row) => decode(&row),
            None => Err(self.not_active(id).await),
        }
    }

    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<JobState>, QueueError> {
        let mut tx = self.db.pool().begin().await.map_err(storage_error)?;

        let state: Option<(String,)> = sqlx::query_as("SELECT state FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_error)?;
        let Some((state,)) = state else {
            return Ok(None);
        };
        let previous = JobState::parse(&state)
            .ok_or_else(|| QueueError::Storage(format!("invalid job state '{state}'")))?;

        match previous {
            JobState::Waiting => {
                sqlx::query(
                    "UPDATE jobs SET state = 'failed', finished_at = ?, last_error = 'cancelled' WHERE id = ?",
                )
                .bind(to_millis(&now))
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
            }
            JobState::Active => {
                sqlx::query("UPDATE jobs SET cancel_requested = 1 WHERE id = ?")
                    .bind(id.to_string())
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_error)?;
            }
            JobState::Completed | JobState::Failed => {}
        }

        tx.commit().await.map_err(storage_error)?;
        Ok(Some(previous))
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError> {
        self.fetch(id).await
    }

    async fn counts(&self, queue: &str, now: DateTime<Utc>) -> Result<QueueCounts, QueueError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT CASE WHEN state = 'waiting' AND run_at > ? THEN 'delayed' ELSE state END AS bucket,
                      COUNT(*)
               FROM jobs WHERE queue = ?
               GROUP BY bucket"#,
        )
        .bind(to_millis(&now))
        .bind(queue)
        .fetch_all(self.db.pool())
        .await
        .map_err(storage_error)?;

        let mut counts = QueueCounts::default();
        for (bucket, n) in rows {
            let n = n as usize;
            match bucket.as_str() {
                "waiting" => counts.waiting = n,
                "delayed" => counts.delayed = n,
                "active" => counts.active = n,
                "completed" => counts.completed = n,
                "failed" => counts.failed = n,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn settled(&self, queue: &str) -> Result<Vec<JobRecord>, QueueError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM jobs WHERE queue = ? AND state IN ('completed', 'failed')"
        ))
        .bind(queue)
        .fetch_all(self.db.pool())
        .await
        .map_err(storage_error)?;

        rows.iter().map(decode).collect()
    }

    async fn remove(&self, ids: &[Uuid]) -> Result<usize, QueueError> {
        let mut tx = self.db.pool().begin().await.map_err(storage_error)?;
        let mut removed = 0;
        for id in ids {
            let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
            removed += result.rows_affected() as usize;
        }
        tx.commit().await.map_err(storage_error)?;
        Ok(removed)
    }

    async fn next_run_at(&self, queue: &str) -> Result<Option<DateTime<Utc>>, QueueError> {
        let next: (Option<i64>,) =
            sqlx::query_as("SELECT MIN(run_at) FROM jobs WHERE queue = ? AND state = 'waiting'")
                .bind(queue)
                .fetch_one(self.db.pool())
                .await
                .map_err(storage_error)?;
        Ok(next.0.map(from_millis))
    }
}

//! Run history
//!
//! One record per settled run, written once and never updated. Holds the
//! status, the first failing step and its error kind; full diagnostics go to
//! the logs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use super::error::ErrorKind;
use super::result::{RunResult, RunStatus};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("run '{0}' is already recorded")]
    Duplicate(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: String,
    pub workflow_id: String,
    /// Fingerprint of the definition revision that ran
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub attempt: u32,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Full serialized [`RunResult`]
    pub result: Value,
}

impl RunRecord {
    pub fn from_result(
        result: &RunResult,
        fingerprint: impl Into<String>,
        job_id: Option<String>,
        attempt: u32,
    ) -> Result<Self, HistoryError> {
        Ok(Self {
            run_id: result.run_id.clone(),
            workflow_id: result.workflow_id.clone(),
            fingerprint: fingerprint.into(),
            job_id,
            attempt,
            status: result.status,
            failed_step: result.primary_failure.as_ref().map(|f| f.step_id.clone()),
            error_kind: result.primary_failure.as_ref().map(|f| f.kind),
            started_at: result.started_at,
            ended_at: result.ended_at,
            result: serde_json::to_value(result)?,
        })
    }
}

#[async_trait]
pub trait RunHistory: Send + Sync {
    async fn record(&self, record: RunRecord) -> Result<(), HistoryError>;

    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>, HistoryError>;

    /// Most recent first
    async fn list(&self, workflow_id: &str, limit: usize) -> Result<Vec<RunRecord>, HistoryError>;
}

#[derive(Default)]
pub struct MemoryRunHistory {
    records: RwLock<HashMap<String, RunRecord>>,
}

impl MemoryRunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl RunHistory for MemoryRunHistory {
    async fn record(&self, record: RunRecord) -> Result<(), HistoryError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.run_id) {
            return Err(HistoryError::Duplicate(record.run_id));
        }
        records.insert(record.run_id.clone(), record);
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>, HistoryError> {
        Ok(self.records.read().await.get(run_id).cloned())
    }

    async fn list(&self, workflow_id: &str, limit: usize) -> Result<Vec<RunRecord>, HistoryError> {
        let mut runs: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}

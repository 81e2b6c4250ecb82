//! Progress stream
//!
//! The scheduler publishes one event per step transition on an async
//! channel. Sending never blocks a run: when the receiver is gone or the
//! channel is full the event is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use super::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Resolving,
    Invoking,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub run_id: String,
    pub step_id: String,
    pub status: ProgressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ProgressEvent {
    pub fn new(run_id: &str, step_id: &str, status: ProgressStatus) -> Self {
        Self {
            run_id: run_id.to_string(),
            step_id: step_id.to_string(),
            status,
            started_at: None,
            ended_at: None,
            output: None,
            error: None,
            error_kind: None,
        }
    }
}

/// Sending half of the progress stream; a default sink discards events
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sender: Option<async_channel::Sender<ProgressEvent>>,
}

impl ProgressSink {
    /// Bounded channel; events beyond `capacity` unread are dropped
    pub fn channel(capacity: usize) -> (Self, async_channel::Receiver<ProgressEvent>) {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        (Self { sender: Some(tx) }, rx)
    }

    pub fn unbounded() -> (Self, async_channel::Receiver<ProgressEvent>) {
        let (tx, rx) = async_channel::unbounded();
        (Self { sender: Some(tx) }, rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            if let Err(e) = sender.try_send(event) {
                trace!(step_id = %e.into_inner().step_id, "Progress event dropped");
            }
        }
    }
}

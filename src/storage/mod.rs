//! Durable storage
//!
//! - `pool` - Process-wide SQLite connection pool and schema
//! - `queue` - SQLite queue backend
//! - `history` - SQLite run history

pub mod history;
pub mod pool;
pub mod queue;

use std::sync::Arc;
use std::time::Duration;

pub use history::SqliteRunHistory;
pub use pool::{Database, PoolStats, StorageError};
pub use queue::SqliteQueue;

use crate::config::DatabaseConfig;
use crate::engine::{MemoryRunHistory, RunHistory};
use crate::queue::{MemoryQueue, QueueBackend};

/// Queue backend and run history built from one database section
pub struct Backends {
    pub queue: Arc<dyn QueueBackend>,
    pub history: Arc<dyn RunHistory>,
    /// Present for SQLite; both backends share its pool
    pub database: Option<Database>,
}

impl Backends {
    pub async fn open(config: &DatabaseConfig) -> Result<Self, StorageError> {
        match config {
            DatabaseConfig::Memory => Ok(Self {
                queue: Arc::new(MemoryQueue::new()),
                history: Arc::new(MemoryRunHistory::new()),
                database: None,
            }),
            DatabaseConfig::Sqlite {
                path,
                max_connections,
                acquire_timeout_ms,
            } => {
                let db = Database::connect(
                    path,
                    *max_connections,
                    Duration::from_millis(*acquire_timeout_ms),
                )
                .await?;
                Ok(Self {
                    queue: Arc::new(SqliteQueue::new(db.clone())),
                    history: Arc::new(SqliteRunHistory::new(db.clone())),
                    database: Some(db),
                })
            }
        }
    }
}

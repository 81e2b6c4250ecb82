//! Engine configuration
//!
//! Loaded from `stepflow.yaml`. Every section and field has a default, so an
//! empty file (or no file) gives a working in-memory setup:
//!
//! ```yaml
//! workers:
//!   concurrency: 8
//!   poll_interval_ms: 250
//!
//! queue:
//!   name: workflows
//!   max_waiting: 10000
//!   default_options:
//!     attempts: 3
//!     backoff: { type: exponential, delay: 1000 }
//!     removeOnComplete: 100
//!     removeOnFail: { age: 86400 }
//!
//! database:
//!   type: sqlite
//!   path: .stepflow/stepflow.db
//!   max_connections: 5
//!
//! resilience:
//!   defaults:
//!     max_concurrent: 4
//!     timeout_ms: 10000
//!   integrations:
//!     http:
//!       min_spacing_ms: 200
//!       error_threshold_percent: 25
//!
//! sandbox:
//!   timeout_ms: 2000
//!   max_memory_bytes: 8388608
//!   script_dir: scripts
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::resilience::ResilienceConfig;
use crate::engine::sandbox::SandboxConfig;
use crate::queue::JobOptions;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error in {file}: {error}")]
    Yaml {
        file: String,
        error: serde_yaml::Error,
    },
}

/// Database used by the durable queue and run history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DatabaseConfig {
    #[default]
    Memory,
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        #[serde(default = "default_acquire_timeout_ms")]
        acquire_timeout_ms: u64,
    },
}

fn default_sqlite_path() -> String {
    ".stepflow/stepflow.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Jobs a single worker process runs at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How often expired job records are pruned
    #[serde(default = "default_prune_interval_ms")]
    pub prune_interval_ms: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_prune_interval_ms() -> u64 {
    60_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            prune_interval_ms: default_prune_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// Enqueue fails with `QueueError::Full` beyond this many waiting jobs
    #[serde(default)]
    pub max_waiting: Option<usize>,

    /// Options applied to jobs enqueued without explicit options
    #[serde(default)]
    pub default_options: JobOptions,
}

fn default_queue_name() -> String {
    "workflows".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            max_waiting: None,
            default_options: JobOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub resilience: ResilienceConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|error| ConfigError::Yaml {
            file: path.display().to_string(),
            error,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Load `path` if given, otherwise `stepflow.yaml` in the working
    /// directory when present, otherwise defaults
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        for name in crate::workflow::loader::CONFIG_FILE_NAMES {
            let candidate = Path::new(name);
            if candidate.is_file() {
                return Self::load(candidate);
            }
        }
        Ok(Self::default())
    }
}

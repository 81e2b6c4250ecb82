//! Workflow definition lookup for queued jobs
//!
//! Jobs carry only a workflow id; the definition is looked up when the job
//! runs, so edits to a definition apply to the next attempt.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::loader::{LoadError, WorkflowLoader};
use super::WorkflowDefinition;

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<WorkflowDefinition>, LoadError>;

    async fn list(&self) -> Result<Vec<WorkflowDefinition>, LoadError>;
}

/// Definitions held in memory
#[derive(Default)]
pub struct MemoryWorkflowStore {
    workflows: RwLock<HashMap<String, WorkflowDefinition>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, workflow: WorkflowDefinition) {
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow);
    }
}

impl FromIterator<WorkflowDefinition> for MemoryWorkflowStore {
    fn from_iter<I: IntoIterator<Item = WorkflowDefinition>>(iter: I) -> Self {
        Self {
            workflows: RwLock::new(iter.into_iter().map(|w| (w.id.clone(), w)).collect()),
        }
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn get(&self, id: &str) -> Result<Option<WorkflowDefinition>, LoadError> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<WorkflowDefinition>, LoadError> {
        let mut all: Vec<_> = self.workflows.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }
}

/// Definitions read from a directory on every lookup
pub struct DirectoryWorkflowStore {
    dir: PathBuf,
}

impl DirectoryWorkflowStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn load_all(&self) -> Result<Vec<WorkflowDefinition>, LoadError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || WorkflowLoader::load_directory(&dir))
            .await
            .map_err(|e| LoadError::Io(std::io::Error::other(e)))?
    }
}

#[async_trait]
impl WorkflowStore for DirectoryWorkflowStore {
    async fn get(&self, id: &str) -> Result<Option<WorkflowDefinition>, LoadError> {
        Ok(self.load_all().await?.into_iter().find(|w| w.id == id))
    }

    async fn list(&self) -> Result<Vec<WorkflowDefinition>, LoadError> {
        self.load_all().await
    }
}

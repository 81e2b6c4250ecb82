//! Workflow directory loader
//!
//! Load workflow definitions from JSON or YAML files.

use std::path::Path;

use super::WorkflowDefinition;

/// Engine configuration file name, skipped when scanning a directory
pub const CONFIG_FILE_NAMES: &[&str] = &["stepflow.yaml", "stepflow.yml"];

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error in {file}: {error}")]
    Yaml {
        file: String,
        error: serde_yaml::Error,
    },

    #[error("JSON parse error in {file}: {error}")]
    Json {
        file: String,
        error: serde_json::Error,
    },

    #[error("unsupported workflow file '{0}' (expected .json, .yaml or .yml)")]
    UnsupportedExtension(String),
}

pub struct WorkflowLoader;

impl WorkflowLoader {
    pub fn load_directory(dir: &Path) -> Result<Vec<WorkflowDefinition>, LoadError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && Self::is_workflow_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|p| Self::load_file(p)).collect()
    }

    pub fn load_file(path: &Path) -> Result<WorkflowDefinition, LoadError> {
        let content = std::fs::read_to_string(path)?;
        let file = path.display().to_string();

        match extension(path) {
            Some("json") => Self::from_json(&content).map_err(|error| LoadError::Json { file, error }),
            Some("yaml" | "yml") => {
                serde_yaml::from_str(&content).map_err(|error| LoadError::Yaml { file, error })
            }
            _ => Err(LoadError::UnsupportedExtension(file)),
        }
    }

    pub fn from_json(content: &str) -> Result<WorkflowDefinition, serde_json::Error> {
        serde_json::from_str(content)
    }

    fn is_workflow_file(path: &Path) -> bool {
        let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if CONFIG_FILE_NAMES.contains(&filename) {
            return false;
        }
        matches!(extension(path), Some("json" | "yaml" | "yml"))
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

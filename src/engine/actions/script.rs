//! `script.run` capability
//!
//! Runs a user-supplied WebAssembly module in the [`ScriptSandbox`]. The
//! module comes inline as WAT text (`source`) or from a `.wasm`/`.wat` file
//! (`path`); `input` is handed to the guest as JSON. Files are only read
//! from the sandbox's `script_dir`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::basic::parse_inputs;
use crate::engine::capability::{Capability, CapabilityError};
use crate::engine::sandbox::ScriptSandbox;

#[derive(Debug, Deserialize)]
struct ScriptInputs {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    input: Value,
}

pub struct ScriptCapability {
    sandbox: Arc<ScriptSandbox>,
}

impl ScriptCapability {
    pub fn new(sandbox: Arc<ScriptSandbox>) -> Self {
        Self { sandbox }
    }

    /// Resolve `path` inside the script directory, following symlinks
    async fn resolve(&self, path: &Path) -> Result<PathBuf, CapabilityError> {
        let Some(dir) = &self.sandbox.config().script_dir else {
            return Err(CapabilityError::new(
                "script files are disabled (no sandbox script_dir configured)",
            ));
        };

        let root = tokio::fs::canonicalize(dir)
            .await
            .map_err(|e| CapabilityError::new(format!("script directory unavailable: {}", e)))?;
        let resolved = tokio::fs::canonicalize(root.join(path))
            .await
            .map_err(|_| CapabilityError::new(format!("script {} not found", path.display())))?;

        if !resolved.starts_with(&root) {
            return Err(CapabilityError::new(format!(
                "script {} is outside the script directory",
                path.display()
            )));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Capability for ScriptCapability {
    async fn invoke(&self, inputs: Value) -> Result<Value, CapabilityError> {
        let inputs: ScriptInputs = parse_inputs(inputs)?;

        let module = match (inputs.source, inputs.path) {
            (Some(source), None) => source.into_bytes(),
            (None, Some(path)) => {
                let resolved = self.resolve(&path).await?;
                tokio::fs::read(&resolved).await.map_err(|e| {
                    CapabilityError::new(format!("failed to read script {}: {}", path.display(), e))
                })?
            }
            _ => {
                return Err(CapabilityError::new(
                    "exactly one of 'source' or 'path' is required",
                ))
            }
        };

        self.sandbox
            .run(module, &inputs.input)
            .await
            .map_err(|e| CapabilityError::new(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sandbox::SandboxConfig;
    use serde_json::json;

    // Writes the constant "42" at offset 0 and returns it
    const ANSWER_WAT: &str = r#"
        (module
          (memory (export "memory") 1)
          (data (i32.const 0) "42")
          (func (export "alloc") (param i32) (result i32) i32.const 64)
          (func (export "run") (param i32 i32) (result i64) i64.const 2))
    "#;

    fn capability(script_dir: Option<PathBuf>) -> ScriptCapability {
        let config = SandboxConfig {
            script_dir,
            ..Default::default()
        };
        ScriptCapability::new(Arc::new(ScriptSandbox::new(config).unwrap()))
    }

    #[tokio::test]
    async fn test_requires_exactly_one_source() {
        let cap = capability(None);

        let err = cap.invoke(json!({ "input": 1 })).await.unwrap_err();
        assert!(err.message.contains("exactly one"));

        let err = cap
            .invoke(json!({ "source": "(module)", "path": "/tmp/x.wasm" }))
            .await
            .unwrap_err();
        assert!(err.message.contains("exactly one"));
    }

    #[tokio::test]
    async fn test_runs_inline_wat() {
        let out = capability(None).invoke(json!({ "source": ANSWER_WAT })).await.unwrap();
        assert_eq!(out, json!(42));
    }

    #[tokio::test]
    async fn test_file_scripts_disabled_without_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("answer.wat");
        std::fs::write(&file, ANSWER_WAT).unwrap();

        let err = capability(None)
            .invoke(json!({ "path": file }))
            .await
            .unwrap_err();
        assert!(err.message.contains("script files are disabled"));
    }

    #[tokio::test]
    async fn test_runs_file_from_script_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("answer.wat"), ANSWER_WAT).unwrap();

        let out = capability(Some(dir.path().to_path_buf()))
            .invoke(json!({ "path": "answer.wat" }))
            .await
            .unwrap();
        assert_eq!(out, json!(42));
    }

    #[tokio::test]
    async fn test_path_outside_script_dir_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let scripts = root.path().join("scripts");
        std::fs::create_dir(&scripts).unwrap();
        let secret = root.path().join("secrets.txt");
        std::fs::write(&secret, "db_password=hunter2\n").unwrap();

        let cap = capability(Some(scripts));
        for path in [json!("../secrets.txt"), json!(secret)] {
            let err = cap.invoke(json!({ "path": path })).await.unwrap_err();
            assert!(err.message.contains("outside the script directory"), "{}", err.message);
            assert!(!err.message.contains("hunter2"));
        }
    }
}

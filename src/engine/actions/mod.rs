//! Built-in capabilities
//!
//! Each submodule implements one capability family:
//! - `basic` - `core.echo`, `core.delay`, `core.fail`
//! - `http` - `http.request`
//! - `script` - `script.run`, sandboxed WebAssembly

pub mod basic;
pub mod http;
pub mod script;

use std::sync::Arc;

use super::capability::CapabilityRegistry;
use super::sandbox::{SandboxConfig, SandboxError, ScriptSandbox};

pub use self::basic::{DelayCapability, EchoCapability, FailCapability};
pub use self::http::HttpCapability;
pub use self::script::ScriptCapability;

#[derive(Debug, thiserror::Error)]
pub enum BuiltinError {
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Register every built-in capability
pub fn register_builtins(
    registry: &mut CapabilityRegistry,
    sandbox: &SandboxConfig,
) -> Result<(), BuiltinError> {
    registry
        .register("core.echo", Arc::new(EchoCapability))
        .register("core.delay", Arc::new(DelayCapability))
        .register("core.fail", Arc::new(FailCapability))
        .register("http.request", Arc::new(HttpCapability::new()?))
        .register(
            "script.run",
            Arc::new(ScriptCapability::new(Arc::new(ScriptSandbox::new(
                sandbox.clone(),
            )?))),
        );
    Ok(())
}

pub fn builtin_registry(sandbox: &SandboxConfig) -> Result<CapabilityRegistry, BuiltinError> {
    let mut registry = CapabilityRegistry::new();
    register_builtins(&mut registry, sandbox)?;
    Ok(registry)
}

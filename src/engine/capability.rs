//! Capability registry and dispatcher
//!
//! A capability is one invokable operation (`http.request`, `core.echo`, an
//! AI call, a social post) registered once at startup under a stable path.
//! The dispatcher looks the path up and invokes it; retry policy lives
//! elsewhere.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Error returned by a capability
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct CapabilityError {
    pub message: String,
    /// A shared resource (connection pool, quota) was exhausted
    pub exhausted: bool,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exhausted: false,
        }
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exhausted: true,
        }
    }
}

#[async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(&self, inputs: Value) -> Result<Value, CapabilityError>;
}

/// Adapter turning an async closure into a capability
pub struct FnCapability<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Capability for FnCapability<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, CapabilityError>> + Send,
{
    async fn invoke(&self, inputs: Value) -> Result<Value, CapabilityError> {
        (self.f)(inputs).await
    }
}

pub fn capability_fn<F, Fut>(f: F) -> Arc<dyn Capability>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CapabilityError>> + Send + 'static,
{
    Arc::new(FnCapability { f })
}

struct Registration {
    capability: Arc<dyn Capability>,
    integration: String,
}

/// Startup-built lookup table from capability path to implementation
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: HashMap<String, Registration>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the default integration (first path segment)
    pub fn register(
        &mut self,
        path: impl Into<String>,
        capability: Arc<dyn Capability>,
    ) -> &mut Self {
        let path = path.into();
        let integration = default_integration(&path).to_string();
        self.register_in(path, integration, capability)
    }

    pub fn register_in(
        &mut self,
        path: impl Into<String>,
        integration: impl Into<String>,
        capability: Arc<dyn Capability>,
    ) -> &mut Self {
        let path = path.into();
        if self.entries.contains_key(&path) {
            warn!(capability = %path, "Replacing registered capability");
        }
        self.entries.insert(
            path,
            Registration {
                capability,
                integration: integration.into(),
            },
        );
        self
    }

    pub fn get(&self, path: &str) -> Option<Arc<dyn Capability>> {
        self.entries.get(path).map(|r| r.capability.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Integration whose limiter and breaker guard this capability
    pub fn integration_of(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(|r| r.integration.as_str())
    }

    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<_> = self.entries.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn default_integration(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("capability '{0}' is not registered")]
    NotFound(String),

    #[error("capability '{capability}' failed: {source}")]
    Invocation {
        capability: String,
        source: CapabilityError,
    },
}

#[derive(Clone)]
pub struct CapabilityDispatcher {
    registry: Arc<CapabilityRegistry>,
}

impl CapabilityDispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub async fn invoke(&self, path: &str, inputs: Value) -> Result<Value, DispatchError> {
        let capability = self
            .registry
            .get(path)
            .ok_or_else(|| DispatchError::NotFound(path.to_string()))?;

        debug!(capability = %path, "Invoking capability");
        let start = Instant::now();
        let result = capability.invoke(inputs).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                info!(capability = %path, duration_ms, outcome = "success", "Capability call finished");
                Ok(output)
            }
            Err(source) => {
                warn!(
                    capability = %path,
                    duration_ms,
                    outcome = "error",
                    error = %source,
                    "Capability call finished"
                );
                Err(DispatchError::Invocation {
                    capability: path.to_string(),
                    source,
                })
            }
        }
    }
}

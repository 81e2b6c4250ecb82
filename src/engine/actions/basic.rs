//! `core.*` capabilities: echo, delay and fail

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::engine::capability::{Capability, CapabilityError};

/// Returns its resolved inputs unchanged
pub struct EchoCapability;

#[async_trait]
impl Capability for EchoCapability {
    async fn invoke(&self, inputs: Value) -> Result<Value, CapabilityError> {
        Ok(inputs)
    }
}

#[derive(Debug, Deserialize)]
struct DelayInputs {
    ms: u64,
    #[serde(default)]
    value: Option<Value>,
}

/// Sleeps for `ms`, then returns `value` (or `null`)
pub struct DelayCapability;

#[async_trait]
impl Capability for DelayCapability {
    async fn invoke(&self, inputs: Value) -> Result<Value, CapabilityError> {
        let inputs: DelayInputs = parse_inputs(inputs)?;
        tokio::time::sleep(Duration::from_millis(inputs.ms)).await;
        Ok(inputs.value.unwrap_or(Value::Null))
    }
}

#[derive(Debug, Deserialize)]
struct FailInputs {
    #[serde(default = "default_fail_message")]
    message: String,
    #[serde(default)]
    exhausted: bool,
}

fn default_fail_message() -> String {
    "step failed".to_string()
}

/// Always fails with `message`
pub struct FailCapability;

#[async_trait]
impl Capability for FailCapability {
    async fn invoke(&self, inputs: Value) -> Result<Value, CapabilityError> {
        let inputs: FailInputs = parse_inputs(inputs)?;
        Err(if inputs.exhausted {
            CapabilityError::resource_exhausted(inputs.message)
        } else {
            CapabilityError::new(inputs.message)
        })
    }
}

pub(crate) fn parse_inputs<T: serde::de::DeserializeOwned>(inputs: Value) -> Result<T, CapabilityError> {
    serde_json::from_value(inputs).map_err(|e| CapabilityError::new(format!("invalid inputs: {}", e)))
}

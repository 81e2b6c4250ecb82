//! `http.request` capability
//!
//! Generic HTTP call via reqwest. Inputs:
//!
//! ```json
//! {
//!   "method": "POST",
//!   "url": "https://api.example.com/posts",
//!   "headers": { "Authorization": "Bearer ..." },
//!   "query": { "draft": "true" },
//!   "body": { "title": "Hello" },
//!   "allowErrorStatus": false
//! }
//! ```
//!
//! Output is `{status, headers, body, elapsedMs}`; a JSON response body is
//! parsed, anything else is returned as text.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::basic::parse_inputs;
use crate::engine::capability::{Capability, CapabilityError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpInputs {
    #[serde(default = "default_method")]
    method: String,
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    query: HashMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
    /// Return non-2xx responses as output instead of failing
    #[serde(default)]
    allow_error_status: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

pub struct HttpCapability {
    client: reqwest::Client,
}

impl HttpCapability {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Capability for HttpCapability {
    async fn invoke(&self, inputs: Value) -> Result<Value, CapabilityError> {
        let inputs: HttpInputs = parse_inputs(inputs)?;

        let method = reqwest::Method::from_bytes(inputs.method.to_uppercase().as_bytes())
            .map_err(|_| CapabilityError::new(format!("unknown HTTP method: {}", inputs.method)))?;

        let mut request = self.client.request(method.clone(), &inputs.url);
        if !inputs.query.is_empty() {
            request = request.query(&inputs.query);
        }
        for (key, value) in &inputs.headers {
            request = request.header(key, value);
        }
        if let Some(body) = &inputs.body {
            request = request.json(body);
        }

        debug!("Executing {} {}", method, inputs.url);
        let start = Instant::now();

        let response = request
            .send()
            .await
            .map_err(|e| CapabilityError::new(format!("request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| CapabilityError::new(format!("failed to read response body: {}", e)))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if !(200..300).contains(&status) && !inputs.allow_error_status {
            return Err(CapabilityError::new(format!(
                "{} {} returned HTTP {}",
                method, inputs.url, status
            )));
        }

        Ok(json!({
            "status": status,
            "headers": headers,
            "body": body,
            "elapsedMs": elapsed_ms,
        }))
    }
}

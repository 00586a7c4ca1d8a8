//! HTTP Service Adapter
//!
//! Turns an external endpoint into a [`ServiceHandler`]: the call arguments
//! are POSTed as JSON and the JSON response body is the result.

use reqwest::Client;
use serde_json::Value;

use crate::error::BoxError;
use crate::resilience::{service_fn, ServiceHandler};

/// Handler POSTing args to `endpoint`; non-2xx answers are failures
pub fn http_service_handler(client: Client, endpoint: impl Into<String>) -> ServiceHandler {
    let endpoint = endpoint.into();
    service_fn(move |args: Value| {
        let client = client.clone();
        let endpoint = endpoint.clone();
        async move {
            let response = client.post(&endpoint).json(&args).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(BoxError::from(format!("{} returned HTTP {}: {}", endpoint, status, body)));
            }

            let bytes = response.bytes().await?;
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            let value: Value = serde_json::from_slice(&bytes)?;
            Ok::<Value, BoxError>(value)
        }
    })
}

use async_trait::async_trait;
use flowcore::{DispatchError, Value};
use flowruntime::{ToolHandler, ToolMetadata};
use serde_json::{json, Map};
use std::time::Duration;

/// HTTP request tool
///
/// Parameters: `url` (required), `method` (default GET), `headers` object,
/// `body` (sent as JSON, or raw when a string), `timeout_ms`.
/// Rate limiting, server errors, timeouts and connection failures are
/// reported as transient so the engine retries them.
pub struct HttpRequestTool {
    client: reqwest::Client,
}

impl HttpRequestTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestTool {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(error: reqwest::Error) -> DispatchError {
    if error.is_timeout() || error.is_connect() {
        DispatchError::transient(format!("HTTP request failed: {}", error))
    } else {
        DispatchError::fatal(format!("HTTP request failed: {}", error))
    }
}

#[async_trait]
impl ToolHandler for HttpRequestTool {
    fn name(&self) -> &str {
        "http.request"
    }

    async fn call(&self, params: &Value) -> Result<Value, DispatchError> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| DispatchError::fatal("http.request requires a string 'url'"))?;
        let method = params
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();

        tracing::info!(%method, %url, "HTTP request");

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            _ => return Err(DispatchError::fatal(format!("Unsupported method: {}", method))),
        };

        if let Some(Value::Object(headers)) = params.get("headers") {
            for (key, value) in headers {
                if let Some(val_str) = value.as_str() {
                    request = request.header(key, val_str);
                }
            }
        }

        request = match params.get("body") {
            None | Some(Value::Null) => request,
            Some(Value::String(text)) => request.body(text.clone()),
            Some(body) => request.json(body),
        };

        if let Some(ms) = params.get("timeout_ms").and_then(Value::as_u64) {
            request = request.timeout(Duration::from_millis(ms));
        }

        let response = request.send().await.map_err(classify)?;

        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();
        let body_text = response.text().await.map_err(classify)?;

        tracing::info!(status = status.as_u16(), "HTTP response");

        if status.as_u16() == 429 || status.is_server_error() {
            return Err(DispatchError::transient(format!(
                "{} {} returned {}",
                method, url, status
            )));
        }
        if !status.is_success() {
            return Err(DispatchError::fatal(format!(
                "{} {} returned {}",
                method, url, status
            )));
        }

        let body = serde_json::from_str(&body_text).unwrap_or(Value::String(body_text));
        Ok(json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
        }))
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
        }
    }
}

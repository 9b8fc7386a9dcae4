use async_trait::async_trait;
use flowcore::{DispatchError, Value};
use flowruntime::{ToolHandler, ToolMetadata};
use tokio::time::{sleep, Duration};

/// Wait for `delay_ms` milliseconds, then pass the parameters through
pub struct DelayTool;

#[async_trait]
impl ToolHandler for DelayTool {
    fn name(&self) -> &str {
        "time.delay"
    }

    async fn call(&self, params: &Value) -> Result<Value, DispatchError> {
        let delay_ms = match params.get("delay_ms") {
            None => 1000,
            Some(v) => v
                .as_u64()
                .ok_or_else(|| DispatchError::fatal("delay_ms must be a non-negative integer"))?,
        };

        tracing::debug!(delay_ms, "Delaying");
        sleep(Duration::from_millis(delay_ms)).await;

        Ok(params.clone())
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Delay for the given milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}

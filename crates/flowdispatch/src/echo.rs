use async_trait::async_trait;
use flowcore::{DispatchError, Value};
use flowruntime::{ToolHandler, ToolMetadata};

/// Tool that logs its parameters and returns them unchanged
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    async fn call(&self, params: &Value) -> Result<Value, DispatchError> {
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("(no message)");
        tracing::info!(tool = "echo", %message, "ECHO");
        Ok(params.clone())
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Logs and returns its parameters".to_string(),
            category: "debug".to_string(),
        }
    }
}

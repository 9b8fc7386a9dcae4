use async_trait::async_trait;
use flowcore::{DispatchError, Value};
use flowruntime::{ToolHandler, ToolMetadata};

/// Parse a JSON string into a value
pub struct JsonParseTool;

#[async_trait]
impl ToolHandler for JsonParseTool {
    fn name(&self) -> &str {
        "json.parse"
    }

    async fn call(&self, params: &Value) -> Result<Value, DispatchError> {
        // Accept either {"json": "..."} or a bare string.
        let input = params
            .get("json")
            .unwrap_or(params)
            .as_str()
            .ok_or_else(|| DispatchError::fatal("json.parse expects a string"))?;

        serde_json::from_str(input)
            .map_err(|e| DispatchError::fatal(format!("JSON parse error: {}", e)))
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// Serialize a value to a JSON string
pub struct JsonStringifyTool;

#[async_trait]
impl ToolHandler for JsonStringifyTool {
    fn name(&self) -> &str {
        "json.stringify"
    }

    async fn call(&self, params: &Value) -> Result<Value, DispatchError> {
        let value = params.get("value").unwrap_or(params);
        let text = serde_json::to_string_pretty(value)
            .map_err(|e| DispatchError::fatal(format!("JSON stringify error: {}", e)))?;
        Ok(Value::String(text))
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}

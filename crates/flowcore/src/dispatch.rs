use crate::events::ExecutionId;
use crate::graph::{AgentRef, NodeId, ToolRef};
use crate::DispatchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What an agent wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Respond,
    Delegate,
    UseTool,
}

/// Structured result of invoking an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_params: Option<Value>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub output: Value,
}

impl Decision {
    pub fn respond(output: impl Into<Value>) -> Self {
        Self {
            action: Action::Respond,
            target: None,
            tool_name: None,
            tool_params: None,
            reasoning: None,
            output: output.into(),
        }
    }

    pub fn delegate(target: impl Into<String>, output: impl Into<Value>) -> Self {
        Self {
            action: Action::Delegate,
            target: Some(target.into()),
            ..Self::respond(output)
        }
    }

    pub fn use_tool(tool_name: impl Into<String>, params: Value) -> Self {
        Self {
            action: Action::UseTool,
            tool_name: Some(tool_name.into()),
            tool_params: Some(params),
            ..Self::respond(Value::Null)
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Reject decisions missing the fields their action needs.
    pub fn validate(&self) -> Result<(), DispatchError> {
        match self.action {
            Action::Delegate if self.target.as_deref().map_or(true, str::is_empty) => Err(
                DispatchError::malformed_decision("delegate decision without a target"),
            ),
            Action::UseTool if self.tool_name.as_deref().map_or(true, str::is_empty) => Err(
                DispatchError::malformed_decision("use_tool decision without a tool name"),
            ),
            _ => Ok(()),
        }
    }
}

/// A tool call issued by the agent currently in control, with its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub parameters: Value,
    pub result: Value,
}

/// Everything an agent node can see when it is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    /// The execution's original input.
    pub input: Value,
    /// Output of the previous node, or the input for the first node.
    pub payload: Value,
    /// Tool calls this agent made since it took control, oldest first.
    pub tool_results: Vec<ToolCall>,
    /// Agent id that delegated control here, if any.
    pub delegated_by: Option<String>,
}

/// Capability seam through which agents and tools are invoked.
///
/// Implementations classify their own failures as transient or fatal; the
/// engine retries transient ones and never panics on either.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn invoke_agent(
        &self,
        agent: &AgentRef,
        ctx: &AgentContext,
    ) -> Result<Decision, DispatchError>;

    async fn invoke_tool(&self, tool: &ToolRef, params: &Value) -> Result<Value, DispatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validates_required_fields() {
        assert!(Decision::respond(json!("ok")).validate().is_ok());
        assert!(Decision::delegate("b", Value::Null).validate().is_ok());

        let mut missing_target = Decision::delegate("b", Value::Null);
        missing_target.target = None;
        assert!(matches!(
            missing_target.validate(),
            Err(DispatchError::Fatal(_))
        ));

        let mut missing_tool = Decision::use_tool("search", json!({}));
        missing_tool.tool_name = Some(String::new());
        assert!(missing_tool.validate().is_err());
    }

    #[test]
    fn decision_deserializes_with_defaults() {
        let d: Decision = serde_json::from_value(json!({"action": "respond"})).unwrap();
        assert_eq!(d.action, Action::Respond);
        assert_eq!(d.output, Value::Null);
    }
}

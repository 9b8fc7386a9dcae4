use async_trait::async_trait;
use flowcore::{AgentContext, AgentRef, Decision, DispatchError, Dispatcher, ToolRef, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Agent implementation registered under an agent id
#[async_trait]
pub trait AgentHandler: Send + Sync {
    /// Agent id this handler answers for (matches `AgentRef::id`)
    fn agent_id(&self) -> &str;

    /// Produce the next decision for the given context
    async fn decide(&self, agent: &AgentRef, ctx: &AgentContext)
        -> Result<Decision, DispatchError>;
}

/// Tool implementation registered under a tool name
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Tool name (e.g., "http.request", "json.parse")
    fn name(&self) -> &str;

    async fn call(&self, params: &Value) -> Result<Value, DispatchError>;

    /// Optional: description and category for listings
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::default()
    }
}

/// Metadata about a tool
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub description: String,
    pub category: String,
}

impl Default for ToolMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Registry of available agents and tools, usable as the engine's dispatcher
#[derive(Default)]
pub struct DispatchRegistry {
    agents: HashMap<String, Arc<dyn AgentHandler>>,
    tools: HashMap<String, Arc<dyn ToolHandler>>,
    fallback_agent: Option<Arc<dyn AgentHandler>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent handler
    pub fn register_agent(&mut self, handler: Arc<dyn AgentHandler>) {
        let agent_id = handler.agent_id().to_string();
        tracing::info!("Registering agent: {}", agent_id);
        self.agents.insert(agent_id, handler);
    }

    /// Register a tool handler
    pub fn register_tool(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.name().to_string();
        tracing::info!("Registering tool: {}", name);
        self.tools.insert(name, handler);
    }

    /// Handler used for agent ids with no registered handler
    pub fn set_fallback_agent(&mut self, handler: Arc<dyn AgentHandler>) {
        self.fallback_agent = Some(handler);
    }

    pub fn has_agent(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    /// Get all registered tool names, sorted
    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get metadata for a tool
    pub fn tool_metadata(&self, name: &str) -> Option<ToolMetadata> {
        self.tools.get(name).map(|t| t.metadata())
    }
}

#[async_trait]
impl Dispatcher for DispatchRegistry {
    async fn invoke_agent(
        &self,
        agent: &AgentRef,
        ctx: &AgentContext,
    ) -> Result<Decision, DispatchError> {
        let handler = self
            .agents
            .get(&agent.id)
            .or(self.fallback_agent.as_ref())
            .ok_or_else(|| DispatchError::unknown_agent(&agent.id))?;
        handler.decide(agent, ctx).await
    }

    async fn invoke_tool(&self, tool: &ToolRef, params: &Value) -> Result<Value, DispatchError> {
        let handler = self
            .tools
            .get(&tool.name)
            .ok_or_else(|| DispatchError::unknown_tool(&tool.name))?;
        handler.call(params).await
    }
}

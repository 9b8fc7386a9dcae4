use async_trait::async_trait;
use flowcore::{
    AgentContext, AgentRef, Decision, DispatchError, EventKind, ExecutionHook, ExecutionId,
    HookError, HookEvent, Value,
};
use flowruntime::AgentHandler;
use std::collections::HashMap;
use std::sync::Mutex;

/// Agent that replays a fixed sequence of decisions.
///
/// Each execution walks the script independently, per node; once the script
/// is exhausted the last decision repeats. Cursors are kept until
/// [`release`](Self::release); registering the agent as a runtime hook as
/// well releases them when the execution finishes.
pub struct ScriptedAgent {
    agent_id: String,
    script: Vec<Decision>,
    positions: Mutex<HashMap<(ExecutionId, String), usize>>,
}

impl ScriptedAgent {
    pub fn new(agent_id: impl Into<String>, script: Vec<Decision>) -> Self {
        Self {
            agent_id: agent_id.into(),
            script,
            positions: Mutex::new(HashMap::new()),
        }
    }

    /// Build from an agent node's config, which must carry a `script` array
    /// of decisions.
    pub fn from_config(agent_id: impl Into<String>, config: &Value) -> Result<Self, DispatchError> {
        let agent_id = agent_id.into();
        let script = config
            .get("script")
            .ok_or_else(|| DispatchError::fatal(format!("agent '{}' has no script", agent_id)))?;
        let script: Vec<Decision> = serde_json::from_value(script.clone()).map_err(|e| {
            DispatchError::fatal(format!("invalid script for agent '{}': {}", agent_id, e))
        })?;
        if script.is_empty() {
            return Err(DispatchError::fatal(format!(
                "script for agent '{}' is empty",
                agent_id
            )));
        }
        Ok(Self::new(agent_id, script))
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }

    /// Drop the script cursors of one execution.
    pub fn release(&self, execution_id: ExecutionId) {
        self.positions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|(id, _), _| *id != execution_id);
    }

    /// Executions that still hold a cursor.
    pub fn tracked_executions(&self) -> usize {
        let positions = self.positions.lock().unwrap_or_else(|p| p.into_inner());
        let mut ids: Vec<_> = positions.keys().map(|(id, _)| *id).collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }

    fn next_position(&self, ctx: &AgentContext) -> usize {
        let mut positions = self.positions.lock().unwrap_or_else(|p| p.into_inner());
        let pos = positions
            .entry((ctx.execution_id, ctx.node_id.clone()))
            .or_insert(0);
        let current = *pos;
        *pos += 1;
        current
    }
}

#[async_trait]
impl AgentHandler for ScriptedAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn decide(
        &self,
        _agent: &AgentRef,
        ctx: &AgentContext,
    ) -> Result<Decision, DispatchError> {
        let pos = self.next_position(ctx);
        let decision = self
            .script
            .get(pos)
            .or_else(|| self.script.last())
            .cloned()
            .ok_or_else(|| {
                DispatchError::fatal(format!("agent '{}' has an empty script", self.agent_id))
            })?;
        tracing::debug!(
            agent = %self.agent_id,
            node = %ctx.node_id,
            position = pos,
            action = ?decision.action,
            "Scripted decision"
        );
        Ok(decision)
    }
}

impl ExecutionHook for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted-agent"
    }

    fn on_event(&self, event: &HookEvent) -> Result<(), HookError> {
        if matches!(event.kind, EventKind::Completed | EventKind::Failed) {
            self.release(event.execution_id);
        }
        Ok(())
    }
}

/// Agent that responds with its payload, plus any tool results it has seen.
pub struct EchoAgent {
    agent_id: String,
}

impl EchoAgent {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
        }
    }
}

impl Default for EchoAgent {
    fn default() -> Self {
        Self::new("echo")
    }
}

#[async_trait]
impl AgentHandler for EchoAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn decide(
        &self,
        agent: &AgentRef,
        ctx: &AgentContext,
    ) -> Result<Decision, DispatchError> {
        let output = if ctx.tool_results.is_empty() {
            ctx.payload.clone()
        } else {
            serde_json::json!({
                "payload": ctx.payload,
                "tool_results": ctx.tool_results,
            })
        };
        Ok(Decision::respond(output).with_reasoning(format!("{} echoed its input", agent.id)))
    }
}

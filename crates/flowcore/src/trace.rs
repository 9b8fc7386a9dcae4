//! Execution trace records.
//!
//! Field names and nesting here are consumed verbatim by trace viewers and
//! audit tooling; renaming anything breaks them.

use crate::dispatch::{Action, Decision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Start,
    AgentExecution,
    Delegation,
    ToolExecution,
    Error,
    Complete,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Start => "start",
            StepType::AgentExecution => "agent_execution",
            StepType::Delegation => "delegation",
            StepType::ToolExecution => "tool_execution",
            StepType::Error => "error",
            StepType::Complete => "complete",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision as recorded in a trace step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceDecision {
    pub action: Action,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tool_params: Option<Value>,
}

impl From<&Decision> for TraceDecision {
    fn from(decision: &Decision) -> Self {
        Self {
            action: decision.action,
            target: decision.target.clone(),
            tool_name: decision.tool_name.clone(),
            reasoning: decision.reasoning.clone(),
            tool_params: decision.tool_params.clone(),
        }
    }
}

/// One immutable record of a logical action in an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    /// Sequence number, contiguous from 1. Zero means "not yet assigned".
    pub step: u64,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub decision: Option<TraceDecision>,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TraceStep {
    /// A step without a sequence number; the recorder assigns one on append.
    pub fn draft(step_type: StepType) -> Self {
        Self {
            step: 0,
            step_type,
            agent_id: None,
            agent_name: None,
            decision: None,
            input: Value::Null,
            output: Value::Null,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_agent(
        mut self,
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        self.agent_id = Some(agent_id.into());
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn with_attribution(
        mut self,
        agent_id: Option<String>,
        agent_name: Option<String>,
    ) -> Self {
        self.agent_id = agent_id;
        self.agent_name = agent_name;
        self
    }

    pub fn with_decision(mut self, decision: TraceDecision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_assigned(&self) -> bool {
        self.step != 0
    }
}

/// Most recent `agent_execution` step at or before the end of `steps`.
///
/// Delegations are attributed to this step's agent, skipping any delegation
/// steps in between.
pub fn last_agent_execution(steps: &[TraceStep]) -> Option<&TraceStep> {
    steps
        .iter()
        .rev()
        .find(|s| s.step_type == StepType::AgentExecution)
}

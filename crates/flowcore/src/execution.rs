use crate::events::ExecutionId;
use crate::graph::FlowId;
use crate::trace::TraceStep;
use crate::{ErrorKind, FlowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    fn can_become(&self, next: ExecutionStatus) -> bool {
        matches!(
            (self, next),
            (ExecutionStatus::Pending, ExecutionStatus::Running)
                | (ExecutionStatus::Running, ExecutionStatus::Completed)
                | (ExecutionStatus::Running, ExecutionStatus::Failed)
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        })
    }
}

/// Observable state of one run of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub flow_id: FlowId,
    #[serde(default)]
    pub deployment_id: Option<String>,
    pub framework: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub input: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_trace: Vec<TraceStep>,
    #[serde(skip)]
    error_kind: Option<ErrorKind>,
}

impl Execution {
    pub fn new(flow_id: impl Into<String>, framework: impl Into<String>, input: Value) -> Self {
        Self {
            id: ExecutionId::new_v4(),
            flow_id: flow_id.into(),
            deployment_id: None,
            framework: framework.into(),
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            input,
            result: None,
            error: None,
            execution_trace: Vec::new(),
            error_kind: None,
        }
    }

    pub fn with_deployment(mut self, deployment_id: impl Into<String>) -> Self {
        self.deployment_id = Some(deployment_id.into());
        self
    }

    /// Failure category, set only on executions that failed in this process.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: ExecutionStatus) -> Result<(), FlowError> {
        if !self.status.can_become(next) {
            return Err(FlowError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<(), FlowError> {
        self.transition(ExecutionStatus::Running)
    }

    pub fn complete(&mut self, result: Value) -> Result<(), FlowError> {
        self.transition(ExecutionStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, error: &FlowError) -> Result<(), FlowError> {
        self.transition(ExecutionStatus::Failed)?;
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind());
        Ok(())
    }
}

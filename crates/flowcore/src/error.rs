use crate::execution::ExecutionStatus;
use serde::{Deserialize, Serialize};
use std::any::Any;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum FlowError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Step budget of {budget} exceeded")]
    StepBudgetExceeded { budget: usize },

    #[error("Trace sequence violation: expected step {expected}, got {actual}")]
    SequenceViolation { expected: u64, actual: u64 },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Execution error: {0}")]
    Execution(String),
}

impl FlowError {
    /// Taxonomy bucket recorded alongside a failed execution.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::Graph(GraphError::InvalidGraph(_)) => ErrorKind::InvalidGraph,
            FlowError::Graph(GraphError::UnknownNode(_)) => ErrorKind::UnknownNode,
            FlowError::Graph(GraphError::NoMatchingEdge { .. }) => ErrorKind::NoMatchingEdge,
            FlowError::Dispatch(DispatchError::Transient(_)) => ErrorKind::DispatchTransient,
            FlowError::Dispatch(DispatchError::Fatal(_)) => ErrorKind::DispatchFatal,
            FlowError::StepBudgetExceeded { .. } => ErrorKind::StepBudgetExceeded,
            FlowError::SequenceViolation { .. } | FlowError::InvalidTransition { .. } => {
                ErrorKind::SequenceViolation
            }
            FlowError::Cancelled => ErrorKind::Cancelled,
            FlowError::ExecutionNotFound(_)
            | FlowError::FlowNotFound(_)
            | FlowError::Serialization(_)
            | FlowError::Execution(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(e: serde_json::Error) -> Self {
        FlowError::Serialization(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("No matching {expected} edge from '{from}'{}", fmt_target(.target))]
    NoMatchingEdge {
        from: String,
        expected: String,
        target: Option<String>,
    },
}

fn fmt_target(target: &Option<String>) -> String {
    target
        .as_deref()
        .map(|t| format!(" to '{}'", t))
        .unwrap_or_default()
}

impl GraphError {
    pub fn no_edge(from: impl Into<String>, expected: impl Into<String>) -> Self {
        GraphError::NoMatchingEdge {
            from: from.into(),
            expected: expected.into(),
            target: None,
        }
    }

    pub fn no_edge_to(
        from: impl Into<String>,
        expected: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        GraphError::NoMatchingEdge {
            from: from.into(),
            expected: expected.into(),
            target: Some(target.into()),
        }
    }
}

/// Failure reported by an agent or tool provider.
///
/// Providers classify their own failures: transient ones (timeouts, rate
/// limits, dropped connections) are retried by the engine, fatal ones end
/// the execution immediately.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl DispatchError {
    pub fn transient(message: impl Into<String>) -> Self {
        DispatchError::Transient(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        DispatchError::Fatal(message.into())
    }

    pub fn timeout(after_ms: u64) -> Self {
        DispatchError::Transient(format!("timed out after {}ms", after_ms))
    }

    pub fn unknown_agent(agent_id: &str) -> Self {
        DispatchError::Fatal(format!("unknown agent '{}'", agent_id))
    }

    pub fn unknown_tool(tool_name: &str) -> Self {
        DispatchError::Fatal(format!("unknown tool '{}'", tool_name))
    }

    pub fn malformed_decision(reason: impl Into<String>) -> Self {
        DispatchError::Fatal(format!("malformed decision: {}", reason.into()))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Transient(_))
    }
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Failure raised by a notification hook. Never fatal to an execution.
#[derive(Error, Debug, Clone)]
#[error("hook '{hook}' failed: {message}")]
pub struct HookError {
    pub hook: String,
    pub message: String,
}

impl HookError {
    pub fn new(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidGraph,
    UnknownNode,
    NoMatchingEdge,
    DispatchTransient,
    DispatchFatal,
    StepBudgetExceeded,
    SequenceViolation,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidGraph => "invalid_graph",
            ErrorKind::UnknownNode => "unknown_node",
            ErrorKind::NoMatchingEdge => "no_matching_edge",
            ErrorKind::DispatchTransient => "dispatch_transient",
            ErrorKind::DispatchFatal => "dispatch_fatal",
            ErrorKind::StepBudgetExceeded => "step_budget_exceeded",
            ErrorKind::SequenceViolation => "sequence_violation",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

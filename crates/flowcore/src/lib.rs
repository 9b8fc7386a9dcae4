//! Core abstractions for the agent flow engine
//!
//! This crate provides the graph model, trace and execution record types,
//! the dispatch seam for agents and tools, and the notification hook
//! interface. Execution itself lives in `flowruntime`.

mod dispatch;
mod error;
pub mod events;
mod execution;
mod graph;
mod trace;

pub use dispatch::{Action, AgentContext, Decision, Dispatcher, ToolCall};
pub use error::{panic_message, DispatchError, ErrorKind, FlowError, GraphError, HookError};
pub use events::*;
pub use execution::{Execution, ExecutionStatus};
pub use graph::{
    AgentRef, Edge, EdgeKind, FlowDefinition, FlowGraph, FlowId, Guard, Node, NodeId, NodeKind,
    ToolRef,
};
pub use serde_json::Value;
pub use trace::{last_agent_execution, StepType, TraceDecision, TraceStep};

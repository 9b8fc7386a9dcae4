//! Flow execution runtime
//!
//! This crate provides the execution state machine that walks flow graphs,
//! the trace recorder, retry handling for agent and tool dispatch, the
//! dispatch registry, and a runtime that runs many executions concurrently.

mod config;
mod engine;
mod metrics;
mod recorder;
mod registry;
mod retry;
mod runtime;

pub use config::{ConfigError, EngineConfig, RetryPolicy, RuntimeConfig};
pub use engine::{render_params, ExecutionEngine};
pub use metrics::{AggregatorHandle, MetricsAggregator, MetricsSnapshot};
pub use recorder::{MemoryTraceRecorder, TraceRecorder};
pub use registry::{AgentHandler, DispatchRegistry, ToolHandler, ToolMetadata};
pub use runtime::{ExecutionHandle, FlowRuntime, FlowRuntimeBuilder};

//! Standard agent and tool library
//!
//! Built-in handlers for the dispatch registry: scripted and echo agents for
//! exercising flows without a model provider, and tools for common operations.

mod agents;
mod echo;
mod http;
mod time;
mod transform;

pub use agents::{EchoAgent, ScriptedAgent};
pub use echo::EchoTool;
pub use http::HttpRequestTool;
pub use time::DelayTool;
pub use transform::{JsonParseTool, JsonStringifyTool};

use flowruntime::DispatchRegistry;
use std::sync::Arc;

/// Register all standard tools with a registry
pub fn register_all(registry: &mut DispatchRegistry) {
    registry.register_tool(Arc::new(echo::EchoTool));
    registry.register_tool(Arc::new(http::HttpRequestTool::new()));
    registry.register_tool(Arc::new(transform::JsonParseTool));
    registry.register_tool(Arc::new(transform::JsonStringifyTool));
    registry.register_tool(Arc::new(time::DelayTool));
}

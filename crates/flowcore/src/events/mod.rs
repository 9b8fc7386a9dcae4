// crates/flowcore/src/events/mod.rs

mod broadcast;
mod hook;

pub use broadcast::BroadcastHook;
pub use hook::{EventKind, EventPayload, ExecutionHook, HookEvent, HookSet, LoggingHook};

pub type ExecutionId = uuid::Uuid;

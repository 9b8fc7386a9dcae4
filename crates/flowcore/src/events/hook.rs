use super::ExecutionId;
use crate::execution::Execution;
use crate::trace::TraceStep;
use crate::{panic_message, HookError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Step,
    Completed,
    Failed,
}

/// `Step` carries the just-appended trace step; every other kind carries a
/// snapshot of the execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Step(TraceStep),
    Execution(Box<Execution>),
}

/// Lifecycle event delivered to every hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEvent {
    #[serde(rename = "executionId")]
    pub execution_id: ExecutionId,
    #[serde(rename = "eventKind")]
    pub kind: EventKind,
    pub payload: EventPayload,
    #[serde(skip, default = "Utc::now")]
    pub emitted_at: DateTime<Utc>,
}

impl HookEvent {
    pub fn started(execution: &Execution) -> Self {
        Self::snapshot(EventKind::Started, execution)
    }

    pub fn step(execution_id: ExecutionId, step: TraceStep) -> Self {
        Self {
            execution_id,
            kind: EventKind::Step,
            payload: EventPayload::Step(step),
            emitted_at: Utc::now(),
        }
    }

    pub fn finished(execution: &Execution) -> Self {
        let kind = match execution.status {
            crate::ExecutionStatus::Completed => EventKind::Completed,
            _ => EventKind::Failed,
        };
        Self::snapshot(kind, execution)
    }

    fn snapshot(kind: EventKind, execution: &Execution) -> Self {
        Self {
            execution_id: execution.id,
            kind,
            payload: EventPayload::Execution(Box::new(execution.clone())),
            emitted_at: Utc::now(),
        }
    }

    pub fn trace_step(&self) -> Option<&TraceStep> {
        match &self.payload {
            EventPayload::Step(step) => Some(step),
            EventPayload::Execution(_) => None,
        }
    }

    pub fn execution(&self) -> Option<&Execution> {
        match &self.payload {
            EventPayload::Execution(exec) => Some(exec),
            EventPayload::Step(_) => None,
        }
    }
}

/// Receiver of execution lifecycle events.
///
/// Called synchronously from the engine, so implementations must return
/// quickly; anything slow belongs on a channel drained elsewhere. Errors are
/// logged by the engine and otherwise ignored.
pub trait ExecutionHook: Send + Sync {
    fn name(&self) -> &str;

    fn on_event(&self, event: &HookEvent) -> Result<(), HookError>;
}

/// Fan-out over a set of hooks.
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<Arc<dyn ExecutionHook>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: Arc<dyn ExecutionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn push(&mut self, hook: Arc<dyn ExecutionHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Deliver to every hook. A failing or panicking hook never stops
    /// delivery to the rest.
    pub fn emit(&self, event: &HookEvent) {
        for hook in &self.hooks {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| hook.on_event(event)))
                .unwrap_or_else(|payload| {
                    Err(HookError::new(
                        hook.name(),
                        format!("panicked: {}", panic_message(payload.as_ref())),
                    ))
                });
            if let Err(e) = outcome {
                tracing::warn!(
                    hook = hook.name(),
                    execution_id = %event.execution_id,
                    kind = ?event.kind,
                    error = %e,
                    "Notification hook failed"
                );
            }
        }
    }
}

/// Writes every event to the `tracing` log.
#[derive(Debug, Clone, Default)]
pub struct LoggingHook;

impl ExecutionHook for LoggingHook {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_event(&self, event: &HookEvent) -> Result<(), HookError> {
        match &event.payload {
            EventPayload::Step(step) => tracing::debug!(
                execution_id = %event.execution_id,
                step = step.step,
                step_type = %step.step_type,
                agent = step.agent_id.as_deref().unwrap_or("-"),
                "Trace step appended"
            ),
            EventPayload::Execution(exec) => tracing::info!(
                execution_id = %event.execution_id,
                flow_id = %exec.flow_id,
                status = %exec.status,
                "Execution {:?}",
                event.kind
            ),
        }
        Ok(())
    }
}

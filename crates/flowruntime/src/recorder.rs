use async_trait::async_trait;
use flowcore::{ExecutionId, FlowError, TraceStep};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Append-only store of trace steps, keyed by execution.
///
/// There is exactly one writer per execution (its state machine); any number
/// of readers may read while it runs.
#[async_trait]
pub trait TraceRecorder: Send + Sync {
    /// Store a step and return it with its sequence number.
    ///
    /// A step whose `step` is zero gets the next number. A non-zero `step`
    /// must already be the next number, otherwise the append is rejected with
    /// [`FlowError::SequenceViolation`].
    async fn append(&self, execution_id: ExecutionId, step: TraceStep)
        -> Result<TraceStep, FlowError>;

    /// Every step recorded so far, in sequence order.
    async fn read(&self, execution_id: ExecutionId) -> Result<Vec<TraceStep>, FlowError>;

    /// Drop every step of a finished execution. Returns whether anything
    /// was stored.
    async fn forget(&self, execution_id: ExecutionId) -> bool;

    /// Lazy variant of [`read`](Self::read). Nothing is fetched until the
    /// stream is first polled; calling it again starts over from step 1.
    fn stream(&self, execution_id: ExecutionId) -> BoxStream<'_, Result<TraceStep, FlowError>> {
        stream::once(self.read(execution_id))
            .flat_map(|result| match result {
                Ok(steps) => stream::iter(steps.into_iter().map(Ok)).boxed(),
                Err(e) => stream::iter(vec![Err(e)]).boxed(),
            })
            .boxed()
    }
}

/// In-process recorder. Steps live as long as the recorder.
#[derive(Default)]
pub struct MemoryTraceRecorder {
    traces: RwLock<HashMap<ExecutionId, Vec<TraceStep>>>,
}

impl MemoryTraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TraceRecorder for MemoryTraceRecorder {
    async fn append(
        &self,
        execution_id: ExecutionId,
        mut step: TraceStep,
    ) -> Result<TraceStep, FlowError> {
        let mut traces = self.traces.write().await;
        let steps = traces.entry(execution_id).or_default();
        let expected = steps.len() as u64 + 1;

        if step.is_assigned() && step.step != expected {
            tracing::error!(
                %execution_id,
                expected,
                actual = step.step,
                "Out-of-order trace append"
            );
            return Err(FlowError::SequenceViolation {
                expected,
                actual: step.step,
            });
        }

        step.step = expected;
        steps.push(step.clone());
        Ok(step)
    }

    async fn read(&self, execution_id: ExecutionId) -> Result<Vec<TraceStep>, FlowError> {
        self.traces
            .read()
            .await
            .get(&execution_id)
            .cloned()
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))
    }

    async fn forget(&self, execution_id: ExecutionId) -> bool {
        self.traces.write().await.remove(&execution_id).is_some()
    }
}

use flowcore::{EventKind, EventPayload, ExecutionHook, HookError, HookEvent, StepType};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Counters accumulated since the last flush.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub executions_started: u64,
    pub executions_completed: u64,
    pub executions_failed: u64,
    /// Failed executions by error kind.
    pub failures: BTreeMap<String, u64>,
    /// Trace steps by step type.
    pub steps: BTreeMap<String, u64>,
    pub total_duration_ms: u64,
    pub max_duration_ms: u64,
}

impl MetricsSnapshot {
    pub fn finished(&self) -> u64 {
        self.executions_completed + self.executions_failed
    }

    pub fn mean_duration_ms(&self) -> Option<u64> {
        match self.finished() {
            0 => None,
            n => Some(self.total_duration_ms / n),
        }
    }
}

/// Hook that aggregates execution counters in memory.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    inner: Mutex<MetricsSnapshot>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsSnapshot> {
        // Counters stay meaningful even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.lock().clone()
    }

    /// Return the current counters and reset them.
    pub fn take(&self) -> MetricsSnapshot {
        std::mem::take(&mut *self.lock())
    }

    pub fn steps_of(&self, step_type: StepType) -> u64 {
        self.lock().steps.get(step_type.as_str()).copied().unwrap_or(0)
    }

    /// Periodically flush the counters to the log and, when given, to `sink`.
    ///
    /// The task runs until the returned handle is stopped; a final flush
    /// happens on the way out.
    pub fn spawn_flush(
        self: &Arc<Self>,
        interval: Duration,
        sink: Option<mpsc::UnboundedSender<MetricsSnapshot>>,
    ) -> AggregatorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let metrics = Arc::clone(self);

        let join = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Metrics flush started");
            loop {
                let stopping = tokio::select! {
                    _ = tokio::time::sleep(interval) => false,
                    _ = token.cancelled() => true,
                };
                metrics.flush(sink.as_ref());
                if stopping {
                    info!("Metrics flush shutting down");
                    break;
                }
            }
        });

        AggregatorHandle { cancel, join }
    }

    fn flush(&self, sink: Option<&mpsc::UnboundedSender<MetricsSnapshot>>) {
        let snapshot = self.take();
        info!(
            started = snapshot.executions_started,
            completed = snapshot.executions_completed,
            failed = snapshot.executions_failed,
            mean_duration_ms = snapshot.mean_duration_ms().unwrap_or(0),
            max_duration_ms = snapshot.max_duration_ms,
            "Execution metrics"
        );
        if let Some(sink) = sink {
            let _ = sink.send(snapshot);
        }
    }
}

impl ExecutionHook for MetricsAggregator {
    fn name(&self) -> &str {
        "metrics"
    }

    fn on_event(&self, event: &HookEvent) -> Result<(), HookError> {
        let mut m = self.lock();
        match (&event.kind, &event.payload) {
            (EventKind::Started, _) => m.executions_started += 1,
            (EventKind::Step, EventPayload::Step(step)) => {
                *m.steps.entry(step.step_type.as_str().to_string()).or_default() += 1;
            }
            (EventKind::Completed | EventKind::Failed, EventPayload::Execution(exec)) => {
                if exec.status == flowcore::ExecutionStatus::Completed {
                    m.executions_completed += 1;
                } else {
                    m.executions_failed += 1;
                    let kind = exec
                        .error_kind()
                        .map(|k| k.as_str())
                        .unwrap_or("unknown");
                    *m.failures.entry(kind.to_string()).or_default() += 1;
                }
                if let Some(done) = exec.completed_at {
                    let ms = (done - exec.started_at).num_milliseconds().max(0) as u64;
                    m.total_duration_ms += ms;
                    m.max_duration_ms = m.max_duration_ms.max(ms);
                }
            }
            _ => {
                return Err(HookError::new(
                    "metrics",
                    format!("unexpected payload for {:?} event", event.kind),
                ))
            }
        }
        Ok(())
    }
}

/// Running flush task.
pub struct AggregatorHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl AggregatorHandle {
    /// Stop the task after a last flush.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Metrics flush task panicked");
        }
    }
}

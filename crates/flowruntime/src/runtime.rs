use crate::config::RuntimeConfig;
use crate::engine::ExecutionEngine;
use crate::metrics::{AggregatorHandle, MetricsAggregator, MetricsSnapshot};
use crate::recorder::{MemoryTraceRecorder, TraceRecorder};
use flowcore::{
    panic_message, BroadcastHook, Dispatcher, Execution, ExecutionHook, ExecutionId,
    FlowDefinition, FlowError, FlowGraph, FlowId, HookEvent, HookSet, LoggingHook, TraceStep,
    Value,
};
use futures::stream::BoxStream;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running execution.
pub struct ExecutionHandle {
    pub execution_id: ExecutionId,
    /// Latest consistent snapshot of the record.
    pub snapshot: watch::Receiver<Execution>,
    pub cancel: CancellationToken,
    join: JoinHandle<Result<Execution, FlowError>>,
}

impl ExecutionHandle {
    /// Wait for the execution to reach a terminal state.
    pub async fn wait(self) -> Result<Execution, FlowError> {
        self.join
            .await
            .map_err(|e| FlowError::Execution(format!("execution task failed: {}", e)))?
    }

    pub fn current(&self) -> Execution {
        self.snapshot.borrow().clone()
    }
}

struct ActiveExecution {
    snapshot: watch::Receiver<Execution>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ExecutionTable {
    active: HashMap<ExecutionId, ActiveExecution>,
    finished: HashMap<ExecutionId, Execution>,
    /// Finish order, oldest first.
    order: VecDeque<ExecutionId>,
}

impl ExecutionTable {
    /// Move an execution from active to finished. Returns the ids of records
    /// evicted to stay within `retain`.
    fn settle(&mut self, execution: Execution, retain: usize) -> Vec<ExecutionId> {
        self.active.remove(&execution.id);
        self.order.push_back(execution.id);
        self.finished.insert(execution.id, execution);

        let mut evicted = Vec::new();
        while self.finished.len() > retain {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.finished.remove(&oldest).is_some() {
                evicted.push(oldest);
            }
        }
        evicted
    }

    fn forget(&mut self, execution_id: ExecutionId) -> bool {
        self.order.retain(|id| *id != execution_id);
        self.finished.remove(&execution_id).is_some()
    }
}

/// Main runtime for executing flows
pub struct FlowRuntime {
    config: RuntimeConfig,
    engine: Arc<ExecutionEngine>,
    recorder: Arc<dyn TraceRecorder>,
    broadcast: Arc<BroadcastHook>,
    metrics: Arc<MetricsAggregator>,
    flows: RwLock<HashMap<FlowId, Arc<FlowGraph>>>,
    executions: Arc<RwLock<ExecutionTable>>,
}

impl FlowRuntime {
    /// Create a runtime with default settings
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::builder(dispatcher).build()
    }

    pub fn builder(dispatcher: Arc<dyn Dispatcher>) -> FlowRuntimeBuilder {
        FlowRuntimeBuilder {
            dispatcher,
            config: RuntimeConfig::default(),
            recorder: None,
            hooks: Vec::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Validate and register a flow. Structural lints are logged, not fatal.
    pub async fn register_flow(
        &self,
        definition: FlowDefinition,
    ) -> Result<Arc<FlowGraph>, FlowError> {
        let graph = Arc::new(FlowGraph::new(definition)?);
        for lint in graph.lints() {
            tracing::warn!(flow_id = %graph.id(), "{}", lint);
        }
        tracing::info!(flow_id = %graph.id(), nodes = graph.nodes().len(), "Registered flow");
        self.flows
            .write()
            .await
            .insert(graph.id().to_string(), Arc::clone(&graph));
        Ok(graph)
    }

    pub async fn flow(&self, flow_id: &str) -> Option<Arc<FlowGraph>> {
        self.flows.read().await.get(flow_id).cloned()
    }

    async fn registered(&self, flow_id: &str) -> Result<Arc<FlowGraph>, FlowError> {
        self.flow(flow_id)
            .await
            .ok_or_else(|| FlowError::FlowNotFound(flow_id.to_string()))
    }

    /// Start an execution of a registered flow
    pub async fn spawn(&self, flow_id: &str, input: Value) -> Result<ExecutionHandle, FlowError> {
        let graph = self.registered(flow_id).await?;
        Ok(self.spawn_graph(graph, input).await)
    }

    /// Start an execution of a registered flow on behalf of a deployment.
    /// The id is carried on the record as `deployment_id`.
    pub async fn spawn_deployment(
        &self,
        flow_id: &str,
        deployment_id: impl Into<String>,
        input: Value,
    ) -> Result<ExecutionHandle, FlowError> {
        let graph = self.registered(flow_id).await?;
        let execution =
            Execution::new(graph.id(), graph.framework(), input).with_deployment(deployment_id);
        Ok(self.launch(graph, execution).await)
    }

    /// Start an execution of an already validated graph
    pub async fn spawn_graph(&self, graph: Arc<FlowGraph>, input: Value) -> ExecutionHandle {
        let execution = Execution::new(graph.id(), graph.framework(), input);
        self.launch(graph, execution).await
    }

    async fn launch(&self, graph: Arc<FlowGraph>, execution: Execution) -> ExecutionHandle {
        let execution_id = execution.id;
        let (tx, rx) = watch::channel(execution.clone());
        let cancel = CancellationToken::new();

        self.executions.write().await.active.insert(
            execution_id,
            ActiveExecution {
                snapshot: rx.clone(),
                cancel: cancel.clone(),
            },
        );

        let engine = Arc::clone(&self.engine);
        let executions = Arc::clone(&self.executions);
        let recorder = Arc::clone(&self.recorder);
        let retain = self.config.retain_finished;
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let run = engine.run_observed(&graph, execution, &token, &tx);
            let outcome = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let error = FlowError::Execution(format!(
                        "execution panicked: {}",
                        panic_message(payload.as_ref())
                    ));
                    let last_seen = tx.borrow().clone();
                    let settled = engine.abandon(last_seen, error).await;
                    tx.send_replace(settled.clone());
                    Ok(settled)
                }
            };

            let evicted = {
                let mut table = executions.write().await;
                match &outcome {
                    Ok(done) => table.settle(done.clone(), retain),
                    Err(_) => {
                        table.active.remove(&execution_id);
                        Vec::new()
                    }
                }
            };
            for id in evicted {
                recorder.forget(id).await;
                tracing::debug!(execution_id = %id, "Evicted finished execution");
            }
            outcome
        });

        ExecutionHandle {
            execution_id,
            snapshot: rx,
            cancel,
            join,
        }
    }

    /// Execute a registered flow to completion
    pub async fn execute(&self, flow_id: &str, input: Value) -> Result<Execution, FlowError> {
        self.spawn(flow_id, input).await?.wait().await
    }

    /// Execute a flow directly (without registration)
    ///
    /// An invalid definition is rejected before any execution is created.
    pub async fn execute_definition(
        &self,
        definition: FlowDefinition,
        input: Value,
    ) -> Result<Execution, FlowError> {
        let graph = Arc::new(FlowGraph::new(definition)?);
        self.spawn_graph(graph, input).await.wait().await
    }

    /// Request cancellation. Takes effect at the next step boundary.
    pub async fn cancel(&self, execution_id: ExecutionId) -> Result<(), FlowError> {
        let table = self.executions.read().await;
        let active = table
            .active
            .get(&execution_id)
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))?;
        tracing::info!(%execution_id, "Cancelling execution");
        active.cancel.cancel();
        Ok(())
    }

    /// Current snapshot of a running or finished execution
    pub async fn execution(&self, execution_id: ExecutionId) -> Result<Execution, FlowError> {
        let table = self.executions.read().await;
        if let Some(active) = table.active.get(&execution_id) {
            return Ok(active.snapshot.borrow().clone());
        }
        table
            .finished
            .get(&execution_id)
            .cloned()
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))
    }

    pub async fn active_executions(&self) -> Vec<ExecutionId> {
        self.executions.read().await.active.keys().copied().collect()
    }

    /// Drop a finished execution record. Its trace stays with the recorder
    /// until evicted.
    pub async fn forget(&self, execution_id: ExecutionId) -> bool {
        self.executions.write().await.forget(execution_id)
    }

    pub async fn trace(&self, execution_id: ExecutionId) -> Result<Vec<TraceStep>, FlowError> {
        self.recorder.read(execution_id).await
    }

    pub fn trace_stream(
        &self,
        execution_id: ExecutionId,
    ) -> BoxStream<'_, Result<TraceStep, FlowError>> {
        self.recorder.stream(execution_id)
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<HookEvent> {
        self.broadcast.subscribe()
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// Start the periodic metrics flush at the configured interval
    pub fn start_metrics_flush(
        &self,
        sink: Option<mpsc::UnboundedSender<MetricsSnapshot>>,
    ) -> AggregatorHandle {
        self.metrics
            .spawn_flush(self.config.metrics_flush_interval(), sink)
    }
}

pub struct FlowRuntimeBuilder {
    dispatcher: Arc<dyn Dispatcher>,
    config: RuntimeConfig,
    recorder: Option<Arc<dyn TraceRecorder>>,
    hooks: Vec<Arc<dyn ExecutionHook>>,
}

impl FlowRuntimeBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn TraceRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Add a hook after the built-in logging, broadcast and metrics hooks.
    pub fn hook(mut self, hook: Arc<dyn ExecutionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn build(self) -> FlowRuntime {
        let recorder = self
            .recorder
            .unwrap_or_else(|| Arc::new(MemoryTraceRecorder::new()));
        let broadcast = Arc::new(BroadcastHook::new(self.config.event_buffer_size.max(1)));
        let metrics = Arc::new(MetricsAggregator::new());

        let mut hooks = HookSet::new()
            .with(Arc::new(LoggingHook))
            .with(broadcast.clone())
            .with(metrics.clone());
        for hook in self.hooks {
            hooks.push(hook);
        }

        let engine = Arc::new(ExecutionEngine::new(
            self.config.engine.clone(),
            self.dispatcher,
            Arc::clone(&recorder),
            hooks,
        ));

        FlowRuntime {
            config: self.config,
            engine,
            recorder,
            broadcast,
            metrics,
            flows: RwLock::new(HashMap::new()),
            executions: Arc::new(RwLock::new(ExecutionTable::default())),
        }
    }
}

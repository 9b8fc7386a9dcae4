use crate::config::EngineConfig;
use crate::recorder::TraceRecorder;
use crate::retry::with_retry;
use flowcore::{
    last_agent_execution, Action, AgentContext, AgentRef, Decision, Dispatcher, Edge, EdgeKind,
    Execution, ExecutionStatus, FlowError, FlowGraph, GraphError, HookEvent, HookSet, Node,
    NodeKind, StepType, ToolCall, ToolRef, TraceDecision, TraceStep, Value,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Drives executions of flow graphs to a terminal state.
///
/// The engine itself is stateless between runs and may be shared by any
/// number of concurrent executions; all per-run state lives in the
/// execution record owned by the running call.
pub struct ExecutionEngine {
    config: EngineConfig,
    dispatcher: Arc<dyn Dispatcher>,
    recorder: Arc<dyn TraceRecorder>,
    hooks: HookSet,
}

impl ExecutionEngine {
    pub fn new(
        config: EngineConfig,
        dispatcher: Arc<dyn Dispatcher>,
        recorder: Arc<dyn TraceRecorder>,
        hooks: HookSet,
    ) -> Self {
        Self {
            config,
            dispatcher,
            recorder,
            hooks,
        }
    }

    /// Run a pending execution to completion or failure.
    ///
    /// Returns `Err` only when `execution` is not pending; every fault that
    /// happens during the run is recorded in the returned execution instead.
    pub async fn run(
        &self,
        graph: &FlowGraph,
        execution: Execution,
        cancel: &CancellationToken,
    ) -> Result<Execution, FlowError> {
        self.drive(graph, execution, cancel, None).await
    }

    /// Like [`run`](Self::run), publishing a snapshot of the record to
    /// `observer` after every state change.
    pub async fn run_observed(
        &self,
        graph: &FlowGraph,
        execution: Execution,
        cancel: &CancellationToken,
        observer: &watch::Sender<Execution>,
    ) -> Result<Execution, FlowError> {
        self.drive(graph, execution, cancel, Some(observer)).await
    }

    /// Settle a run that stopped without reaching a terminal state, e.g.
    /// because its task panicked. `last_seen` is the latest published
    /// snapshot; the trace is reloaded from the recorder before the error
    /// step is appended.
    pub async fn abandon(&self, mut last_seen: Execution, error: FlowError) -> Execution {
        if last_seen.is_terminal() {
            return last_seen;
        }
        tracing::error!(
            execution_id = %last_seen.id,
            error = %error,
            "Execution abandoned"
        );
        if let Ok(steps) = self.recorder.read(last_seen.id).await {
            last_seen.execution_trace = steps;
        }

        let step = TraceStep::draft(StepType::Error)
            .with_output(json!({ "kind": error.kind() }))
            .with_error(error.to_string());
        match self.recorder.append(last_seen.id, step).await {
            Ok(recorded) => {
                last_seen.execution_trace.push(recorded.clone());
                self.hooks.emit(&HookEvent::step(last_seen.id, recorded));
            }
            Err(e) => tracing::error!(
                execution_id = %last_seen.id,
                error = %e,
                "Could not record error step"
            ),
        }

        if last_seen.status == ExecutionStatus::Pending {
            let _ = last_seen.mark_running();
        }
        if let Err(e) = last_seen.fail(&error) {
            tracing::error!(
                execution_id = %last_seen.id,
                error = %e,
                "Could not mark execution failed"
            );
        }
        self.hooks.emit(&HookEvent::finished(&last_seen));
        last_seen
    }

    async fn drive(
        &self,
        graph: &FlowGraph,
        execution: Execution,
        cancel: &CancellationToken,
        observer: Option<&watch::Sender<Execution>>,
    ) -> Result<Execution, FlowError> {
        let started = Instant::now();
        let cursor = Cursor::new(graph.start().id.clone(), execution.input.clone());
        let mut run = Run {
            engine: self,
            graph,
            execution,
            cancel,
            observer,
            cursor,
        };

        run.begin().await?;
        tracing::info!(
            execution_id = %run.execution.id,
            flow_id = %graph.id(),
            "Starting flow execution"
        );

        if !run.execution.is_terminal() {
            match run.walk().await {
                Ok(()) => run.finish(),
                Err(error) => run.fail(error).await,
            }
        }

        tracing::info!(
            execution_id = %run.execution.id,
            status = %run.execution.status,
            steps = run.execution.execution_trace.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Flow execution finished"
        );
        Ok(run.execution)
    }
}

/// Where control currently sits, and what the node there will see.
#[derive(Debug, Clone)]
struct Cursor {
    node_id: String,
    payload: Value,
    tool_results: Vec<ToolCall>,
    delegated_by: Option<String>,
}

impl Cursor {
    fn new(node_id: String, payload: Value) -> Self {
        Self {
            node_id,
            payload,
            tool_results: Vec::new(),
            delegated_by: None,
        }
    }

    fn move_to(&mut self, node_id: &str, payload: Value) {
        self.node_id = node_id.to_string();
        self.payload = payload;
        self.tool_results.clear();
        self.delegated_by = None;
    }
}

/// One execution in flight. Sole owner and writer of its record.
struct Run<'a> {
    engine: &'a ExecutionEngine,
    graph: &'a FlowGraph,
    execution: Execution,
    cancel: &'a CancellationToken,
    observer: Option<&'a watch::Sender<Execution>>,
    cursor: Cursor,
}

impl<'a> Run<'a> {
    /// Pending to running, plus the start step. A failure to record the
    /// start step fails the run in place.
    async fn begin(&mut self) -> Result<(), FlowError> {
        self.execution.mark_running()?;
        self.publish();

        let start = TraceStep::draft(StepType::Start)
            .with_input(self.execution.input.clone())
            .with_output(json!({
                "flow_id": self.graph.id(),
                "node": self.graph.start().id,
            }));
        if let Err(error) = self.append(start).await {
            self.fail(error).await;
            return Ok(());
        }
        self.engine.hooks.emit(&HookEvent::started(&self.execution));
        Ok(())
    }

    async fn walk(&mut self) -> Result<(), FlowError> {
        let graph = self.graph;
        let budget = self.engine.config.max_steps;
        let mut step_count = 0usize;

        loop {
            step_count += 1;
            if step_count > budget {
                return Err(FlowError::StepBudgetExceeded { budget });
            }
            if self.cancel.is_cancelled() {
                return Err(FlowError::Cancelled);
            }

            let node = graph.resolve(&self.cursor.node_id)?;
            tracing::debug!(
                execution_id = %self.execution.id,
                node = %node.id,
                kind = node.kind.name(),
                step_count,
                "Visiting node"
            );

            match &node.kind {
                NodeKind::Start => {
                    let edge = graph
                        .first_edge(&node.id, EdgeKind::Initial)
                        .or_else(|| graph.first_edge(&node.id, EdgeKind::Default))
                        .ok_or_else(|| GraphError::no_edge(&node.id, "initial"))?;
                    let payload = self.cursor.payload.clone();
                    self.cursor.move_to(&edge.target, payload);
                }
                NodeKind::End => {
                    let result = self.cursor.payload.clone();
                    let complete = TraceStep::draft(StepType::Complete)
                        .with_input(result.clone())
                        .with_output(result.clone());
                    self.append(complete).await?;
                    self.execution.complete(result)?;
                    return Ok(());
                }
                NodeKind::Agent { agent } => self.visit_agent(node, agent).await?,
                NodeKind::Tool { tool, parameters } => {
                    self.visit_tool(node, tool, parameters).await?
                }
                NodeKind::Router { selector } => {
                    let payload = self.cursor.payload.clone();
                    let selected = match selector {
                        Some(pointer) => payload.pointer(pointer),
                        None => Some(&payload),
                    };
                    let edge = graph
                        .outgoing_edges(&node.id)
                        .find(|e| e.accepts(selected))
                        .ok_or_else(|| GraphError::no_edge(&node.id, "router"))?;
                    tracing::debug!(router = %node.id, target = %edge.target, "Route selected");
                    let target = edge.target.clone();
                    self.cursor.move_to(&target, payload);
                }
            }
        }
    }

    async fn visit_agent(
        &mut self,
        node: &'a Node,
        agent: &'a AgentRef,
    ) -> Result<(), FlowError> {
        let ctx = AgentContext {
            execution_id: self.execution.id,
            node_id: node.id.clone(),
            input: self.execution.input.clone(),
            payload: self.cursor.payload.clone(),
            tool_results: self.cursor.tool_results.clone(),
            delegated_by: self.cursor.delegated_by.clone(),
        };

        let decision = self.invoke_agent(agent, &ctx).await?;
        let executed = TraceStep::draft(StepType::AgentExecution)
            .with_agent(&agent.id, node.display_name())
            .with_decision(TraceDecision::from(&decision))
            .with_input(ctx.payload.clone())
            .with_output(decision.output.clone());
        self.append(executed).await?;

        match decision.action {
            Action::Respond => {
                let edge = self.flow_edge(node)?;
                self.cursor.move_to(&edge.target, decision.output);
            }
            Action::Delegate => self.delegate(node, agent, decision).await?,
            Action::UseTool => self.agent_tool_call(node, agent, decision).await?,
        }
        Ok(())
    }

    async fn delegate(
        &mut self,
        node: &Node,
        agent: &AgentRef,
        decision: Decision,
    ) -> Result<(), FlowError> {
        let target = decision
            .target
            .clone()
            .ok_or_else(|| flowcore::DispatchError::malformed_decision("missing target"))?;

        let origin = last_agent_execution(&self.execution.execution_trace);
        let agent_id = origin.and_then(|s| s.agent_id.clone());
        let agent_name = origin.and_then(|s| s.agent_name.clone());
        let handoff = if decision.output.is_null() {
            self.cursor.payload.clone()
        } else {
            decision.output.clone()
        };

        let delegation = TraceStep::draft(StepType::Delegation)
            .with_attribution(agent_id, agent_name)
            .with_decision(TraceDecision::from(&decision))
            .with_input(handoff.clone())
            .with_output(Value::String(target.clone()));
        self.append(delegation).await?;

        let edge = self
            .graph
            .delegation_edge(&node.id, &target)
            .ok_or_else(|| GraphError::no_edge_to(&node.id, "delegation", &target))?;
        tracing::debug!(from = %node.id, to = %edge.target, "Delegating");

        self.cursor.move_to(&edge.target, handoff);
        self.cursor.delegated_by = Some(agent.id.clone());
        Ok(())
    }

    /// Tool call requested by the agent in control. Control stays with the
    /// agent, which sees the result on its next invocation.
    async fn agent_tool_call(
        &mut self,
        node: &Node,
        agent: &AgentRef,
        decision: Decision,
    ) -> Result<(), FlowError> {
        let tool_name = decision
            .tool_name
            .clone()
            .ok_or_else(|| flowcore::DispatchError::malformed_decision("missing tool name"))?;
        let params = decision.tool_params.clone().unwrap_or(Value::Null);
        let tool = self
            .graph
            .tool_node(&node.id, &tool_name)
            .and_then(Node::tool_ref)
            .cloned()
            .unwrap_or_else(|| ToolRef::new(&tool_name));

        let step = TraceStep::draft(StepType::ToolExecution)
            .with_agent(&agent.id, node.display_name())
            .with_decision(TraceDecision::from(&decision))
            .with_input(params.clone());
        let result = self.call_tool(&tool, &params, step).await?;

        self.cursor.tool_results.push(ToolCall {
            tool_name,
            parameters: params,
            result,
        });
        Ok(())
    }

    /// Tool node reached through the graph itself.
    async fn visit_tool(
        &mut self,
        node: &Node,
        tool: &ToolRef,
        template: &Value,
    ) -> Result<(), FlowError> {
        let params = render_params(template, &self.cursor.payload);
        let step = TraceStep::draft(StepType::ToolExecution)
            .with_decision(TraceDecision {
                action: Action::UseTool,
                target: Some(node.id.clone()),
                tool_name: Some(tool.name.clone()),
                reasoning: None,
                tool_params: Some(params.clone()),
            })
            .with_input(params.clone());
        let result = self.call_tool(tool, &params, step).await?;

        let edge = self.flow_edge(node)?;
        self.cursor.move_to(&edge.target, result);
        Ok(())
    }

    /// Invoke a tool and record call and result as one step.
    async fn call_tool(
        &mut self,
        tool: &ToolRef,
        params: &Value,
        step: TraceStep,
    ) -> Result<Value, FlowError> {
        let dispatcher = &self.engine.dispatcher;
        let outcome = with_retry(
            &self.engine.config.retry,
            self.engine.config.dispatch_timeout(),
            self.cancel,
            &tool.name,
            || dispatcher.invoke_tool(tool, params),
        )
        .await;

        match outcome {
            Ok(result) => {
                self.append(step.with_output(result.clone())).await?;
                Ok(result)
            }
            Err(FlowError::Dispatch(e)) => {
                self.append(step.with_error(e.to_string())).await?;
                Err(FlowError::Dispatch(e))
            }
            Err(other) => Err(other),
        }
    }

    async fn invoke_agent(
        &self,
        agent: &AgentRef,
        ctx: &AgentContext,
    ) -> Result<Decision, FlowError> {
        let dispatcher = &self.engine.dispatcher;
        let decision = with_retry(
            &self.engine.config.retry,
            self.engine.config.dispatch_timeout(),
            self.cancel,
            &agent.id,
            || dispatcher.invoke_agent(agent, ctx),
        )
        .await?;
        decision.validate()?;
        Ok(decision)
    }

    /// Edge taken when a node finishes normally.
    fn flow_edge(&self, node: &Node) -> Result<&'a Edge, FlowError> {
        self.graph
            .outgoing_edges(&node.id)
            .find(|e| matches!(e.kind, EdgeKind::Default | EdgeKind::Final))
            .ok_or_else(|| GraphError::no_edge(&node.id, "default or final").into())
    }

    async fn append(&mut self, step: TraceStep) -> Result<(), FlowError> {
        let recorded = self.engine.recorder.append(self.execution.id, step).await?;
        let expected = self.execution.execution_trace.len() as u64 + 1;
        if recorded.step != expected {
            return Err(FlowError::SequenceViolation {
                expected,
                actual: recorded.step,
            });
        }
        self.execution.execution_trace.push(recorded.clone());
        self.publish();
        self.engine
            .hooks
            .emit(&HookEvent::step(self.execution.id, recorded));
        Ok(())
    }

    fn finish(&mut self) {
        self.publish();
        self.engine.hooks.emit(&HookEvent::finished(&self.execution));
    }

    /// Record `error` as the terminal outcome of the run.
    async fn fail(&mut self, error: FlowError) {
        if self.execution.is_terminal() {
            tracing::error!(
                execution_id = %self.execution.id,
                error = %error,
                "Failure after execution already finished"
            );
            return;
        }
        tracing::warn!(
            execution_id = %self.execution.id,
            node = %self.cursor.node_id,
            kind = %error.kind(),
            error = %error,
            "Flow execution failed"
        );

        let mut step = TraceStep::draft(StepType::Error)
            .with_input(self.cursor.payload.clone())
            .with_output(json!({
                "node": self.cursor.node_id,
                "kind": error.kind(),
            }))
            .with_error(error.to_string());
        if let Ok(node) = self.graph.resolve(&self.cursor.node_id) {
            if let Some(agent) = node.agent_ref() {
                step = step.with_agent(&agent.id, node.display_name());
            }
        }
        if let Err(e) = self.append(step).await {
            tracing::error!(
                execution_id = %self.execution.id,
                error = %e,
                "Could not record error step"
            );
        }

        if let Err(e) = self.execution.fail(&error) {
            tracing::error!(
                execution_id = %self.execution.id,
                error = %e,
                "Could not mark execution failed"
            );
        }
        self.finish();
    }

    fn publish(&self) {
        if let Some(observer) = self.observer {
            observer.send_replace(self.execution.clone());
        }
    }
}

/// Fill a tool parameter template from the current payload.
///
/// A string of the exact form `"{{/json/pointer}}"` becomes the value at that
/// pointer (null when absent); other values pass through. A null template
/// passes the whole payload.
pub fn render_params(template: &Value, payload: &Value) -> Value {
    if template.is_null() {
        return payload.clone();
    }
    render(template, payload)
}

fn render(value: &Value, payload: &Value) -> Value {
    match value {
        Value::String(s) => match s.strip_prefix("{{").and_then(|r| r.strip_suffix("}}")) {
            Some(pointer) => payload.pointer(pointer.trim()).cloned().unwrap_or(Value::Null),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| render(v, payload)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render(v, payload)))
                .collect(),
        ),
        other => other.clone(),
    }
}

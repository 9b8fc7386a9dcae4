// crates/flowruntime/tests/engine_test.rs

use async_trait::async_trait;
use flowcore::{
    AgentContext, AgentRef, Decision, DispatchError, Dispatcher, Edge, EdgeKind, ErrorKind,
    EventKind, Execution, ExecutionHook, ExecutionStatus, FlowDefinition, FlowGraph, Guard,
    HookError, HookEvent, HookSet, Node, NodeKind, StepType, ToolRef, Value,
};
use flowruntime::{
    EngineConfig, ExecutionEngine, MemoryTraceRecorder, RetryPolicy, TraceRecorder,
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

type Scripted<T> = Result<T, DispatchError>;

/// Dispatcher replaying scripted agent decisions and tool results.
/// The last scripted entry for an agent or tool repeats once the rest are
/// consumed.
#[derive(Default)]
struct MockDispatcher {
    agents: Mutex<HashMap<String, VecDeque<Scripted<Decision>>>>,
    tools: Mutex<HashMap<String, VecDeque<Scripted<Value>>>>,
    agent_calls: AtomicUsize,
    tool_calls: AtomicUsize,
    contexts: Mutex<Vec<AgentContext>>,
}

impl MockDispatcher {
    fn agent(self, id: &str, script: Vec<Scripted<Decision>>) -> Self {
        self.agents
            .lock()
            .unwrap()
            .insert(id.to_string(), script.into());
        self
    }

    fn tool(self, name: &str, result: Scripted<Value>) -> Self {
        self.tool_script(name, vec![result])
    }

    fn tool_script(self, name: &str, script: Vec<Scripted<Value>>) -> Self {
        self.tools
            .lock()
            .unwrap()
            .insert(name.to_string(), script.into());
        self
    }

    fn contexts(&self) -> Vec<AgentContext> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn invoke_agent(
        &self,
        agent: &AgentRef,
        ctx: &AgentContext,
    ) -> Result<Decision, DispatchError> {
        self.agent_calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(ctx.clone());
        let mut agents = self.agents.lock().unwrap();
        let script = agents
            .get_mut(&agent.id)
            .ok_or_else(|| DispatchError::unknown_agent(&agent.id))?;
        next_scripted(script)
    }

    async fn invoke_tool(&self, tool: &ToolRef, _params: &Value) -> Result<Value, DispatchError> {
        self.tool_calls.fetch_add(1, Ordering::SeqCst);
        let mut tools = self.tools.lock().unwrap();
        let script = tools
            .get_mut(&tool.name)
            .ok_or_else(|| DispatchError::unknown_tool(&tool.name))?;
        next_scripted(script)
    }
}

fn next_scripted<T: Clone>(script: &mut VecDeque<Scripted<T>>) -> Scripted<T> {
    match script.len() {
        0 => Err(DispatchError::fatal("empty script")),
        1 => script[0].clone(),
        _ => script.pop_front().unwrap(),
    }
}

/// Records the kind of every event it sees; optionally fails on each one.
#[derive(Default)]
struct CollectingHook {
    kinds: Mutex<Vec<EventKind>>,
    fail: bool,
}

impl ExecutionHook for CollectingHook {
    fn name(&self) -> &str {
        "collecting"
    }

    fn on_event(&self, event: &HookEvent) -> Result<(), HookError> {
        self.kinds.lock().unwrap().push(event.kind);
        if self.fail {
            return Err(HookError::new("collecting", "sink unavailable"));
        }
        Ok(())
    }
}

struct Harness {
    engine: ExecutionEngine,
    recorder: Arc<MemoryTraceRecorder>,
    dispatcher: Arc<MockDispatcher>,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn config(max_steps: usize) -> EngineConfig {
    EngineConfig {
        max_steps,
        dispatch_timeout_ms: Some(5_000),
        retry: RetryPolicy::immediate(3),
    }
}

fn harness(dispatcher: MockDispatcher, config: EngineConfig, hooks: HookSet) -> Harness {
    init_tracing();
    let recorder = Arc::new(MemoryTraceRecorder::new());
    let dispatcher = Arc::new(dispatcher);
    let engine = ExecutionEngine::new(config, dispatcher.clone(), recorder.clone(), hooks);
    Harness {
        engine,
        recorder,
        dispatcher,
    }
}

async fn run(h: &Harness, definition: FlowDefinition, input: Value) -> Execution {
    let graph = FlowGraph::new(definition).unwrap();
    let execution = Execution::new(graph.id(), graph.framework(), input);
    h.engine
        .run(&graph, execution, &CancellationToken::new())
        .await
        .unwrap()
}

fn step_types(exec: &Execution) -> Vec<StepType> {
    exec.execution_trace.iter().map(|s| s.step_type).collect()
}

fn linear() -> FlowDefinition {
    FlowDefinition::new("linear", "Linear")
        .node(Node::start("start"))
        .node(Node::agent("a", "agent-a").with_name("Agent A"))
        .node(Node::end("end"))
        .connect("start", "a", EdgeKind::Initial)
        .connect("a", "end", EdgeKind::Final)
}

fn delegating() -> FlowDefinition {
    FlowDefinition::new("delegating", "Delegating")
        .node(Node::start("start"))
        .node(Node::agent("a", "agent-a").with_name("Agent A"))
        .node(Node::agent("b", "agent-b").with_name("Agent B"))
        .node(Node::end("end"))
        .connect("start", "a", EdgeKind::Initial)
        .connect("a", "b", EdgeKind::Delegation)
        .connect("a", "end", EdgeKind::Final)
        .connect("b", "end", EdgeKind::Final)
}

#[tokio::test]
async fn test_linear_respond_completes() {
    let dispatcher = MockDispatcher::default().agent(
        "agent-a",
        vec![Ok(Decision::respond(json!({"answer": 42})))],
    );
    let h = harness(dispatcher, config(100), HookSet::new());

    let exec = run(&h, linear(), json!({"q": "hi"})).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(
        step_types(&exec),
        [StepType::Start, StepType::AgentExecution, StepType::Complete]
    );
    assert_eq!(exec.result, Some(json!({"answer": 42})));
    assert_eq!(exec.execution_trace[1].agent_id.as_deref(), Some("agent-a"));
    assert_eq!(exec.execution_trace[1].agent_name.as_deref(), Some("Agent A"));
    assert_eq!(exec.execution_trace[1].input, json!({"q": "hi"}));
    assert!(exec.completed_at.is_some());
    assert!(exec.error.is_none());
}

#[tokio::test]
async fn test_delegation_is_attributed_to_delegating_agent() {
    let dispatcher = MockDispatcher::default()
        .agent("agent-a", vec![Ok(Decision::delegate("agent-b", json!("over to b")))])
        .agent("agent-b", vec![Ok(Decision::respond(json!("done by b")))]);
    let h = harness(dispatcher, config(100), HookSet::new());

    let exec = run(&h, delegating(), json!({"q": "hi"})).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(
        step_types(&exec),
        [
            StepType::Start,
            StepType::AgentExecution,
            StepType::Delegation,
            StepType::AgentExecution,
            StepType::Complete
        ]
    );
    let delegation = &exec.execution_trace[2];
    assert_eq!(delegation.agent_id.as_deref(), Some("agent-a"));
    assert_eq!(delegation.decision.as_ref().unwrap().target.as_deref(), Some("agent-b"));
    assert_eq!(exec.result, Some(json!("done by b")));

    let b_ctx = h.dispatcher.contexts().pop().unwrap();
    assert_eq!(b_ctx.node_id, "b");
    assert_eq!(b_ctx.payload, json!("over to b"));
    assert_eq!(b_ctx.delegated_by.as_deref(), Some("agent-a"));
}

#[tokio::test]
async fn test_consecutive_delegations_keep_attribution() {
    let definition = FlowDefinition::new("chain", "Chain")
        .node(Node::start("start"))
        .node(Node::agent("a", "agent-a"))
        .node(Node::agent("b", "agent-b"))
        .node(Node::agent("c", "agent-c"))
        .node(Node::end("end"))
        .connect("start", "a", EdgeKind::Initial)
        .connect("a", "b", EdgeKind::Delegation)
        .connect("b", "c", EdgeKind::Delegation)
        .connect("c", "end", EdgeKind::Final);
    let dispatcher = MockDispatcher::default()
        .agent("agent-a", vec![Ok(Decision::delegate("b", Value::Null))])
        .agent("agent-b", vec![Ok(Decision::delegate("c", Value::Null))])
        .agent("agent-c", vec![Ok(Decision::respond(json!("c")))]);
    let h = harness(dispatcher, config(100), HookSet::new());

    let exec = run(&h, definition, json!("task")).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    for (i, step) in exec.execution_trace.iter().enumerate() {
        if step.step_type == StepType::Delegation {
            let origin = flowcore::last_agent_execution(&exec.execution_trace[..i]).unwrap();
            assert_eq!(step.agent_id, origin.agent_id);
        }
    }
    let delegators: Vec<_> = exec
        .execution_trace
        .iter()
        .filter(|s| s.step_type == StepType::Delegation)
        .map(|s| s.agent_id.clone().unwrap())
        .collect();
    assert_eq!(delegators, ["agent-a", "agent-b"]);
    // Null delegation output hands the current payload through.
    assert_eq!(h.dispatcher.contexts()[2].payload, json!("task"));
}

#[tokio::test]
async fn test_use_tool_records_single_step() {
    let definition = linear()
        .node(Node::tool("search", "search"))
        .connect("a", "search", EdgeKind::Tool);
    let dispatcher = MockDispatcher::default()
        .agent(
            "agent-a",
            vec![
                Ok(Decision::use_tool("search", json!({"q": "x"})).with_reasoning("need facts")),
                Ok(Decision::respond(json!("answered"))),
            ],
        )
        .tool("search", Ok(json!({"hits": ["rust"]})));
    let h = harness(dispatcher, config(100), HookSet::new());

    let exec = run(&h, definition, json!({"q": "x"})).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(
        step_types(&exec),
        [
            StepType::Start,
            StepType::AgentExecution,
            StepType::ToolExecution,
            StepType::AgentExecution,
            StepType::Complete
        ]
    );
    let tool_step = &exec.execution_trace[2];
    let decision = tool_step.decision.as_ref().unwrap();
    assert_eq!(decision.tool_name.as_deref(), Some("search"));
    assert_eq!(decision.tool_params, Some(json!({"q": "x"})));
    assert_eq!(tool_step.input, json!({"q": "x"}));
    assert_eq!(tool_step.output, json!({"hits": ["rust"]}));
    assert_eq!(h.dispatcher.tool_calls.load(Ordering::SeqCst), 1);

    let second = &h.dispatcher.contexts()[1];
    assert_eq!(second.node_id, "a");
    assert_eq!(second.tool_results.len(), 1);
    assert_eq!(second.tool_results[0].result, json!({"hits": ["rust"]}));
}

#[tokio::test]
async fn test_transient_agent_failures_are_invisible() {
    let dispatcher = MockDispatcher::default().agent(
        "agent-a",
        vec![
            Err(DispatchError::transient("rate limited")),
            Err(DispatchError::transient("rate limited")),
            Ok(Decision::respond(json!("third time"))),
        ],
    );
    let h = harness(dispatcher, config(100), HookSet::new());

    let exec = run(&h, linear(), json!({})).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(h.dispatcher.agent_calls.load(Ordering::SeqCst), 3);
    let agent_steps = exec
        .execution_trace
        .iter()
        .filter(|s| s.step_type == StepType::AgentExecution)
        .count();
    assert_eq!(agent_steps, 1);
}

#[tokio::test]
async fn test_transient_tool_failures_are_invisible() {
    let definition = linear()
        .node(Node::tool("search", "search"))
        .connect("a", "search", EdgeKind::Tool);
    let dispatcher = MockDispatcher::default()
        .agent(
            "agent-a",
            vec![
                Ok(Decision::use_tool("search", json!({"q": "x"}))),
                Ok(Decision::respond(json!("answered"))),
            ],
        )
        .tool_script(
            "search",
            vec![
                Err(DispatchError::transient("connection reset")),
                Err(DispatchError::transient("connection reset")),
                Ok(json!({"hits": 3})),
            ],
        );
    let h = harness(dispatcher, config(100), HookSet::new());

    let exec = run(&h, definition, json!({})).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(h.dispatcher.tool_calls.load(Ordering::SeqCst), 3);
    let tool_steps: Vec<_> = exec
        .execution_trace
        .iter()
        .filter(|s| s.step_type == StepType::ToolExecution)
        .collect();
    assert_eq!(tool_steps.len(), 1);
    assert_eq!(tool_steps[0].output, json!({"hits": 3}));
    assert!(tool_steps[0].error.is_none());
    assert_eq!(h.dispatcher.contexts()[1].tool_results[0].result, json!({"hits": 3}));
}

#[tokio::test]
async fn test_exhausted_retries_fail_with_error_step() {
    let dispatcher = MockDispatcher::default()
        .agent("agent-a", vec![Err(DispatchError::transient("upstream 503"))]);
    let h = harness(dispatcher, config(100), HookSet::new());

    let exec = run(&h, linear(), json!({})).await;

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error_kind(), Some(ErrorKind::DispatchTransient));
    assert_eq!(h.dispatcher.agent_calls.load(Ordering::SeqCst), 3);
    assert_eq!(step_types(&exec), [StepType::Start, StepType::Error]);
    assert_eq!(exec.execution_trace[1].agent_id.as_deref(), Some("agent-a"));
}

#[tokio::test]
async fn test_fatal_tool_failure_fails_execution() {
    let dispatcher = MockDispatcher::default()
        .agent("agent-a", vec![Ok(Decision::use_tool("search", json!({"q": "x"})))])
        .tool("search", Err(DispatchError::fatal("bad request")));
    let h = harness(dispatcher, config(100), HookSet::new());

    let exec = run(&h, linear(), json!({})).await;

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error_kind(), Some(ErrorKind::DispatchFatal));
    assert!(exec.completed_at.is_some());
    assert!(exec.error.as_deref().unwrap().contains("bad request"));
    assert_eq!(h.dispatcher.tool_calls.load(Ordering::SeqCst), 1);

    let last = exec.execution_trace.last().unwrap();
    assert_eq!(last.step_type, StepType::Error);
    assert_eq!(last.output["kind"], "dispatch_fatal");
    let tool_step = &exec.execution_trace[exec.execution_trace.len() - 2];
    assert_eq!(tool_step.step_type, StepType::ToolExecution);
    assert!(tool_step.error.is_some());
}

#[tokio::test]
async fn test_malformed_decision_is_not_retried() {
    let mut bad = Decision::delegate("b", Value::Null);
    bad.target = None;
    let dispatcher = MockDispatcher::default().agent("agent-a", vec![Ok(bad)]);
    let h = harness(dispatcher, config(100), HookSet::new());

    let exec = run(&h, delegating(), json!({})).await;

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error_kind(), Some(ErrorKind::DispatchFatal));
    assert_eq!(h.dispatcher.agent_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_delegation_without_edge_fails() {
    let dispatcher = MockDispatcher::default()
        .agent("agent-a", vec![Ok(Decision::delegate("agent-z", Value::Null))]);
    let h = harness(dispatcher, config(100), HookSet::new());

    let exec = run(&h, delegating(), json!({})).await;

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error_kind(), Some(ErrorKind::NoMatchingEdge));
    assert_eq!(
        step_types(&exec),
        [
            StepType::Start,
            StepType::AgentExecution,
            StepType::Delegation,
            StepType::Error
        ]
    );
}

#[tokio::test]
async fn test_self_loop_exceeds_step_budget() {
    let definition = FlowDefinition::new("loop", "Loop")
        .node(Node::start("start"))
        .node(Node::end("end"))
        .connect("start", "start", EdgeKind::Initial);
    let h = harness(MockDispatcher::default(), config(25), HookSet::new());

    let exec = run(&h, definition, json!({})).await;

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error_kind(), Some(ErrorKind::StepBudgetExceeded));
    assert_eq!(step_types(&exec), [StepType::Start, StepType::Error]);
}

#[tokio::test]
async fn test_respond_only_run_is_bounded_by_shortest_path() {
    let definition = FlowDefinition::new("pipeline", "Pipeline")
        .node(Node::start("start"))
        .node(Node::agent("a", "agent-a"))
        .node(Node::agent("b", "agent-b"))
        .node(Node::end("end"))
        .connect("start", "a", EdgeKind::Initial)
        .connect("a", "b", EdgeKind::Default)
        .connect("b", "end", EdgeKind::Final);
    let path = FlowGraph::new(definition.clone())
        .unwrap()
        .shortest_path_len("start", "end")
        .unwrap();
    assert_eq!(path, 3);

    let script = || {
        MockDispatcher::default()
            .agent("agent-a", vec![Ok(Decision::respond(json!("a")))])
            .agent("agent-b", vec![Ok(Decision::respond(json!("b")))])
    };

    // One loop iteration per node on the path, end node included.
    let h = harness(script(), config(path + 1), HookSet::new());
    let exec = run(&h, definition.clone(), json!({})).await;
    assert_eq!(exec.status, ExecutionStatus::Completed);

    let h = harness(script(), config(path), HookSet::new());
    let exec = run(&h, definition, json!({})).await;
    assert_eq!(exec.error_kind(), Some(ErrorKind::StepBudgetExceeded));
}

#[tokio::test]
async fn test_trace_is_contiguous_and_rereadable() {
    let dispatcher = MockDispatcher::default()
        .agent(
            "agent-a",
            vec![
                Ok(Decision::use_tool("lookup", json!({}))),
                Ok(Decision::use_tool("lookup", json!({}))),
                Ok(Decision::delegate("b", json!("ctx"))),
            ],
        )
        .agent("agent-b", vec![Ok(Decision::respond(json!("ok")))])
        .tool("lookup", Ok(json!(1)));
    let h = harness(dispatcher, config(100), HookSet::new());

    let exec = run(&h, delegating(), json!({})).await;

    let numbers: Vec<u64> = exec.execution_trace.iter().map(|s| s.step).collect();
    let expected: Vec<u64> = (1..=exec.execution_trace.len() as u64).collect();
    assert_eq!(numbers, expected);

    let first = h.recorder.read(exec.id).await.unwrap();
    let second = h.recorder.read(exec.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, exec.execution_trace);
}

#[tokio::test]
async fn test_router_takes_first_matching_edge() {
    let definition = FlowDefinition::new("triage", "Triage")
        .node(Node::start("start"))
        .node(Node::router("route", Some("/category")))
        .node(Node::agent("billing", "billing-agent"))
        .node(Node::agent("support", "support-agent"))
        .node(Node::end("end"))
        .connect("start", "route", EdgeKind::Initial)
        .edge(Edge::new("route", "billing", EdgeKind::Default).with_label("billing"))
        .edge(
            Edge::new("route", "support", EdgeKind::Default)
                .with_guard(Guard::Equals { value: json!("support") }),
        )
        .connect("billing", "end", EdgeKind::Final)
        .connect("support", "end", EdgeKind::Final);
    let script = || {
        MockDispatcher::default()
            .agent("billing-agent", vec![Ok(Decision::respond(json!("refund")))])
            .agent("support-agent", vec![Ok(Decision::respond(json!("reset")))])
    };

    let h = harness(script(), config(100), HookSet::new());
    let exec = run(&h, definition.clone(), json!({"category": "support"})).await;
    assert_eq!(exec.result, Some(json!("reset")));

    let h = harness(script(), config(100), HookSet::new());
    let exec = run(&h, definition.clone(), json!({"category": "sales"})).await;
    assert_eq!(exec.error_kind(), Some(ErrorKind::NoMatchingEdge));
}

#[tokio::test]
async fn test_graph_tool_node_runs_with_rendered_params() {
    let mut fetch = Node::tool("fetch", "fetch");
    if let NodeKind::Tool { parameters, .. } = &mut fetch.kind {
        *parameters = json!({"url": "{{/target}}", "method": "GET"});
    }
    let definition = FlowDefinition::new("tooling", "Tooling")
        .node(Node::start("start"))
        .node(fetch)
        .node(Node::end("end"))
        .connect("start", "fetch", EdgeKind::Initial)
        .connect("fetch", "end", EdgeKind::Default);
    let dispatcher = MockDispatcher::default().tool("fetch", Ok(json!({"status": 200})));
    let h = harness(dispatcher, config(100), HookSet::new());

    let exec = run(&h, definition, json!({"target": "http://localhost"})).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    let tool_step = &exec.execution_trace[1];
    assert_eq!(tool_step.step_type, StepType::ToolExecution);
    assert_eq!(tool_step.input, json!({"url": "http://localhost", "method": "GET"}));
    assert_eq!(exec.result, Some(json!({"status": 200})));
}

#[tokio::test]
async fn test_cancellation_between_steps() {
    let dispatcher =
        MockDispatcher::default().agent("agent-a", vec![Ok(Decision::respond(json!("never")))]);
    let h = harness(dispatcher, config(100), HookSet::new());
    let graph = FlowGraph::new(linear()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let exec = h
        .engine
        .run(&graph, Execution::new("linear", "native", json!({})), &cancel)
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(step_types(&exec), [StepType::Start, StepType::Error]);
    assert_eq!(exec.execution_trace[1].output["node"], "start");
    assert_eq!(h.dispatcher.agent_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failing_hook_is_not_fatal() {
    let failing = Arc::new(CollectingHook {
        fail: true,
        ..Default::default()
    });
    let dispatcher =
        MockDispatcher::default().agent("agent-a", vec![Ok(Decision::respond(json!("ok")))]);
    let h = harness(dispatcher, config(100), HookSet::new().with(failing.clone()));

    let exec = run(&h, linear(), json!({})).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    let kinds = failing.kinds.lock().unwrap().clone();
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::Step).count(), 3);
    assert!(kinds.contains(&EventKind::Started));
    assert_eq!(kinds.last(), Some(&EventKind::Completed));
}

#[tokio::test]
async fn test_failed_hook_fires_once() {
    let hook = Arc::new(CollectingHook::default());
    let dispatcher = MockDispatcher::default()
        .agent("agent-a", vec![Err(DispatchError::fatal("model refused"))]);
    let h = harness(dispatcher, config(100), HookSet::new().with(hook.clone()));

    run(&h, linear(), json!({})).await;

    let kinds = hook.kinds.lock().unwrap().clone();
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::Failed).count(), 1);
    assert!(!kinds.contains(&EventKind::Completed));
    assert_eq!(kinds.last(), Some(&EventKind::Failed));
}

#[tokio::test]
async fn test_observer_sees_final_snapshot() {
    let dispatcher =
        MockDispatcher::default().agent("agent-a", vec![Ok(Decision::respond(json!("ok")))]);
    let h = harness(dispatcher, config(100), HookSet::new());
    let graph = FlowGraph::new(linear()).unwrap();
    let execution = Execution::new("linear", "native", json!({}));
    let (tx, rx) = watch::channel(execution.clone());

    let exec = h
        .engine
        .run_observed(&graph, execution, &CancellationToken::new(), &tx)
        .await
        .unwrap();

    assert_eq!(*rx.borrow(), exec);
}

#[tokio::test]
async fn test_rejects_non_pending_execution() {
    let h = harness(MockDispatcher::default(), config(100), HookSet::new());
    let graph = FlowGraph::new(linear()).unwrap();
    let mut execution = Execution::new("linear", "native", json!({}));
    execution.mark_running().unwrap();

    let result = h
        .engine
        .run(&graph, execution, &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(flowcore::FlowError::InvalidTransition { .. })
    ));
}

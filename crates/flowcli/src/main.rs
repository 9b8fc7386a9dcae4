// crates/flowcli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{
    AgentRef, Decision, Edge, EdgeKind, EventKind, EventPayload, ExecutionStatus, FlowDefinition,
    FlowGraph, Guard, Node, NodeKind, StepType, Value,
};
use flowdispatch::{EchoAgent, ScriptedAgent};
use flowruntime::{DispatchRegistry, FlowRuntime, RuntimeConfig};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Agent Flow Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow file
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Runtime configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the per-execution step budget
        #[arg(long)]
        max_steps: Option<usize>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a flow file
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List available tools
    Tools,

    /// Create a new example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            config,
            max_steps,
            verbose,
        } => {
            init_logging(verbose);
            run_flow(file, input, config, max_steps).await?;
        }

        Commands::Validate { file } => {
            validate_flow(file)?;
        }

        Commands::Tools => {
            list_tools();
        }

        Commands::Init { output } => {
            create_example_flow(output)?;
        }
    }

    Ok(())
}

fn load_definition(file: &PathBuf) -> Result<FlowDefinition> {
    let flow_json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    Ok(FlowDefinition::from_json(&flow_json)?)
}

/// Registry with the built-in tools, a scripted agent for every agent node
/// that carries a script, and an echo agent for everything else.
///
/// The scripted agents are returned as well; they must also be installed as
/// runtime hooks to release their cursors when an execution finishes.
fn build_registry(
    definition: &FlowDefinition,
) -> Result<(DispatchRegistry, Vec<Arc<ScriptedAgent>>)> {
    let mut registry = DispatchRegistry::new();
    flowdispatch::register_all(&mut registry);

    let mut scripted = Vec::new();
    for agent in definition.nodes.iter().filter_map(Node::agent_ref) {
        if agent.config.get("script").is_some() && !registry.has_agent(&agent.id) {
            let handler = Arc::new(ScriptedAgent::from_config(&agent.id, &agent.config)?);
            registry.register_agent(handler.clone());
            scripted.push(handler);
        }
    }
    registry.set_fallback_agent(Arc::new(EchoAgent::default()));
    Ok((registry, scripted))
}

fn build_runtime(definition: &FlowDefinition, config: RuntimeConfig) -> Result<FlowRuntime> {
    let (registry, scripted) = build_registry(definition)?;
    let mut builder = FlowRuntime::builder(Arc::new(registry)).config(config);
    for agent in scripted {
        builder = builder.hook(agent);
    }
    Ok(builder.build())
}

async fn run_flow(
    file: PathBuf,
    input: Option<String>,
    config: Option<PathBuf>,
    max_steps: Option<usize>,
) -> Result<()> {
    println!("🚀 Loading flow from: {}", file.display());

    let definition = load_definition(&file)?;
    println!("📋 Flow: {}", definition.name);
    println!("   Nodes: {}", definition.nodes.len());
    println!("   Edges: {}", definition.edges.len());
    println!();

    let input: Value = match input {
        Some(input_str) => serde_json::from_str(&input_str).context("input must be valid JSON")?,
        None => json!({}),
    };

    let mut config = match config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    };
    if let Some(max_steps) = max_steps {
        config.engine.max_steps = max_steps;
    }

    let runtime = build_runtime(&definition, config)?;

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match (&event.kind, &event.payload) {
                (EventKind::Started, _) => {
                    println!("▶️  Execution {} started", event.execution_id)
                }
                (EventKind::Step, EventPayload::Step(step)) => {
                    let agent = step.agent_name.as_deref().unwrap_or("-");
                    match step.step_type {
                        StepType::Start => println!("  🏁 [{}] start", step.step),
                        StepType::AgentExecution => {
                            println!("  🤖 [{}] {} ran", step.step, agent)
                        }
                        StepType::Delegation => {
                            let target = step
                                .decision
                                .as_ref()
                                .and_then(|d| d.target.as_deref())
                                .unwrap_or("?");
                            println!("  🔀 [{}] {} delegated to {}", step.step, agent, target)
                        }
                        StepType::ToolExecution => {
                            let tool = step
                                .decision
                                .as_ref()
                                .and_then(|d| d.tool_name.as_deref())
                                .unwrap_or("?");
                            println!("  🔧 [{}] tool {}", step.step, tool)
                        }
                        StepType::Error => println!(
                            "  ❌ [{}] {}",
                            step.step,
                            step.error.as_deref().unwrap_or("error")
                        ),
                        StepType::Complete => println!("  ✅ [{}] complete", step.step),
                    }
                }
                (EventKind::Completed, _) => println!("✨ Execution completed successfully"),
                (EventKind::Failed, _) => println!("💥 Execution failed"),
                _ => {}
            }
        }
    });

    let execution = runtime.execute_definition(definition, input).await?;

    // Dropping the runtime closes the event channel once drained.
    drop(runtime);
    let _ = event_task.await;

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", execution.id);
    println!("   Status: {}", execution.status);
    println!("   Steps: {}", execution.execution_trace.len());
    if let Some(done) = execution.completed_at {
        println!(
            "   Duration: {}ms",
            (done - execution.started_at).num_milliseconds()
        );
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&execution)?);

    if execution.status == ExecutionStatus::Failed {
        anyhow::bail!(
            "execution failed: {}",
            execution.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn validate_flow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let definition = load_definition(&file)?;
    let graph = FlowGraph::new(definition)?;

    println!("✅ Flow is valid:");
    println!("   Name: {}", graph.name());
    println!("   Nodes: {}", graph.nodes().len());
    println!("   Edges: {}", graph.definition().edges.len());

    let start = graph.start().id.clone();
    let shortest = graph
        .nodes()
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::End))
        .filter_map(|n| graph.shortest_path_len(&start, &n.id))
        .min();
    if let Some(len) = shortest {
        println!("   Shortest path to end: {} edges", len);
    }

    let lints = graph.lints();
    if !lints.is_empty() {
        println!();
        println!("⚠️  Warnings:");
        for lint in lints {
            println!("   • {}", lint);
        }
    }

    Ok(())
}

fn list_tools() {
    println!("📦 Available Tools:");
    println!();

    let mut registry = DispatchRegistry::new();
    flowdispatch::register_all(&mut registry);

    for name in registry.list_tools() {
        if let Some(metadata) = registry.tool_metadata(&name) {
            println!("  • {} ({})", name, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", name);
        }
    }
}

fn example_flow() -> FlowDefinition {
    let research_script = vec![
        Decision::use_tool("echo", json!({"message": "gathering notes"}))
            .with_reasoning("collect notes before writing"),
        Decision::delegate("writer", json!({"notes": "collected"}))
            .with_reasoning("hand the notes to the writer"),
    ];
    let researcher = Node::new(
        "researcher",
        NodeKind::Agent {
            agent: AgentRef::new("researcher").with_config(json!({ "script": research_script })),
        },
    )
    .with_name("Researcher");

    let mut definition = FlowDefinition::new("example", "Example Research Flow")
        .node(Node::start("start"))
        .node(researcher)
        .node(Node::agent("writer", "writer").with_name("Writer"))
        .node(Node::tool("notes", "echo"))
        .node(Node::router("review", Some("/notes")))
        .node(Node::end("end"))
        .connect("start", "researcher", EdgeKind::Initial)
        .connect("researcher", "notes", EdgeKind::Tool)
        .connect("researcher", "writer", EdgeKind::Delegation)
        .connect("writer", "review", EdgeKind::Default)
        .edge(Edge::new("review", "end", EdgeKind::Final).with_guard(Guard::Exists))
        .edge(Edge::new("review", "researcher", EdgeKind::Default));
    definition.description =
        Some("A researcher gathers notes and delegates to a writer".to_string());
    definition
}

fn create_example_flow(output: PathBuf) -> Result<()> {
    let definition = example_flow();
    // Fails here rather than on first run if the example drifts.
    FlowGraph::new(definition.clone())?;

    let json = serde_json::to_string_pretty(&definition)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  flow run --file {} --input '{{\"topic\": \"rust\"}}'",
        output.display()
    );

    Ok(())
}

//! Flow graph model.
//!
//! A [`FlowDefinition`] is the stored, serializable form of a flow. It is
//! validated once into a [`FlowGraph`], which is immutable afterwards and
//! is shared read-only (behind an `Arc`) by every execution of the flow.

use crate::GraphError;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

pub type FlowId = String;
pub type NodeId = String;

/// Reference to the agent capability behind an agent node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
}

impl AgentRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability: None,
            config: Value::Null,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

/// Reference to a tool capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRef {
    pub name: String,
}

impl ToolRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Kind-specific node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    Agent {
        agent: AgentRef,
    },
    Tool {
        tool: ToolRef,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        parameters: Value,
    },
    Router {
        /// JSON pointer into the current payload; edge guards test the
        /// selected value. The whole payload is tested when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    End,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::Agent { .. } => "agent",
            NodeKind::Tool { .. } => "tool",
            NodeKind::Router { .. } => "router",
            NodeKind::End => "end",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
        }
    }

    pub fn start(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Start)
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::End)
    }

    pub fn agent(id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::Agent {
                agent: AgentRef::new(agent_id),
            },
        )
    }

    pub fn tool(id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::Tool {
                tool: ToolRef::new(tool_name),
                parameters: Value::Null,
            },
        )
    }

    pub fn router(id: impl Into<String>, selector: Option<&str>) -> Self {
        Self::new(
            id,
            NodeKind::Router {
                selector: selector.map(str::to_string),
            },
        )
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Display name, falling back to the node id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn agent_ref(&self) -> Option<&AgentRef> {
        match &self.kind {
            NodeKind::Agent { agent } => Some(agent),
            _ => None,
        }
    }

    pub fn tool_ref(&self) -> Option<&ToolRef> {
        match &self.kind {
            NodeKind::Tool { tool, .. } => Some(tool),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Initial,
    Delegation,
    Tool,
    Final,
    Default,
}

impl EdgeKind {
    pub fn name(&self) -> &'static str {
        match self {
            EdgeKind::Initial => "initial",
            EdgeKind::Delegation => "delegation",
            EdgeKind::Tool => "tool",
            EdgeKind::Final => "final",
            EdgeKind::Default => "default",
        }
    }

    /// Edges the engine follows when control simply moves on.
    pub fn is_flow(&self) -> bool {
        matches!(self, EdgeKind::Initial | EdgeKind::Default | EdgeKind::Final)
    }
}

/// Predicate a router evaluates against the selected value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Guard {
    Always,
    Equals { value: Value },
    NotEquals { value: Value },
    Exists,
    Missing,
    Truthy,
    Contains { value: Value },
}

impl Guard {
    pub fn matches(&self, selected: Option<&Value>) -> bool {
        match self {
            Guard::Always => true,
            Guard::Equals { value } => selected == Some(value),
            Guard::NotEquals { value } => selected != Some(value),
            Guard::Exists => selected.is_some_and(|v| !v.is_null()),
            Guard::Missing => selected.map_or(true, Value::is_null),
            Guard::Truthy => selected.is_some_and(is_truthy),
            Guard::Contains { value } => match selected {
                Some(Value::Array(items)) => items.contains(value),
                Some(Value::String(s)) => value.as_str().is_some_and(|needle| s.contains(needle)),
                Some(Value::Object(map)) => value.as_str().is_some_and(|key| map.contains_key(key)),
                _ => false,
            },
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Guard>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
            label: None,
            guard: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Whether a router should take this edge for the selected value.
    ///
    /// A guard wins over a label; an edge with neither is unconditional.
    pub fn accepts(&self, selected: Option<&Value>) -> bool {
        match (&self.guard, &self.label) {
            (Some(guard), _) => guard.matches(selected),
            (None, Some(label)) => selected.and_then(Value::as_str) == Some(label.as_str()),
            (None, None) => true,
        }
    }
}

fn default_framework() -> String {
    "native".to_string()
}

/// Stored flow definition, as read from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: FlowId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_framework")]
    pub framework: String,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl FlowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            framework: default_framework(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        serde_json::from_str(json).map_err(|e| GraphError::InvalidGraph(e.to_string()))
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn connect(self, source: &str, target: &str, kind: EdgeKind) -> Self {
        self.edge(Edge::new(source, target, kind))
    }
}

/// Validated, immutable flow graph.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    definition: FlowDefinition,
    index: HashMap<NodeId, usize>,
    /// Edge positions per source node, in declaration order.
    outgoing: HashMap<NodeId, Vec<usize>>,
    start: usize,
    graph: DiGraph<usize, EdgeKind>,
}

impl FlowGraph {
    pub fn new(definition: FlowDefinition) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(definition.nodes.len());
        let mut starts = Vec::new();
        let mut graph = DiGraph::new();

        for (pos, node) in definition.nodes.iter().enumerate() {
            if index.insert(node.id.clone(), pos).is_some() {
                return Err(GraphError::InvalidGraph(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
            if matches!(node.kind, NodeKind::Start) {
                starts.push(pos);
            }
            graph.add_node(pos);
        }

        let start = match starts.as_slice() {
            [] => return Err(GraphError::InvalidGraph("flow has no start node".to_string())),
            [only] => *only,
            many => {
                return Err(GraphError::InvalidGraph(format!(
                    "flow has {} start nodes",
                    many.len()
                )))
            }
        };

        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (pos, edge) in definition.edges.iter().enumerate() {
            let from = *index.get(&edge.source).ok_or_else(|| {
                GraphError::InvalidGraph(format!("edge references missing node '{}'", edge.source))
            })?;
            let to = *index.get(&edge.target).ok_or_else(|| {
                GraphError::InvalidGraph(format!("edge references missing node '{}'", edge.target))
            })?;
            graph.add_edge(NodeIndex::new(from), NodeIndex::new(to), edge.kind);
            outgoing.entry(edge.source.clone()).or_default().push(pos);
        }

        Ok(Self {
            definition,
            index,
            outgoing,
            start,
            graph,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        Self::new(FlowDefinition::from_json(json)?)
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn framework(&self) -> &str {
        &self.definition.framework
    }

    pub fn definition(&self) -> &FlowDefinition {
        &self.definition
    }

    pub fn nodes(&self) -> &[Node] {
        &self.definition.nodes
    }

    pub fn start(&self) -> &Node {
        &self.definition.nodes[self.start]
    }

    pub fn resolve(&self, node_id: &str) -> Result<&Node, GraphError> {
        self.index
            .get(node_id)
            .map(|pos| &self.definition.nodes[*pos])
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn outgoing_edges(&self, node_id: &str) -> impl Iterator<Item = &Edge> + '_ {
        self.outgoing
            .get(node_id)
            .into_iter()
            .flatten()
            .map(|pos| &self.definition.edges[*pos])
    }

    /// First outgoing edge of the given kind, in declaration order.
    pub fn first_edge(&self, node_id: &str, kind: EdgeKind) -> Option<&Edge> {
        self.outgoing_edges(node_id).find(|e| e.kind == kind)
    }

    /// Delegation edge from `node_id` whose target is `target`, matched by
    /// node id or by the target agent's id.
    pub fn delegation_edge(&self, node_id: &str, target: &str) -> Option<&Edge> {
        self.outgoing_edges(node_id)
            .filter(|e| e.kind == EdgeKind::Delegation)
            .find(|e| {
                e.target == target
                    || self
                        .resolve(&e.target)
                        .ok()
                        .and_then(Node::agent_ref)
                        .is_some_and(|agent| agent.id == target)
            })
    }

    /// Tool node declared behind a `tool` edge from `node_id` for `tool_name`.
    pub fn tool_node(&self, node_id: &str, tool_name: &str) -> Option<&Node> {
        self.outgoing_edges(node_id)
            .filter(|e| e.kind == EdgeKind::Tool)
            .filter_map(|e| self.resolve(&e.target).ok())
            .find(|n| n.tool_ref().is_some_and(|t| t.name == tool_name))
    }

    /// Length in edges of the shortest path following initial/default/final
    /// edges only.
    pub fn shortest_path_len(&self, from: &str, to: &str) -> Option<usize> {
        let from = *self.index.get(from)?;
        let to = *self.index.get(to)?;
        let mut seen = HashSet::from([from]);
        let mut queue = VecDeque::from([(from, 0usize)]);
        while let Some((pos, dist)) = queue.pop_front() {
            if pos == to {
                return Some(dist);
            }
            for edge in self.graph.edges(NodeIndex::new(pos)) {
                let next = edge.target().index();
                if edge.weight().is_flow() && seen.insert(next) {
                    queue.push_back((next, dist + 1));
                }
            }
        }
        None
    }

    /// Structural warnings that do not make the graph invalid. The engine's
    /// step budget bounds any run regardless.
    pub fn lints(&self) -> Vec<String> {
        let mut reachable = HashSet::new();
        let mut bfs = Bfs::new(&self.graph, NodeIndex::new(self.start));
        while let Some(idx) = bfs.next(&self.graph) {
            reachable.insert(idx.index());
        }

        let mut lints: Vec<String> = self
            .definition
            .nodes
            .iter()
            .enumerate()
            .filter(|(pos, _)| !reachable.contains(pos))
            .map(|(_, node)| format!("node '{}' is unreachable from start", node.id))
            .collect();

        let end_reachable = reachable
            .iter()
            .any(|pos| matches!(self.definition.nodes[*pos].kind, NodeKind::End));
        if !end_reachable {
            lints.push("no end node is reachable from start".to_string());
        }
        lints
    }
}

//! Graph construction and static validation: nodes, edges, cycle
//! detection, topological ordering, and the `visualize_flow` text dump.
//! Ported from `flow_engine.py`'s `FlowEngine.add_node` / `add_edge` /
//! `validate_flow` / `topological_sort` / `visualize_flow`.

use crate::edge::Edge;
use crate::error::{FlowError, FlowResult};
use crate::node::{Node, NodeId};
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// A directed graph of nodes connected by (optionally conditional) edges.
///
/// Iteration order over nodes and edges is insertion order ([`IndexMap`]),
/// which keeps [`Graph::visualize_flow`] deterministic run to run —
/// matching a Python `dict`'s insertion-order guarantee.
#[derive(Default)]
pub struct Graph {
    nodes: IndexMap<NodeId, Arc<dyn Node>>,
    edges: Vec<Edge>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("node_count", &self.nodes.len())
            .field("edge_count", &self.edges.len())
            .finish()
    }
}

impl Graph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Replaces any existing node with the same id,
    /// preserving its position in iteration order (and thus its adjacency
    /// entries, which are derived from the edge list, not a separate map).
    pub fn add_node(&mut self, node: Arc<dyn Node>) {
        let id = node.id().clone();
        if self.nodes.contains_key(&id) {
            tracing::warn!(node_id = %id, "node already exists, replacing");
        }
        tracing::debug!(node_id = %id, kind = node.metadata().kind.as_str(), "node added to graph");
        self.nodes.insert(id, node);
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Option<Arc<dyn Node>> {
        let removed = self.nodes.shift_remove(id);
        if removed.is_some() {
            self.edges.retain(|edge| edge.from != id && edge.to != id);
            tracing::debug!(node_id = %id, "node removed from graph");
        }
        removed
    }

    /// Add an edge. Both endpoints must already be registered nodes —
    /// ported from `FlowEngine.add_edge`'s immediate existence check rather
    /// than deferring to `validate_flow`. Duplicate edges between the same
    /// pair of nodes are allowed; this method does not deduplicate.
    pub fn add_edge(&mut self, edge: Edge) -> FlowResult<()> {
        if !self.nodes.contains_key(&edge.from) {
            return Err(FlowError::graph_structure(format!("source node '{}' not found", edge.from)));
        }
        if !self.nodes.contains_key(&edge.to) {
            return Err(FlowError::graph_structure(format!("target node '{}' not found", edge.to)));
        }
        tracing::debug!(from = %edge.from, to = %edge.to, conditional = edge.is_conditional(), "edge added to graph");
        self.edges.push(edge);
        Ok(())
    }

    /// Look up a node by id.
    pub fn get_node(&self, id: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(id)
    }

    /// All registered node ids, in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// All edges.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn outgoing(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |edge| edge.from == id)
    }

    fn incoming(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |edge| edge.to == id)
    }

    /// Nodes with no incoming edges — the default dispatch frontier for
    /// `FlowEngine::execute_flow`.
    pub fn entry_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .keys()
            .filter(|id| self.incoming(id).next().is_none())
            .cloned()
            .collect()
    }

    /// Nodes with no outgoing edges.
    pub fn exit_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .keys()
            .filter(|id| self.outgoing(id).next().is_none())
            .cloned()
            .collect()
    }

    /// Nodes touched by neither an incoming nor an outgoing edge, in a
    /// graph with more than one node. A single-node graph is never
    /// considered isolated.
    fn isolated_nodes(&self) -> Vec<NodeId> {
        if self.nodes.len() <= 1 {
            return Vec::new();
        }
        self.nodes
            .keys()
            .filter(|id| self.incoming(id).next().is_none() && self.outgoing(id).next().is_none())
            .cloned()
            .collect()
    }

    fn has_cycle(&self) -> bool {
        #[derive(PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }
        let mut marks: std::collections::HashMap<&str, Mark> = std::collections::HashMap::new();

        fn visit<'a>(
            graph: &'a Graph,
            id: &'a str,
            marks: &mut std::collections::HashMap<&'a str, Mark>,
        ) -> bool {
            match marks.get(id) {
                Some(Mark::Done) => return false,
                Some(Mark::InProgress) => return true,
                None => {}
            }
            marks.insert(id, Mark::InProgress);
            for edge in graph.outgoing(id) {
                if visit(graph, edge.to.as_str(), marks) {
                    return true;
                }
            }
            marks.insert(id, Mark::Done);
            false
        }

        for id in self.nodes.keys() {
            if visit(self, id.as_str(), &mut marks) {
                return true;
            }
        }
        false
    }

    /// Structural validation: every node's declared dependencies exist,
    /// the graph has no cycle, and no node is isolated. Dangling edge
    /// endpoints are not checked here — `add_edge` refuses them up front,
    /// so they cannot occur. Edge predicates being "callable" (spec §4.6)
    /// is a type-level guarantee in Rust (`Arc<dyn Fn>`), so that check has
    /// no runtime equivalent either. Returns `(is_valid, issues)` rather
    /// than failing outright, matching `flow_engine.py`'s `validate_flow`.
    pub fn validate_flow(&self) -> (bool, Vec<String>) {
        let mut issues = Vec::new();

        for (id, node) in &self.nodes {
            for dependency in node.get_dependencies() {
                if !self.nodes.contains_key(&dependency) {
                    issues.push(format!("node '{id}' depends on unknown node '{dependency}'"));
                }
            }
        }

        if self.has_cycle() {
            issues.push("graph contains a cycle".to_string());
        }

        for id in self.isolated_nodes() {
            issues.push(format!("node '{id}' is isolated (no incoming or outgoing edges)"));
        }

        let is_valid = issues.is_empty();
        tracing::debug!(is_valid, issue_count = issues.len(), "flow validated");
        (is_valid, issues)
    }

    /// Kahn's-algorithm topological order. Errors with
    /// [`FlowError::GraphStructure`] if the graph contains a cycle.
    pub fn topological_sort(&self) -> FlowResult<Vec<NodeId>> {
        let mut in_degree: std::collections::HashMap<&str, usize> =
            self.nodes.keys().map(|id| (id.as_str(), 0)).collect();
        for edge in &self.edges {
            if let Some(count) = in_degree.get_mut(edge.to.as_str()) {
                *count += 1;
            }
        }

        let mut queue: VecDeque<&str> = self
            .nodes
            .keys()
            .map(|id| id.as_str())
            .filter(|id| in_degree[id] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited: HashSet<&str> = HashSet::new();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            order.push(id.to_string());
            for edge in self.outgoing(id) {
                if let Some(count) = in_degree.get_mut(edge.to.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(edge.to.as_str());
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(FlowError::graph_structure("graph contains a cycle; no valid topological order exists"));
        }
        Ok(order)
    }

    /// Plain-text dump of the graph: a "Nodes:" section (id, kind, status)
    /// followed by an "Edges:" section (from -> to, tagged `[conditional]`
    /// when gated). Format ported verbatim from `visualize_flow`.
    pub fn visualize_flow(&self) -> String {
        let mut output = String::new();
        output.push_str("Flow Visualization:\n");
        output.push_str(&"=".repeat(50));
        output.push('\n');

        output.push_str("Nodes:\n");
        for (id, node) in &self.nodes {
            output.push_str(&format!(
                "  {id} ({}) - {}\n",
                node.metadata().kind.as_str(),
                node.status().as_str()
            ));
        }
        output.push('\n');

        output.push_str("Edges:\n");
        for edge in &self.edges {
            if edge.is_conditional() {
                output.push_str(&format!("  {} -> {} [conditional]\n", edge.from, edge.to));
            } else {
                output.push_str(&format!("  {} -> {}\n", edge.from, edge.to));
            }
        }

        output
    }
}

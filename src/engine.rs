//! The flow engine: owns the graph, drives the wave-loop scheduler, and
//! keeps execution bookkeeping. Ported from `flow_engine.py`'s
//! `FlowEngine.execute_flow` / `_execute_nodes` / `_execute_parallel_nodes`.

use crate::edge::{Edge, EdgePredicate};
use crate::error::{FlowError, FlowResult};
use crate::graph::Graph;
use crate::node::{ComponentHealth, ComponentStats, Node, NodeId, NodeResult};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Engine-level concurrency knobs (spec §4.7), with the source's defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Advisory bound on how many parallel-safe nodes a single wave may
    /// launch at once. **Not enforced** — `flow_engine.py` declares this
    /// field but never checks it against a running wave, and this port
    /// matches that rather than silently changing behavior.
    pub max_concurrent_nodes: usize,
    /// Wall-clock cap on an entire `execute_flow` call, hoisted around the
    /// whole wave loop.
    pub global_timeout: Duration,
    /// Whether a wave may fan its parallel-safe candidates out
    /// concurrently before running the rest serially.
    pub enable_parallel_execution: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_nodes: 10,
            global_timeout: Duration::from_secs(300),
            enable_parallel_execution: true,
        }
    }
}

/// Flow-level state machine (spec §3 "Flow execution record").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// The wave loop is in flight.
    Running,
    /// The wave loop terminated on an empty frontier.
    Completed,
    /// The wave loop, or the global timeout, aborted the run.
    Failed,
    /// Reserved for a whole-flow pause; the scheduler itself never
    /// produces this status (only individual nodes are paused).
    Paused,
    /// Reserved for a whole-flow cancellation; the scheduler itself never
    /// produces this status.
    Cancelled,
}

impl ExecutionStatus {
    /// Stable lowercase tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

/// Bookkeeping record for a single `execute_flow` call, retained in
/// [`FlowEngine`] history after completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowExecution {
    /// Caller-provided or auto-generated (`flow_<ms-epoch>`) identity.
    pub flow_id: String,
    /// When the run began.
    pub start_time: DateTime<Utc>,
    /// When the run ended, `None` while still running.
    pub end_time: Option<DateTime<Utc>>,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// Every dispatched node's result, keyed by node id.
    pub node_results: IndexMap<NodeId, NodeResult>,
    /// Node ids in dispatch order (may contain duplicates across waves
    /// only if a predecessor's edge re-admits the same target twice,
    /// which the frontier filter prevents within a single run).
    pub execution_path: Vec<NodeId>,
    /// Populated when `status == Failed`.
    pub error_message: Option<String>,
}

impl FlowExecution {
    fn new(flow_id: String) -> Self {
        Self {
            flow_id,
            start_time: Utc::now(),
            end_time: None,
            status: ExecutionStatus::Running,
            node_results: IndexMap::new(),
            execution_path: Vec::new(),
            error_message: None,
        }
    }

    /// JSON snapshot, for embedding in `get_flow_status`.
    pub fn to_value(&self) -> Value {
        json!({
            "flow_id": self.flow_id,
            "start_time": self.start_time.to_rfc3339(),
            "end_time": self.end_time.map(|t| t.to_rfc3339()),
            "status": self.status.as_str(),
            "nodes_executed": self.node_results.len(),
            "execution_path": self.execution_path,
            "error_message": self.error_message,
        })
    }
}

/// The flow execution engine: exclusive owner of the graph and of every
/// execution record it produces. Construction, validation, and execution
/// are only safe between runs (spec §5 "Shared resources") — the Rust
/// borrow checker enforces this directly, since [`FlowEngine::execute_flow`]
/// takes `&mut self` and so cannot overlap with another mutable call.
#[derive(Debug)]
pub struct FlowEngine {
    id: String,
    graph: Graph,
    config: EngineConfig,
    current_execution: Option<FlowExecution>,
    history: Vec<FlowExecution>,
    paused_nodes: HashSet<NodeId>,
    created_at: Instant,
    execution_count: u64,
    error_count: u64,
}

impl FlowEngine {
    /// A fresh engine with the default id `"default_flow_engine"`.
    pub fn new() -> Self {
        Self::with_id("default_flow_engine")
    }

    /// A fresh engine with a caller-chosen id (surfaced in `get_flow_status`
    /// and `introspect`).
    pub fn with_id(id: impl Into<String>) -> Self {
        let id = id.into();
        tracing::debug!(engine_id = %id, "flow engine initialized");
        Self {
            id,
            graph: Graph::new(),
            config: EngineConfig::default(),
            current_execution: None,
            history: Vec::new(),
            paused_nodes: HashSet::new(),
            created_at: Instant::now(),
            execution_count: 0,
            error_count: 0,
        }
    }

    /// Replace the engine's concurrency configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Current concurrency configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a node. Warns and replaces on id collision, preserving the
    /// id's position (spec §4.6/§3 "Node identity").
    pub fn add_node(&mut self, node: Arc<dyn Node>) {
        self.graph.add_node(node);
    }

    /// Add an edge. Both endpoints must already be registered nodes.
    pub fn add_edge(
        &mut self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        predicate: Option<EdgePredicate>,
        metadata: Option<serde_json::Map<String, Value>>,
    ) -> FlowResult<()> {
        let mut edge = match predicate {
            Some(predicate) => Edge::conditional(from, to, predicate),
            None => Edge::new(from, to),
        };
        if let Some(metadata) = metadata {
            edge = edge.with_metadata(metadata);
        }
        self.graph.add_edge(edge)
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Option<Arc<dyn Node>> {
        self.graph.remove_node(id)
    }

    /// Structural validation — see [`Graph::validate_flow`].
    pub fn validate_flow(&self) -> (bool, Vec<String>) {
        self.graph.validate_flow()
    }

    /// Kahn's-algorithm topological order.
    pub fn topological_sort(&self) -> FlowResult<Vec<NodeId>> {
        self.graph.topological_sort()
    }

    /// Nodes with no incoming edges.
    pub fn get_entry_nodes(&self) -> Vec<NodeId> {
        self.graph.entry_nodes()
    }

    /// Nodes with no outgoing edges.
    pub fn get_exit_nodes(&self) -> Vec<NodeId> {
        self.graph.exit_nodes()
    }

    /// Deterministic human-readable dump of the graph.
    pub fn visualize_flow(&self) -> String {
        self.graph.visualize_flow()
    }

    /// Mark a node id as paused. Checked at frontier-filtering time; an
    /// already-completed node is unaffected.
    pub fn pause_node(&mut self, id: impl Into<NodeId>) {
        let id = id.into();
        self.paused_nodes.insert(id.clone());
        tracing::info!(node_id = %id, "node paused");
    }

    /// Un-pause a node id.
    pub fn resume_node(&mut self, id: &str) {
        self.paused_nodes.remove(id);
        tracing::info!(node_id = %id, "node resumed");
    }

    /// Snapshot of engine + graph + execution state (spec §4.8).
    pub fn get_flow_status(&self) -> Value {
        json!({
            "engine_id": self.id,
            "total_nodes": self.graph.len(),
            "total_edges": self.graph.edges().len(),
            "current_execution": self.current_execution.as_ref().map(FlowExecution::to_value),
            "paused_nodes": self.paused_nodes.iter().cloned().collect::<Vec<_>>(),
            "execution_history_count": self.history.len(),
            "configuration": {
                "max_concurrent_nodes": self.config.max_concurrent_nodes,
                "global_timeout_secs": self.config.global_timeout.as_secs_f64(),
                "enable_parallel_execution": self.config.enable_parallel_execution,
            },
        })
    }

    /// Retained execution records, oldest first.
    pub fn history(&self) -> &[FlowExecution] {
        &self.history
    }

    /// Introspection snapshot (spec §6 "Component introspection").
    pub fn introspect(&self) -> ComponentStats {
        let success_rate = if self.execution_count == 0 {
            1.0
        } else {
            (self.execution_count - self.error_count) as f64 / self.execution_count as f64
        };
        let health = if self.execution_count == 0 {
            ComponentHealth::Idle
        } else {
            let error_rate = self.error_count as f64 / self.execution_count as f64;
            if error_rate == 0.0 {
                ComponentHealth::Healthy
            } else if error_rate < 0.1 {
                ComponentHealth::Warning
            } else {
                ComponentHealth::Error
            }
        };

        let durations: Vec<Duration> = self
            .history
            .iter()
            .filter_map(|execution| {
                let end = execution.end_time?;
                (end - execution.start_time).to_std().ok()
            })
            .collect();
        let avg_execution_time = if durations.is_empty() {
            Duration::ZERO
        } else {
            durations.iter().sum::<Duration>() / durations.len() as u32
        };
        let last_execution_time = durations.last().copied();

        ComponentStats {
            component_id: self.id.clone(),
            component_kind: "flow_engine".to_string(),
            uptime: self.created_at.elapsed(),
            execution_count: self.execution_count,
            error_count: self.error_count,
            success_rate,
            avg_execution_time,
            last_execution_time,
            memory_delta_estimate: 0.0,
            recent_errors: self
                .history
                .iter()
                .rev()
                .filter_map(|execution| execution.error_message.clone())
                .take(5)
                .collect(),
            health,
        }
    }

    /// Run the flow to completion: validate, pick a starting frontier,
    /// then drive the wave loop described in spec §4.7 under the
    /// engine's `global_timeout`.
    ///
    /// `initial_data` must be a JSON object (or `null`, treated as `{}`).
    /// On any error no partial progress leaks into `self.history` except
    /// for cases where the wave loop itself started (validation and
    /// empty-frontier failures never reach that point).
    pub async fn execute_flow(
        &mut self,
        initial_data: Value,
        flow_id: Option<String>,
        entry_nodes: Option<Vec<NodeId>>,
    ) -> FlowResult<FlowExecution> {
        if !initial_data.is_object() && !initial_data.is_null() {
            return Err(FlowError::misuse("execute_flow requires object (or null) input data"));
        }

        let (is_valid, issues) = self.graph.validate_flow();
        if !is_valid {
            return Err(FlowError::graph_structure(issues.join("; ")));
        }

        let starting_frontier = match entry_nodes {
            Some(ids) => {
                for id in &ids {
                    if self.graph.get_node(id).is_none() {
                        return Err(FlowError::misuse(format!("entry node '{id}' not found in graph")));
                    }
                }
                ids
            }
            None => self.graph.entry_nodes(),
        };
        if starting_frontier.is_empty() {
            return Err(FlowError::NoEntryNodes);
        }

        let flow_id = flow_id.unwrap_or_else(|| format!("flow_{}", Utc::now().timestamp_millis()));
        self.current_execution = Some(FlowExecution::new(flow_id.clone()));
        tracing::info!(
            flow_id = %flow_id,
            total_nodes = self.graph.len(),
            total_edges = self.graph.edges().len(),
            "starting flow execution"
        );

        let initial_data = if initial_data.is_null() { json!({}) } else { initial_data };
        let global_timeout = self.config.global_timeout;
        let outcome = tokio::time::timeout(global_timeout, self.run_wave_loop(starting_frontier, initial_data)).await;

        self.execution_count += 1;
        let mut execution = self.current_execution.take().expect("set at the top of this call");

        let result = match outcome {
            Ok(Ok(())) => {
                execution.end_time = Some(Utc::now());
                execution.status = ExecutionStatus::Completed;
                tracing::info!(
                    flow_id = %execution.flow_id,
                    nodes_executed = execution.node_results.len(),
                    "flow execution completed"
                );
                Ok(execution.clone())
            }
            Ok(Err(err)) => {
                self.error_count += 1;
                execution.end_time = Some(Utc::now());
                execution.status = ExecutionStatus::Failed;
                execution.error_message = Some(err.to_string());
                tracing::error!(flow_id = %execution.flow_id, error = %err, "flow execution failed");
                Err(err)
            }
            Err(_) => {
                self.error_count += 1;
                let seconds = global_timeout.as_secs();
                execution.end_time = Some(Utc::now());
                execution.status = ExecutionStatus::Failed;
                execution.error_message = Some(format!("flow execution timed out after {seconds}s"));
                tracing::error!(flow_id = %execution.flow_id, "flow execution timed out");
                Err(FlowError::Timeout { seconds })
            }
        };

        self.history.push(execution);
        result
    }

    /// The scheduling loop itself: repeatedly filter the frontier, dispatch
    /// a wave (parallel-safe candidates concurrently, then the rest
    /// serially), capture results into `self.current_execution`, compute
    /// successors via admitting edges, and merge payloads for the next
    /// wave. Terminates when the frontier goes empty.
    async fn run_wave_loop(&mut self, mut frontier: Vec<NodeId>, mut data: Value) -> FlowResult<()> {
        while !frontier.is_empty() {
            let mut seen = HashSet::new();
            let candidates: Vec<NodeId> = frontier
                .iter()
                .filter(|id| seen.insert((*id).clone()))
                .filter(|id| {
                    let execution = self.current_execution.as_ref().expect("set by execute_flow");
                    !execution.node_results.contains_key(*id) && !self.paused_nodes.contains(*id)
                })
                .cloned()
                .collect();

            if candidates.is_empty() {
                break;
            }

            let (parallel_ids, serial_ids): (Vec<NodeId>, Vec<NodeId>) =
                if self.config.enable_parallel_execution && candidates.len() > 1 {
                    candidates
                        .into_iter()
                        .partition(|id| self.graph.get_node(id).map(|n| n.metadata().parallel_safe).unwrap_or(false))
                } else {
                    (Vec::new(), candidates)
                };

            let mut dispatched: Vec<(NodeId, NodeResult)> = Vec::with_capacity(parallel_ids.len() + serial_ids.len());

            if !parallel_ids.is_empty() {
                for id in &parallel_ids {
                    self.current_execution
                        .as_mut()
                        .expect("set by execute_flow")
                        .execution_path
                        .push(id.clone());
                }
                let input = data.clone();
                let futures = parallel_ids.iter().cloned().map(|id| {
                    let node = self
                        .graph
                        .get_node(&id)
                        .expect("validated member of current frontier")
                        .clone();
                    let input = input.clone();
                    async move {
                        let result = node.execute(input).await;
                        (id, result)
                    }
                });
                let outcomes = futures::future::join_all(futures).await;
                dispatched.extend(outcomes);
            }

            for id in serial_ids {
                self.current_execution
                    .as_mut()
                    .expect("set by execute_flow")
                    .execution_path
                    .push(id.clone());
                let node = self
                    .graph
                    .get_node(&id)
                    .ok_or_else(|| FlowError::scheduler(format!("node '{id}' disappeared mid-execution")))?
                    .clone();
                let result = node.execute(data.clone()).await;
                dispatched.push((id, result));
            }

            let mut next_seen = HashSet::new();
            let mut next_frontier = Vec::new();
            let mut merged = data.clone();

            for (id, result) in &dispatched {
                if !result.success {
                    continue;
                }
                if let Value::Object(fields) = &result.data {
                    let target = merged.as_object_mut().expect("initial_data is always an object");
                    for (key, value) in fields {
                        target.insert(key.clone(), value.clone());
                    }
                }
                for edge in self.graph.edges().iter().filter(|edge| &edge.from == id) {
                    if edge.admits(&result.data) && next_seen.insert(edge.to.clone()) {
                        next_frontier.push(edge.to.clone());
                    }
                }
            }

            let execution = self.current_execution.as_mut().expect("set by execute_flow");
            for (id, result) in dispatched {
                if !result.success {
                    tracing::error!(node_id = %id, error = ?result.error, "node execution failed");
                } else {
                    tracing::debug!(node_id = %id, "node execution succeeded");
                }
                execution.node_results.insert(id, result);
            }

            data = merged;
            frontier = next_frontier;
        }

        Ok(())
    }
}

impl Default for FlowEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{BaseNode, NodeKind, NodeMetadata};
    use async_trait::async_trait;
    use std::time::Duration as StdDuration;

    #[derive(Debug)]
    struct Echo {
        base: BaseNode,
        emit: Value,
    }

    #[async_trait]
    impl Node for Echo {
        async fn execute_core(&self, input: Value) -> FlowResult<Value> {
            let mut merged = input;
            if let (Value::Object(target), Value::Object(extra)) = (&mut merged, &self.emit) {
                for (k, v) in extra {
                    target.insert(k.clone(), v.clone());
                }
            }
            Ok(merged)
        }
        fn base(&self) -> &BaseNode {
            &self.base
        }
    }

    fn echo(id: &str, emit: Value) -> Arc<dyn Node> {
        Arc::new(Echo {
            base: BaseNode::new(id, NodeMetadata::new(NodeKind::Custom)),
            emit,
        })
    }

    #[tokio::test]
    async fn linear_three_node_chain_threads_data_forward() {
        let mut engine = FlowEngine::new();
        engine.add_node(echo("a", json!({"k": "a"})));
        engine.add_node(echo("b", json!({"k": "b"})));
        engine.add_node(echo("c", json!({"k": "c"})));
        engine.add_edge("a", "b", None, None).unwrap();
        engine.add_edge("b", "c", None, None).unwrap();

        let execution = engine.execute_flow(json!({}), None, None).await.unwrap();
        assert_eq!(execution.execution_path, vec!["a", "b", "c"]);
        assert_eq!(execution.node_results["c"].data["k"], json!("c"));
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn conditional_branch_only_admits_matching_target() {
        let mut engine = FlowEngine::new();
        engine.add_node(echo("a", json!({"ok": true})));
        engine.add_node(echo("b", json!({"k": "b"})));
        engine.add_node(echo("c", json!({"k": "c"})));
        engine
            .add_edge("a", "b", Some(Arc::new(|data: &Value| data["ok"] == json!(true))), None)
            .unwrap();
        engine
            .add_edge("a", "c", Some(Arc::new(|data: &Value| data["ok"] == json!(false))), None)
            .unwrap();

        let execution = engine.execute_flow(json!({}), None, None).await.unwrap();
        assert_eq!(execution.node_results.keys().collect::<HashSet<_>>(), HashSet::from([&"a".to_string(), &"b".to_string()]));
    }

    #[tokio::test]
    async fn parallel_fan_out_fan_in_merges_both_payloads() {
        let mut engine = FlowEngine::new();
        engine.add_node(echo("a", json!({})));
        engine.add_node(echo("b", json!({"x": 1})));
        engine.add_node(echo("c", json!({"y": 2})));
        engine.add_node(echo("d", json!({})));
        engine.add_edge("a", "b", None, None).unwrap();
        engine.add_edge("a", "c", None, None).unwrap();
        engine.add_edge("b", "d", None, None).unwrap();
        engine.add_edge("c", "d", None, None).unwrap();

        let execution = engine.execute_flow(json!({}), None, None).await.unwrap();
        assert_eq!(execution.node_results.len(), 4);
        assert_eq!(execution.execution_path.last(), Some(&"d".to_string()));
    }

    #[tokio::test]
    async fn empty_frontier_is_a_misuse_error() {
        let mut engine = FlowEngine::new();
        engine.add_node(echo("a", json!({})));
        let err = engine.execute_flow(json!({}), None, Some(vec![])).await.unwrap_err();
        assert!(matches!(err, FlowError::NoEntryNodes));
        assert!(engine.history().is_empty());
    }

    #[tokio::test]
    async fn cycle_is_rejected_before_any_record_is_retained() {
        let mut engine = FlowEngine::new();
        engine.add_node(echo("a", json!({})));
        engine.add_node(echo("b", json!({})));
        engine.add_edge("a", "b", None, None).unwrap();
        engine.add_edge("b", "a", None, None).unwrap();

        let err = engine.execute_flow(json!({}), None, None).await.unwrap_err();
        assert!(err.to_string().contains("cycle"));
        assert!(engine.history().is_empty());
    }

    #[tokio::test]
    async fn single_node_graph_executes_once() {
        let mut engine = FlowEngine::new();
        engine.add_node(echo("only", json!({"done": true})));
        let execution = engine.execute_flow(json!({}), None, None).await.unwrap();
        assert_eq!(execution.execution_path, vec!["only".to_string()]);
        assert_eq!(execution.node_results.len(), 1);
    }

    #[tokio::test]
    async fn paused_node_does_not_run() {
        let mut engine = FlowEngine::new();
        engine.add_node(echo("a", json!({})));
        engine.add_node(echo("b", json!({})));
        engine.add_edge("a", "b", None, None).unwrap();
        engine.pause_node("b");

        let execution = engine.execute_flow(json!({}), None, None).await.unwrap();
        assert!(execution.node_results.contains_key("a"));
        assert!(!execution.node_results.contains_key("b"));
    }

    #[tokio::test]
    async fn global_timeout_fails_the_run() {
        #[derive(Debug)]
        struct Sleeper {
            base: BaseNode,
        }
        #[async_trait]
        impl Node for Sleeper {
            async fn execute_core(&self, _input: Value) -> FlowResult<Value> {
                tokio::time::sleep(StdDuration::from_secs(5)).await;
                Ok(json!({}))
            }
            fn base(&self) -> &BaseNode {
                &self.base
            }
        }

        let mut engine = FlowEngine::new().with_config(EngineConfig {
            global_timeout: StdDuration::from_millis(50),
            ..EngineConfig::default()
        });
        engine.add_node(Arc::new(Sleeper {
            base: BaseNode::new("slow", NodeMetadata::new(NodeKind::Custom).with_timeout(StdDuration::from_secs(10))),
        }));

        let err = engine.execute_flow(json!({}), None, None).await.unwrap_err();
        assert!(matches!(err, FlowError::Timeout { .. }));
        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.history()[0].status, ExecutionStatus::Failed);
    }
}

//! The node contract: the polymorphic capability every graph vertex
//! satisfies, plus the reference retry/timeout execution policy every
//! node runs under.

pub mod composite;

use crate::error::FlowResult;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Stable string identifier for a node, unique within a flow.
pub type NodeId = String;

/// Per-node result history is capped at this size; oldest entries drop
/// first. Mirrors the teacher's `error_history` cap.
const MAX_HISTORY: usize = 100;
/// `ComponentStats::recent_errors` only ever keeps the most recent few.
const MAX_RECENT_ERRORS: usize = 5;

/// The category a node belongs to. Purely descriptive — the scheduler
/// never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// An LLM-backed or otherwise autonomous agent.
    Agent,
    /// A node that manipulates or summarizes shared context.
    Context,
    /// A node wrapping an external tool invocation.
    Tool,
    /// A node that sends or receives messages with another system.
    Communication,
    /// A [`composite::ConditionalNode`].
    Condition,
    /// A [`composite::ParallelNode`].
    Parallel,
    /// A [`composite::SequenceNode`].
    Sequence,
    /// Anything not covered by the above.
    Custom,
}

impl Default for NodeKind {
    fn default() -> Self {
        NodeKind::Custom
    }
}

impl NodeKind {
    /// Stable lowercase tag, used in logs and `describe()` snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Agent => "agent",
            NodeKind::Context => "context",
            NodeKind::Tool => "tool",
            NodeKind::Communication => "communication",
            NodeKind::Condition => "condition",
            NodeKind::Parallel => "parallel",
            NodeKind::Sequence => "sequence",
            NodeKind::Custom => "custom",
        }
    }
}

/// Per-node state machine. `Idle` is the only state a node starts or
/// returns to (via [`Node::reset`]); `Completed`/`Failed`/`Skipped` are
/// terminal for a given attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Never executed, or reset.
    Idle,
    /// Currently inside `execute`.
    Running,
    /// Finished with `success = true`.
    Completed,
    /// Finished with `success = false` after exhausting retries.
    Failed,
    /// Not dispatched this wave (paused, or a non-admitting predecessor).
    Skipped,
    /// Reserved for implementations that model in-flight waiting explicitly.
    Waiting,
}

impl Default for NodeStatus {
    fn default() -> Self {
        NodeStatus::Idle
    }
}

impl NodeStatus {
    /// Stable lowercase tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Idle => "idle",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
            NodeStatus::Waiting => "waiting",
        }
    }
}

/// Immutable (post-construction) configuration of a node.
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    /// The node's kind tag.
    pub kind: NodeKind,
    /// Logical dependencies: ids this node requires present in the graph.
    /// Validated by `Graph::validate_flow`; the scheduler does not use
    /// this list for ordering.
    pub dependencies: Vec<NodeId>,
    /// Per-attempt timeout. Each retry gets a fresh timer.
    pub timeout: Duration,
    /// Additional attempts beyond the first.
    pub retry_count: u32,
    /// Whether this node may run concurrently with other parallel-safe
    /// nodes in the same wave.
    pub parallel_safe: bool,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            kind: NodeKind::default(),
            dependencies: Vec::new(),
            timeout: Duration::from_secs(30),
            retry_count: 0,
            parallel_safe: true,
        }
    }
}

impl NodeMetadata {
    /// Start from the defaults, then customize with the builder methods.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Set the dependency list.
    pub fn with_dependencies(mut self, dependencies: Vec<NodeId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry count (attempts beyond the first).
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Set the parallel-safe flag.
    pub fn with_parallel_safe(mut self, parallel_safe: bool) -> Self {
        self.parallel_safe = parallel_safe;
        self
    }
}

/// The outcome of a single node execution attempt (after the retry policy
/// has run its course).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    /// Whether the node ultimately succeeded.
    pub success: bool,
    /// The payload produced, typically a JSON object.
    pub data: Value,
    /// Populated when `success` is false.
    pub error: Option<String>,
    /// Wall-clock duration of the attempt that produced this result
    /// (the *last* attempt only — retries do not accumulate).
    pub execution_time: Duration,
    /// The id of the node that produced this result.
    pub node_id: NodeId,
    /// Terminal status reached.
    pub status: NodeStatus,
    /// Free-form metadata.
    pub metadata: serde_json::Map<String, Value>,
}

impl NodeResult {
    /// Build a successful result.
    pub fn success(node_id: NodeId, data: Value, execution_time: Duration) -> Self {
        Self {
            success: true,
            data,
            error: None,
            execution_time,
            node_id,
            status: NodeStatus::Completed,
            metadata: serde_json::Map::new(),
        }
    }

    /// Build a failed result.
    pub fn failure(node_id: NodeId, error: String, execution_time: Duration) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error),
            execution_time,
            node_id,
            status: NodeStatus::Failed,
            metadata: serde_json::Map::new(),
        }
    }

    /// Serialize this result into a JSON value, for embedding inside a
    /// composite node's own payload (parallel/sequence results lists).
    pub fn to_value(&self) -> Value {
        json!({
            "success": self.success,
            "data": self.data,
            "error": self.error,
            "execution_time_secs": self.execution_time.as_secs_f64(),
            "node_id": self.node_id,
            "status": self.status.as_str(),
        })
    }
}

/// Health classification surfaced by [`ComponentStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentHealth {
    /// Never executed.
    Idle,
    /// Executed at least once, zero errors.
    Healthy,
    /// Error rate below 10%.
    Warning,
    /// Error rate at or above 10%.
    Error,
}

impl ComponentHealth {
    /// Stable lowercase tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentHealth::Idle => "idle",
            ComponentHealth::Healthy => "healthy",
            ComponentHealth::Warning => "warning",
            ComponentHealth::Error => "error",
        }
    }
}

/// Introspection snapshot every core object (node or engine) can produce
/// on demand. See spec §6 "Component introspection".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStats {
    /// Id of the component this snapshot describes.
    pub component_id: String,
    /// Kind tag of the component.
    pub component_kind: String,
    /// Time since the component was constructed.
    pub uptime: Duration,
    /// Total number of completed executions (success or failure).
    pub execution_count: u64,
    /// Number of those executions that failed.
    pub error_count: u64,
    /// `1.0` when never executed (matches the source's convention).
    pub success_rate: f64,
    /// Mean execution time across all executions.
    pub avg_execution_time: Duration,
    /// Duration of the most recent execution, if any.
    pub last_execution_time: Option<Duration>,
    /// Always `0.0`: no OS-level memory sampling is wired up in this
    /// stack. Kept for API parity with the source's `memory_usage` field.
    pub memory_delta_estimate: f64,
    /// Up to the last 5 error messages.
    pub recent_errors: Vec<String>,
    /// Health classification derived from the error rate.
    pub health: ComponentHealth,
}

/// Shared bookkeeping every concrete [`Node`] embeds: identity, status,
/// history, and the counters behind [`ComponentStats`].
#[derive(Debug)]
pub struct BaseNode {
    id: NodeId,
    metadata: NodeMetadata,
    status: RwLock<NodeStatus>,
    history: Mutex<VecDeque<NodeResult>>,
    /// Every failed attempt's error message, capped at [`MAX_HISTORY`] like
    /// `base_component.py`'s `error_history`. [`ComponentStats::recent_errors`]
    /// is a derived last-5 view over this, mirroring `error_history[-5:]`.
    error_history: Mutex<VecDeque<String>>,
    created_at: Instant,
    execution_count: AtomicU64,
    error_count: AtomicU64,
    total_execution_time: Mutex<Duration>,
    last_execution_time: Mutex<Option<Duration>>,
}

impl BaseNode {
    /// Construct a fresh base node in the `Idle` state.
    pub fn new(id: impl Into<NodeId>, metadata: NodeMetadata) -> Self {
        let id = id.into();
        tracing::debug!(node_id = %id, kind = metadata.kind.as_str(), "node created");
        Self {
            id,
            metadata,
            status: RwLock::new(NodeStatus::Idle),
            history: Mutex::new(VecDeque::new()),
            error_history: Mutex::new(VecDeque::new()),
            created_at: Instant::now(),
            execution_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            total_execution_time: Mutex::new(Duration::ZERO),
            last_execution_time: Mutex::new(None),
        }
    }

    /// The node's stable id.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// The node's immutable metadata.
    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    /// Current status.
    pub fn status(&self) -> NodeStatus {
        *self.status.read()
    }

    fn set_status(&self, status: NodeStatus) {
        *self.status.write() = status;
    }

    /// Record a completed attempt: push to history (capped), update
    /// counters, and append to the error history (capped) if it failed.
    fn record(&self, result: &NodeResult) {
        self.execution_count.fetch_add(1, Ordering::Relaxed);
        {
            let mut total = self.total_execution_time.lock();
            *total += result.execution_time;
        }
        *self.last_execution_time.lock() = Some(result.execution_time);

        if !result.success {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            let mut errors = self.error_history.lock();
            errors.push_back(result.error.clone().unwrap_or_default());
            if errors.len() > MAX_HISTORY {
                errors.pop_front();
            }
        }

        let mut history = self.history.lock();
        history.push_back(result.clone());
        if history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    /// Return this node to `Idle` and clear its history and counters.
    pub fn reset(&self) {
        self.set_status(NodeStatus::Idle);
        self.history.lock().clear();
        self.error_history.lock().clear();
        self.execution_count.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        *self.total_execution_time.lock() = Duration::ZERO;
        *self.last_execution_time.lock() = None;
        tracing::debug!(node_id = %self.id, "node reset");
    }

    /// Bounded copy of this node's result history (oldest first).
    pub fn history(&self) -> Vec<NodeResult> {
        self.history.lock().iter().cloned().collect()
    }

    /// Build a [`ComponentStats`] snapshot.
    pub fn introspect(&self) -> ComponentStats {
        let execution_count = self.execution_count.load(Ordering::Relaxed);
        let error_count = self.error_count.load(Ordering::Relaxed);
        let total_execution_time = *self.total_execution_time.lock();

        let success_rate = if execution_count == 0 {
            1.0
        } else {
            (execution_count - error_count) as f64 / execution_count as f64
        };
        let avg_execution_time = if execution_count == 0 {
            Duration::ZERO
        } else {
            total_execution_time / execution_count as u32
        };
        let health = if execution_count == 0 {
            ComponentHealth::Idle
        } else {
            let error_rate = error_count as f64 / execution_count as f64;
            if error_rate == 0.0 {
                ComponentHealth::Healthy
            } else if error_rate < 0.1 {
                ComponentHealth::Warning
            } else {
                ComponentHealth::Error
            }
        };

        ComponentStats {
            component_id: self.id.clone(),
            component_kind: self.metadata.kind.as_str().to_string(),
            uptime: self.created_at.elapsed(),
            execution_count,
            error_count,
            success_rate,
            avg_execution_time,
            last_execution_time: *self.last_execution_time.lock(),
            memory_delta_estimate: 0.0,
            recent_errors: {
                let errors = self.error_history.lock();
                let skip = errors.len().saturating_sub(MAX_RECENT_ERRORS);
                errors.iter().skip(skip).cloned().collect()
            },
            health,
        }
    }
}

/// Classify an execution duration the way `debug_logger.py`'s
/// `_get_performance_level` does, for attaching to completion log events.
pub fn performance_level(duration: Duration) -> &'static str {
    let secs = duration.as_secs_f64();
    if secs < 0.1 {
        "excellent"
    } else if secs < 0.5 {
        "good"
    } else if secs < 1.0 {
        "acceptable"
    } else if secs < 5.0 {
        "slow"
    } else {
        "very_slow"
    }
}

/// The capability every graph vertex satisfies.
///
/// Implementations provide [`Node::execute_core`] (the actual logic) and
/// [`Node::base`] (shared bookkeeping); [`Node::execute`] wraps
/// `execute_core` with the reference retry/timeout policy from spec §4.2
/// and never returns an `Err` to its caller — every failure mode becomes a
/// [`NodeResult`] with `success = false`.
#[async_trait]
pub trait Node: Send + Sync + Debug {
    /// The node's own logic for a single attempt. May fail or take too
    /// long; [`Node::execute`] handles both via retry/timeout.
    async fn execute_core(&self, input: Value) -> FlowResult<Value>;

    /// Shared bookkeeping (id, metadata, status, history, counters).
    fn base(&self) -> &BaseNode;

    /// The node's stable id.
    fn id(&self) -> &NodeId {
        self.base().id()
    }

    /// The node's metadata.
    fn metadata(&self) -> &NodeMetadata {
        self.base().metadata()
    }

    /// Current status.
    fn status(&self) -> NodeStatus {
        self.base().status()
    }

    /// Input keys that must be present for [`Node::validate_input`] to
    /// pass. Empty by default.
    fn required_inputs(&self) -> &[String] {
        &[]
    }

    /// Cheap structural check: input must be a JSON object, and every
    /// name in [`Node::required_inputs`] must be present.
    fn validate_input(&self, input: &Value) -> bool {
        match input.as_object() {
            Some(obj) => self.required_inputs().iter().all(|key| obj.contains_key(key)),
            None => false,
        }
    }

    /// Advisory description of the payload shape.
    fn get_output_schema(&self) -> Value {
        Value::Null
    }

    /// Logical dependencies; validated by `Graph::validate_flow`, not
    /// used by the scheduler for ordering.
    fn get_dependencies(&self) -> Vec<NodeId> {
        self.metadata().dependencies.clone()
    }

    /// Return this node to `Idle` and clear its history and stats.
    fn reset(&self) {
        self.base().reset();
    }

    /// Introspection snapshot (spec §6).
    fn introspect(&self) -> ComponentStats {
        self.base().introspect()
    }

    /// JSON snapshot of id/kind/status/dependencies/timeout/retry_count/
    /// parallel_safe/schema/stats, ported from `get_node_info`.
    fn describe(&self) -> Value {
        let stats = self.introspect();
        json!({
            "node_id": self.id(),
            "node_type": self.metadata().kind.as_str(),
            "status": self.status().as_str(),
            "dependencies": self.get_dependencies(),
            "timeout_secs": self.metadata().timeout.as_secs_f64(),
            "retry_count": self.metadata().retry_count,
            "parallel_safe": self.metadata().parallel_safe,
            "output_schema": self.get_output_schema(),
            "statistics": {
                "total_executions": stats.execution_count,
                "success_rate": stats.success_rate,
                "avg_execution_time_secs": stats.avg_execution_time.as_secs_f64(),
            },
        })
    }

    /// Run `execute_core` under this node's retry/timeout policy (spec
    /// §4.2). Never raises: every failure becomes a [`NodeResult`] with
    /// `success = false`.
    async fn execute(&self, input: Value) -> NodeResult {
        let base = self.base();
        base.set_status(NodeStatus::Running);
        let metadata = self.metadata().clone();
        let max_attempts = metadata.retry_count + 1;

        for attempt in 0..max_attempts {
            if !self.validate_input(&input) {
                let result =
                    NodeResult::failure(self.id().clone(), "invalid input data".to_string(), Duration::ZERO);
                base.set_status(NodeStatus::Failed);
                base.record(&result);
                tracing::warn!(node_id = %self.id(), "node input validation failed");
                return result;
            }

            let attempt_start = Instant::now();
            let outcome = tokio::time::timeout(metadata.timeout, self.execute_core(input.clone())).await;
            let last_attempt = attempt + 1 == max_attempts;

            match outcome {
                Ok(Ok(data)) => {
                    let elapsed = attempt_start.elapsed();
                    let result = NodeResult::success(self.id().clone(), data, elapsed);
                    base.set_status(NodeStatus::Completed);
                    base.record(&result);
                    tracing::debug!(
                        node_id = %self.id(),
                        attempt = attempt + 1,
                        performance = performance_level(elapsed),
                        "node execution succeeded"
                    );
                    return result;
                }
                Ok(Err(err)) => {
                    if last_attempt {
                        let elapsed = attempt_start.elapsed();
                        let result = NodeResult::failure(self.id().clone(), err.to_string(), elapsed);
                        base.set_status(NodeStatus::Failed);
                        base.record(&result);
                        tracing::error!(node_id = %self.id(), error = %err, "node execution failed");
                        return result;
                    }
                }
                Err(_) => {
                    if last_attempt {
                        let elapsed = attempt_start.elapsed();
                        let message = format!("Execution timeout after {:.1}s", metadata.timeout.as_secs_f64());
                        let result = NodeResult::failure(self.id().clone(), message, elapsed);
                        base.set_status(NodeStatus::Failed);
                        base.record(&result);
                        tracing::error!(node_id = %self.id(), "node execution timed out");
                        return result;
                    }
                }
            }

            let backoff = Duration::from_secs_f64(2f64.powi(attempt as i32).min(10.0));
            tracing::warn!(node_id = %self.id(), attempt = attempt + 1, backoff_secs = backoff.as_secs_f64(), "retrying node");
            tokio::time::sleep(backoff).await;
        }

        unreachable!("loop always returns on its final attempt")
    }
}

//! # flow_graph
//!
//! A DAG-based flow execution engine: nodes carry a reference retry/timeout
//! policy, edges optionally gate traversal on a predicate over the upstream
//! payload, and [`FlowEngine`] drives execution wave by wave, merging each
//! wave's successful payloads forward and dispatching parallel-safe nodes
//! concurrently within a wave.
//!
//! Ported from a Python flow orchestration tool (`flow_engine.py` /
//! `flow_node.py`): graph validation, cycle detection, topological sort,
//! and the retry/backoff/timeout contract are all carried over faithfully,
//! while logging, error handling, and introspection are rebuilt on this
//! stack's ambient tooling (`tracing`, `thiserror`) in place of the
//! original's bespoke per-component file logger.
//!
//! ## Quick Start
//!
//! ```rust
//! use flow_graph::{FlowEngine, Node, NodeResult, BaseNode, NodeKind, NodeMetadata, FlowResult};
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct Greet {
//!     base: BaseNode,
//! }
//!
//! #[async_trait]
//! impl Node for Greet {
//!     async fn execute_core(&self, input: Value) -> FlowResult<Value> {
//!         Ok(json!({ "greeting": format!("hello, {}", input["name"].as_str().unwrap_or("world")) }))
//!     }
//!     fn base(&self) -> &BaseNode {
//!         &self.base
//!     }
//! }
//!
//! # async fn run() -> FlowResult<()> {
//! let mut engine = FlowEngine::new();
//! engine.add_node(Arc::new(Greet { base: BaseNode::new("greet", NodeMetadata::new(NodeKind::Custom)) }));
//! let execution = engine.execute_flow(json!({ "name": "ada" }), None, None).await?;
//! assert!(execution.node_results["greet"].success);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod edge;
pub mod engine;
pub mod error;
pub mod graph;
pub mod node;

pub use edge::{Edge, EdgePredicate};
pub use engine::{EngineConfig, ExecutionStatus, FlowEngine, FlowExecution};
pub use error::{FlowError, FlowResult};
pub use graph::Graph;
pub use node::{
    composite::{ConditionalNode, ParallelNode, SequenceNode},
    BaseNode, ComponentHealth, ComponentStats, Node, NodeId, NodeKind, NodeMetadata, NodeResult, NodeStatus,
};

/// Crate version, as declared in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a `tracing` subscriber reading `RUST_LOG`, the way a binary
/// embedding this engine is expected to initialize logging before calling
/// [`FlowEngine::execute_flow`].
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

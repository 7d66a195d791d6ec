//! Directed edges between nodes, optionally gated by a predicate over the
//! upstream node's result payload.

use crate::node::NodeId;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Gate evaluated against an upstream node's successful payload. An edge
/// with no predicate always admits traversal.
pub type EdgePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A single directed connection in the graph.
#[derive(Clone)]
pub struct Edge {
    /// Source node id.
    pub from: NodeId,
    /// Destination node id.
    pub to: NodeId,
    /// Optional traversal gate; `None` means unconditional.
    pub predicate: Option<EdgePredicate>,
    /// Free-form metadata, not interpreted by the scheduler.
    pub metadata: serde_json::Map<String, Value>,
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("conditional", &self.predicate.is_some())
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl Edge {
    /// An unconditional edge.
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            predicate: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// An edge that only admits traversal when `predicate` returns `true`
    /// for the upstream node's payload.
    pub fn conditional(
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        predicate: EdgePredicate,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            predicate: Some(predicate),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach free-form metadata to this edge.
    pub fn with_metadata(mut self, metadata: serde_json::Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether this edge admits traversal given the upstream node's data.
    pub fn admits(&self, data: &Value) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(data),
            None => true,
        }
    }

    /// Whether this edge carries a traversal gate, for `visualize_flow`.
    pub fn is_conditional(&self) -> bool {
        self.predicate.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unconditional_edge_always_admits() {
        let edge = Edge::new("a", "b");
        assert!(edge.admits(&json!({"anything": true})));
    }

    #[test]
    fn conditional_edge_respects_predicate() {
        let edge = Edge::conditional("a", "b", Arc::new(|data: &Value| data["go"].as_bool().unwrap_or(false)));
        assert!(edge.admits(&json!({"go": true})));
        assert!(!edge.admits(&json!({"go": false})));
    }
}

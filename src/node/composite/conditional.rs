use crate::error::{FlowError, FlowResult};
use crate::node::{BaseNode, Node, NodeId, NodeKind, NodeMetadata};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// A boolean gate over the incoming payload. Returning `Err` surfaces as a
/// failed [`crate::node::NodeResult`] rather than panicking the node.
pub type Predicate = Arc<dyn Fn(&Value) -> FlowResult<bool> + Send + Sync>;

/// Evaluates a predicate against its input and reports which branch the
/// scheduler should follow next, without itself performing the branch —
/// routing is still driven by the edges leaving this node, gated on
/// `condition_result` via each edge's own predicate.
pub struct ConditionalNode {
    base: BaseNode,
    predicate: Predicate,
    true_path: Option<NodeId>,
    false_path: Option<NodeId>,
}

impl fmt::Debug for ConditionalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalNode")
            .field("base", &self.base)
            .field("true_path", &self.true_path)
            .field("false_path", &self.false_path)
            .finish()
    }
}

impl ConditionalNode {
    /// Build a conditional node. `true_path`/`false_path` are advisory
    /// labels surfaced in the result payload — actual routing still goes
    /// through the graph's edges.
    pub fn new(
        id: impl Into<NodeId>,
        predicate: Predicate,
        true_path: Option<NodeId>,
        false_path: Option<NodeId>,
    ) -> Self {
        Self {
            base: BaseNode::new(id, NodeMetadata::new(NodeKind::Condition)),
            predicate,
            true_path,
            false_path,
        }
    }
}

#[async_trait]
impl Node for ConditionalNode {
    async fn execute_core(&self, input: Value) -> FlowResult<Value> {
        let condition_result = (self.predicate)(&input)
            .map_err(|err| FlowError::scheduler(format!("condition predicate failed: {err}")))?;
        let next_node = if condition_result {
            self.true_path.clone()
        } else {
            self.false_path.clone()
        };
        Ok(json!({
            "condition_result": condition_result,
            "next_node": next_node,
            "original_data": input,
        }))
    }

    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn get_output_schema(&self) -> Value {
        json!({
            "condition_result": "boolean",
            "next_node": "string | null",
            "original_data": "any",
        })
    }
}

use crate::error::FlowResult;
use crate::node::{BaseNode, Node, NodeKind, NodeMetadata};
use async_trait::async_trait;
use futures::future::select_all;
use serde_json::{json, Value};
use std::sync::Arc;

/// Fans a payload out to a fixed set of children and reports their
/// combined outcome. Children not marked `parallel_safe` in their own
/// metadata are skipped with a warning rather than run serially — ported
/// from `ParallelNode._execute_core`.
#[derive(Debug)]
pub struct ParallelNode {
    base: BaseNode,
    children: Vec<Arc<dyn Node>>,
    /// `true`: wait for every admitted child (`asyncio.gather`).
    /// `false`: return as soon as the first admitted child finishes and
    /// drop the rest (`asyncio.wait(FIRST_COMPLETED)` + cancel).
    wait_for_all: bool,
}

impl ParallelNode {
    /// Build a parallel fan-out node.
    pub fn new(id: impl Into<crate::node::NodeId>, children: Vec<Arc<dyn Node>>, wait_for_all: bool) -> Self {
        Self {
            base: BaseNode::new(id, NodeMetadata::new(NodeKind::Parallel)),
            children,
            wait_for_all,
        }
    }

    fn admitted_children(&self) -> Vec<Arc<dyn Node>> {
        let admitted: Vec<Arc<dyn Node>> = self
            .children
            .iter()
            .filter(|child| child.metadata().parallel_safe)
            .cloned()
            .collect();
        for skipped in self.children.iter().filter(|child| !child.metadata().parallel_safe) {
            tracing::warn!(node_id = %skipped.id(), "child node is not parallel-safe, skipping in fan-out");
        }
        admitted
    }
}

#[async_trait]
impl Node for ParallelNode {
    async fn execute_core(&self, input: Value) -> FlowResult<Value> {
        let admitted = self.admitted_children();
        if admitted.is_empty() {
            return Ok(json!({"results": {}, "completed_count": 0, "failed_count": 0}));
        }

        let mut results_map = serde_json::Map::new();
        let (completed_count, failed_count) = if self.wait_for_all {
            let futures = admitted.iter().cloned().map(|child| {
                let input = input.clone();
                async move {
                    let result = child.execute(input).await;
                    (child.id().clone(), result)
                }
            });
            let outcomes = futures::future::join_all(futures).await;
            let completed = outcomes.iter().filter(|(_, r)| r.success).count();
            let failed = outcomes.len() - completed;
            for (id, result) in outcomes {
                results_map.insert(id, result.to_value());
            }
            (completed, failed)
        } else {
            type PendingFuture =
                std::pin::Pin<Box<dyn std::future::Future<Output = (crate::node::NodeId, crate::node::NodeResult)> + Send>>;
            let pending: Vec<PendingFuture> = admitted
                .iter()
                .cloned()
                .map(|child| {
                    let input = input.clone();
                    Box::pin(async move {
                        let result = child.execute(input).await;
                        (child.id().clone(), result)
                    }) as PendingFuture
                })
                .collect();
            // The remaining futures are dropped here, which cooperatively
            // cancels them at their next await point.
            let ((id, result), _index, _remaining) = select_all(pending).await;
            let completed = usize::from(result.success);
            let failed = usize::from(!result.success);
            results_map.insert(id, result.to_value());
            (completed, failed)
        };

        Ok(json!({
            "results": results_map,
            "completed_count": completed_count,
            "failed_count": failed_count,
        }))
    }

    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn get_output_schema(&self) -> Value {
        json!({
            "results": "object",
            "completed_count": "integer",
            "failed_count": "integer",
        })
    }
}

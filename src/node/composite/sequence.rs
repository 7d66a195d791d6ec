use crate::error::FlowResult;
use crate::node::{BaseNode, Node, NodeKind, NodeMetadata};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Runs children one after another, threading the accumulated payload
/// from one child into the next. Ported from `SequenceNode._execute_core`:
/// a child's object-shaped result is merged key-by-key into the running
/// payload; a non-object result is stashed under `previous_result`.
#[derive(Debug)]
pub struct SequenceNode {
    base: BaseNode,
    children: Vec<Arc<dyn Node>>,
    stop_on_error: bool,
}

impl SequenceNode {
    /// Build a sequence node. When `stop_on_error` is set, the chain
    /// halts at the first failing child instead of running the rest
    /// against the payload as it stood before the failure.
    pub fn new(id: impl Into<crate::node::NodeId>, children: Vec<Arc<dyn Node>>, stop_on_error: bool) -> Self {
        Self {
            base: BaseNode::new(id, NodeMetadata::new(NodeKind::Sequence)),
            children,
            stop_on_error,
        }
    }
}

#[async_trait]
impl Node for SequenceNode {
    async fn execute_core(&self, input: Value) -> FlowResult<Value> {
        let mut accumulated = match input {
            Value::Object(_) => input,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("previous_result".to_string(), other);
                Value::Object(map)
            }
        };

        let mut results = Vec::with_capacity(self.children.len());
        let mut last_successful_index: i64 = -1;

        for (index, child) in self.children.iter().enumerate() {
            let result = child.execute(accumulated.clone()).await;

            if result.success {
                last_successful_index = index as i64;
                match &result.data {
                    Value::Object(fields) => {
                        let target = accumulated.as_object_mut().expect("accumulated stays an object");
                        for (key, value) in fields {
                            target.insert(key.clone(), value.clone());
                        }
                    }
                    other => {
                        accumulated
                            .as_object_mut()
                            .expect("accumulated stays an object")
                            .insert("previous_result".to_string(), other.clone());
                    }
                }
            }

            let failed = !result.success;
            results.push(result.to_value());
            if failed && self.stop_on_error {
                break;
            }
        }

        Ok(json!({
            "results": results,
            "last_successful_index": last_successful_index,
            "accumulated_data": accumulated,
        }))
    }

    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn get_output_schema(&self) -> Value {
        json!({
            "results": "array",
            "last_successful_index": "integer",
            "accumulated_data": "object",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;

    #[derive(Debug)]
    struct AddField {
        base: BaseNode,
        key: &'static str,
    }

    #[async_trait]
    impl Node for AddField {
        async fn execute_core(&self, input: Value) -> FlowResult<Value> {
            Ok(json!({self.key: input.get(self.key).cloned().unwrap_or(json!(1))}))
        }
        fn base(&self) -> &BaseNode {
            &self.base
        }
    }

    fn add_field(id: &str, key: &'static str) -> Arc<dyn Node> {
        Arc::new(AddField {
            base: BaseNode::new(id, NodeMetadata::new(NodeKind::Custom)),
            key,
        })
    }

    #[derive(Debug)]
    struct AlwaysFails {
        base: BaseNode,
    }

    #[async_trait]
    impl Node for AlwaysFails {
        async fn execute_core(&self, _input: Value) -> FlowResult<Value> {
            Err(FlowError::scheduler("nope"))
        }
        fn base(&self) -> &BaseNode {
            &self.base
        }
    }

    #[tokio::test]
    async fn merges_object_results_across_children() {
        let node = SequenceNode::new("chain", vec![add_field("s1", "a"), add_field("s2", "b")], true);
        let result = node.execute(json!({})).await;
        assert!(result.success);
        assert_eq!(result.data["last_successful_index"], json!(1));
        assert_eq!(result.data["accumulated_data"]["a"], json!(1));
        assert_eq!(result.data["accumulated_data"]["b"], json!(1));
    }

    #[tokio::test]
    async fn stop_on_error_halts_the_chain() {
        let failing = Arc::new(AlwaysFails {
            base: BaseNode::new("boom", NodeMetadata::new(NodeKind::Custom)),
        });
        let node = SequenceNode::new("chain", vec![add_field("s1", "a"), failing, add_field("s3", "c")], true);
        let result = node.execute(json!({})).await;
        assert!(result.success);
        let results = result.data["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(result.data["accumulated_data"]["a"], json!(1));
        assert!(result.data["accumulated_data"].get("c").is_none());
    }
}

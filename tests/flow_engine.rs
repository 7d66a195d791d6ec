//! End-to-end scenarios for the flow execution engine, exercised through
//! the public API only (no internal `graph`/`node` module access).

use async_trait::async_trait;
use flow_graph::{BaseNode, FlowEngine, FlowError, FlowResult, Node, NodeKind, NodeMetadata};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

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
async fn linear_three_node_success() {
    let mut engine = FlowEngine::new();
    engine.add_node(echo("A", json!({"k": "a"})));
    engine.add_node(echo("B", json!({"k": "b"})));
    engine.add_node(echo("C", json!({"k": "c"})));
    engine.add_edge("A", "B", None, None).unwrap();
    engine.add_edge("B", "C", None, None).unwrap();

    let execution = engine.execute_flow(json!({}), None, None).await.unwrap();

    assert_eq!(execution.execution_path, vec!["A", "B", "C"]);
    assert_eq!(execution.node_results["C"].data["k"], json!("c"));
}

#[tokio::test]
async fn conditional_branch_runs_only_the_admitted_target() {
    let mut engine = FlowEngine::new();
    engine.add_node(echo("A", json!({"ok": true})));
    engine.add_node(echo("B", json!({"via": "b"})));
    engine.add_node(echo("C", json!({"via": "c"})));
    engine
        .add_edge("A", "B", Some(Arc::new(|data: &Value| data["ok"] == json!(true))), None)
        .unwrap();
    engine
        .add_edge("A", "C", Some(Arc::new(|data: &Value| data["ok"] == json!(false))), None)
        .unwrap();

    let execution = engine.execute_flow(json!({}), None, None).await.unwrap();

    let mut keys: Vec<&String> = execution.node_results.keys().collect();
    keys.sort();
    assert_eq!(keys, vec!["A", "B"]);
}

#[tokio::test]
async fn parallel_fan_out_fan_in_merges_both_branches_into_the_join() {
    let mut engine = FlowEngine::new();
    engine.add_node(echo("A", json!({})));
    engine.add_node(echo("B", json!({"x": 1})));
    engine.add_node(echo("C", json!({"y": 2})));
    engine.add_node(echo("D", json!({})));
    engine.add_edge("A", "B", None, None).unwrap();
    engine.add_edge("A", "C", None, None).unwrap();
    engine.add_edge("B", "D", None, None).unwrap();
    engine.add_edge("C", "D", None, None).unwrap();

    let execution = engine.execute_flow(json!({}), None, None).await.unwrap();

    assert_eq!(execution.node_results.len(), 4);
    assert_eq!(execution.execution_path.last(), Some(&"D".to_string()));
    assert!(execution.execution_path.iter().position(|id| id == "B").unwrap() < execution.execution_path.iter().position(|id| id == "D").unwrap());
    assert!(execution.execution_path.iter().position(|id| id == "C").unwrap() < execution.execution_path.iter().position(|id| id == "D").unwrap());
}

#[derive(Debug)]
struct FailsTwiceThenSucceeds {
    base: BaseNode,
    remaining_failures: AtomicU32,
}

#[async_trait]
impl Node for FailsTwiceThenSucceeds {
    async fn execute_core(&self, _input: Value) -> FlowResult<Value> {
        if self.remaining_failures.fetch_sub(1, Ordering::SeqCst) > 0 {
            Err(FlowError::scheduler("transient failure"))
        } else {
            Ok(json!({"recovered": true}))
        }
    }

    fn base(&self) -> &BaseNode {
        &self.base
    }
}

#[tokio::test]
async fn retry_then_success_reaches_exactly_three_attempts() {
    let mut engine = FlowEngine::new();
    engine.add_node(Arc::new(FailsTwiceThenSucceeds {
        base: BaseNode::new("A", NodeMetadata::new(NodeKind::Custom).with_retry_count(2).with_timeout(Duration::from_secs(1))),
        remaining_failures: AtomicU32::new(2),
    }));

    let execution = engine.execute_flow(json!({}), None, None).await.unwrap();

    let result = &execution.node_results["A"];
    assert!(result.success);
    assert_eq!(result.data["recovered"], json!(true));
}

#[derive(Debug)]
struct SleepsForever {
    base: BaseNode,
}

#[async_trait]
impl Node for SleepsForever {
    async fn execute_core(&self, _input: Value) -> FlowResult<Value> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Value::Null)
    }

    fn base(&self) -> &BaseNode {
        &self.base
    }
}

#[tokio::test]
async fn node_level_timeout_fails_the_node_but_completes_the_flow() {
    let mut engine = FlowEngine::new();
    engine.add_node(Arc::new(SleepsForever {
        base: BaseNode::new("A", NodeMetadata::new(NodeKind::Custom).with_timeout(Duration::from_secs(1))),
    }));

    let execution = engine.execute_flow(json!({}), None, None).await.unwrap();

    let result = &execution.node_results["A"];
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Execution timeout after 1.0s"));
}

#[tokio::test]
async fn cycle_rejection_leaves_history_untouched() {
    let mut engine = FlowEngine::new();
    engine.add_node(echo("A", json!({})));
    engine.add_node(echo("B", json!({})));
    engine.add_edge("A", "B", None, None).unwrap();
    engine.add_edge("B", "A", None, None).unwrap();

    let err = engine.execute_flow(json!({}), None, None).await.unwrap_err();

    assert!(err.to_string().contains("cycle"));
    assert!(engine.history().is_empty());
}

#[tokio::test]
async fn adding_then_removing_a_node_restores_edge_list() {
    let mut engine = FlowEngine::new();
    engine.add_node(echo("A", json!({})));
    engine.add_node(echo("B", json!({})));
    engine.add_edge("A", "B", None, None).unwrap();

    engine.add_node(echo("C", json!({})));
    engine.add_edge("A", "C", None, None).unwrap();
    engine.remove_node("C");

    let (is_valid, issues) = engine.validate_flow();
    assert!(is_valid, "{issues:?}");
    assert_eq!(engine.get_entry_nodes(), vec!["A".to_string()]);
    assert_eq!(engine.get_exit_nodes(), vec!["B".to_string()]);
}

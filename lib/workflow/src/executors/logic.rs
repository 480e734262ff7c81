//! Control-flow executors. Branch pruning and loop iteration are the
//! scheduler's job; these only compute values.

use super::{single, wrong_config};
use crate::error::NodeError;
use crate::node::{
    CONDITION_PORT, FALSE_VALUE_PORT, MergeStrategy, Node, NodeConfig, NodeKind, TRUE_VALUE_PORT,
};
use crate::registry::{NodeContext, NodeExecutor, PortValues};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};

/// `logic-condition`: `condition ? trueValue : falseValue`.
pub struct ConditionExecutor;

/// Reads a condition value. `null` counts as false.
pub(crate) fn condition_value(value: Option<&JsonValue>) -> Result<bool, NodeError> {
    match value {
        None | Some(JsonValue::Null) => Ok(false),
        Some(JsonValue::Bool(b)) => Ok(*b),
        Some(other) => Err(NodeError::invalid_input(
            CONDITION_PORT,
            format!("expected a boolean, got {other}"),
        )),
    }
}

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    async fn execute(
        &self,
        node: &Node,
        inputs: &PortValues,
        _ctx: &NodeContext,
    ) -> Result<PortValues, NodeError> {
        if !matches!(node.config, NodeConfig::Condition(_)) {
            return Err(wrong_config(node, NodeKind::Condition));
        }
        let port = if condition_value(inputs.get(CONDITION_PORT))? {
            TRUE_VALUE_PORT
        } else {
            FALSE_VALUE_PORT
        };
        let result = inputs.get(port).cloned().unwrap_or(JsonValue::Null);
        Ok(single("result", result))
    }
}

/// `logic-merge`
pub struct MergeExecutor;

#[async_trait]
impl NodeExecutor for MergeExecutor {
    async fn execute(
        &self,
        node: &Node,
        inputs: &PortValues,
        _ctx: &NodeContext,
    ) -> Result<PortValues, NodeError> {
        let NodeConfig::Merge(config) = &node.config else {
            return Err(wrong_config(node, NodeKind::Merge));
        };

        // absent and null inputs are ignored
        let values: Vec<(String, &JsonValue)> = (1..=config.input_count)
            .map(|i| format!("input{i}"))
            .filter_map(|port| {
                let value = inputs.get(&port)?;
                (!value.is_null()).then_some((port, value))
            })
            .collect();

        let merged = if values.is_empty() {
            JsonValue::Null
        } else {
            match config.merge_strategy {
                MergeStrategy::Concat => concat(&values),
                MergeStrategy::Overlay => overlay(&values)?,
                MergeStrategy::Zip => zip(&values),
            }
        };
        Ok(single("merged", merged))
    }
}

fn concat(values: &[(String, &JsonValue)]) -> JsonValue {
    if values.iter().all(|(_, v)| v.is_string()) {
        let joined: String = values.iter().filter_map(|(_, v)| v.as_str()).collect();
        return JsonValue::String(joined);
    }
    let mut items = Vec::new();
    for (_, value) in values {
        match value {
            JsonValue::Array(elements) => items.extend(elements.iter().cloned()),
            other => items.push((*other).clone()),
        }
    }
    JsonValue::Array(items)
}

fn overlay(values: &[(String, &JsonValue)]) -> Result<JsonValue, NodeError> {
    let mut merged = Map::new();
    for (port, value) in values {
        let JsonValue::Object(fields) = value else {
            return Err(NodeError::invalid_input(
                port.as_str(),
                "overlay merges objects only",
            ));
        };
        merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Ok(JsonValue::Object(merged))
}

fn zip(values: &[(String, &JsonValue)]) -> JsonValue {
    let columns: Vec<Vec<JsonValue>> = values
        .iter()
        .map(|(_, value)| match value {
            JsonValue::Array(elements) => elements.clone(),
            other => vec![(*other).clone()],
        })
        .collect();
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    let rows = (0..len)
        .map(|i| JsonValue::Array(columns.iter().map(|c| c[i].clone()).collect()))
        .collect();
    JsonValue::Array(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeServices, context};
    use serde_json::json;
    use std::sync::Arc;

    fn merge_node(strategy: &str, count: usize) -> Node {
        let JsonValue::Object(properties) = json!({"mergeStrategy": strategy, "inputCount": count})
        else {
            unreachable!()
        };
        Node::new("m".into(), NodeKind::Merge, properties).unwrap()
    }

    async fn merge(strategy: &str, inputs: &[(&str, JsonValue)]) -> Result<JsonValue, NodeError> {
        let node = merge_node(strategy, 3);
        let inputs: PortValues = inputs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        let outputs = MergeExecutor
            .execute(&node, &inputs, &context(Arc::new(FakeServices::echo())))
            .await?;
        Ok(outputs["merged"].clone())
    }

    #[tokio::test]
    async fn condition_selects_branch() {
        let node = Node::new("c".into(), NodeKind::Condition, Default::default()).unwrap();
        let ctx = context(Arc::new(FakeServices::echo()));
        let mut inputs = PortValues::from([
            ("condition".to_string(), json!(true)),
            ("trueValue".to_string(), json!("yes")),
            ("falseValue".to_string(), json!("no")),
        ]);
        let outputs = ConditionExecutor.execute(&node, &inputs, &ctx).await.unwrap();
        assert_eq!(outputs["result"], "yes");

        inputs.insert("condition".to_string(), JsonValue::Null);
        inputs.remove("falseValue");
        let outputs = ConditionExecutor.execute(&node, &inputs, &ctx).await.unwrap();
        assert_eq!(outputs["result"], JsonValue::Null);
    }

    #[test]
    fn condition_values() {
        assert!(condition_value(Some(&json!(true))).unwrap());
        assert!(!condition_value(None).unwrap());
        assert!(condition_value(Some(&json!("true"))).is_err());
    }

    #[tokio::test]
    async fn concat_joins_strings() {
        let merged = merge("concat", &[("input1", json!("ab")), ("input3", json!("cd"))])
            .await
            .unwrap();
        assert_eq!(merged, json!("abcd"));
    }

    #[tokio::test]
    async fn concat_flattens_arrays() {
        let merged = merge(
            "concat",
            &[("input1", json!([1, 2])), ("input2", json!(3)), ("input3", json!([4]))],
        )
        .await
        .unwrap();
        assert_eq!(merged, json!([1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn overlay_later_wins() {
        let merged = merge(
            "overlay",
            &[("input1", json!({"a": 1, "b": 1})), ("input2", json!({"b": 2}))],
        )
        .await
        .unwrap();
        assert_eq!(merged, json!({"a": 1, "b": 2}));

        let err = merge("overlay", &[("input1", json!({"a": 1})), ("input2", json!(5))])
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidInput { port, .. } if port == "input2"));
    }

    #[tokio::test]
    async fn zip_truncates_to_shortest() {
        let merged = merge(
            "zip",
            &[("input1", json!([1, 2, 3])), ("input2", json!(["a", "b"])), ("input3", json!(null))],
        )
        .await
        .unwrap();
        assert_eq!(merged, json!([[1, "a"], [2, "b"]]));
    }

    #[tokio::test]
    async fn nothing_to_merge_is_null() {
        assert_eq!(merge("concat", &[]).await.unwrap(), JsonValue::Null);
    }
}

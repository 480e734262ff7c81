//! Data executors: execution input, execution output and transforms.

use super::{single, wrong_config};
use crate::error::NodeError;
use crate::node::{ArithmeticOperator, Node, NodeConfig, NodeKind, TransformConfig, Transformation};
use crate::path::JsonPath;
use crate::registry::{NodeContext, NodeExecutor, PortValues};
use async_trait::async_trait;
use serde_json::{Number, Value as JsonValue};

/// `data-input`: emits the execution input, narrowed by `path` when set,
/// or `defaultValue` when there is nothing to emit.
pub struct InputExecutor;

#[async_trait]
impl NodeExecutor for InputExecutor {
    async fn execute(
        &self,
        node: &Node,
        _inputs: &PortValues,
        ctx: &NodeContext,
    ) -> Result<PortValues, NodeError> {
        let NodeConfig::DataInput(config) = &node.config else {
            return Err(wrong_config(node, NodeKind::DataInput));
        };

        let selected = match &config.path {
            Some(expression) => {
                let path = JsonPath::parse(expression)
                    .map_err(|e| NodeError::Failed { reason: e.to_string() })?;
                path.select(&ctx.input).cloned()
            }
            None => Some(ctx.input.as_ref().clone()),
        };
        let value = match selected {
            Some(JsonValue::Null) | None => config.default_value.clone(),
            Some(value) => value,
        };
        Ok(single("value", value))
    }
}

/// `data-output`: accepts its `data` input. The engine reads the value from
/// the node's recorded inputs.
pub struct OutputExecutor;

#[async_trait]
impl NodeExecutor for OutputExecutor {
    async fn execute(
        &self,
        node: &Node,
        _inputs: &PortValues,
        _ctx: &NodeContext,
    ) -> Result<PortValues, NodeError> {
        if !matches!(node.config, NodeConfig::DataOutput(_)) {
            return Err(wrong_config(node, NodeKind::DataOutput));
        }
        Ok(PortValues::new())
    }
}

/// `data-transform`
pub struct TransformExecutor;

#[async_trait]
impl NodeExecutor for TransformExecutor {
    async fn execute(
        &self,
        node: &Node,
        inputs: &PortValues,
        _ctx: &NodeContext,
    ) -> Result<PortValues, NodeError> {
        let NodeConfig::Transform(config) = &node.config else {
            return Err(wrong_config(node, NodeKind::Transform));
        };
        let input = inputs.get("input").unwrap_or(&JsonValue::Null);
        Ok(single("output", transform(config, input)?))
    }
}

fn transform(config: &TransformConfig, input: &JsonValue) -> Result<JsonValue, NodeError> {
    match config.transformation {
        Transformation::Identity => Ok(input.clone()),
        Transformation::JsonPath => {
            let path = JsonPath::parse(&config.json_path)
                .map_err(|e| NodeError::Failed { reason: e.to_string() })?;
            Ok(path.select(input).cloned().unwrap_or(JsonValue::Null))
        }
        Transformation::Template => {
            let template = config.template.as_deref().unwrap_or_default();
            render(template, input).map(JsonValue::String)
        }
        Transformation::Arithmetic => {
            let (Some(operator), Some(operand)) = (config.operator, config.operand) else {
                return Err(NodeError::Failed {
                    reason: "arithmetic needs an operator and an operand".to_string(),
                });
            };
            arithmetic(input, operator, operand)
        }
    }
}

/// Replaces `{{path}}` tokens with values selected from `input`. Strings
/// are inserted as-is, other values as JSON, missing values as nothing.
fn render(template: &str, input: &JsonValue) -> Result<String, NodeError> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            rendered.push_str(&rest[open..]);
            return Ok(rendered);
        };
        let path = JsonPath::parse(&after[..close]).map_err(|e| NodeError::Failed {
            reason: format!("template token: {e}"),
        })?;
        match path.select(input) {
            Some(JsonValue::String(s)) => rendered.push_str(s),
            Some(JsonValue::Null) | None => {}
            Some(other) => rendered.push_str(&other.to_string()),
        }
        rest = &after[close + 2..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

fn arithmetic(
    input: &JsonValue,
    operator: ArithmeticOperator,
    operand: f64,
) -> Result<JsonValue, NodeError> {
    let number = match input {
        JsonValue::Number(n) => n.clone(),
        JsonValue::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .ok_or_else(|| NodeError::invalid_input("input", format!("'{s}' is not a number")))?,
        other => {
            return Err(NodeError::invalid_input(
                "input",
                format!("arithmetic needs a number, got {other}"),
            ));
        }
    };
    let lhs = number.as_f64().unwrap_or_default();
    let result = match operator {
        ArithmeticOperator::Add => lhs + operand,
        ArithmeticOperator::Subtract => lhs - operand,
        ArithmeticOperator::Multiply => lhs * operand,
        ArithmeticOperator::Divide => lhs / operand,
    };

    // integers stay integers when the result is whole
    const EXACT: f64 = 9_007_199_254_740_992.0;
    if (number.is_i64() || number.is_u64()) && result.fract() == 0.0 && result.abs() < EXACT {
        #[allow(clippy::cast_possible_truncation)]
        return Ok(JsonValue::from(result as i64));
    }
    Number::from_f64(result)
        .map(JsonValue::Number)
        .ok_or_else(|| NodeError::Failed {
            reason: format!("arithmetic produced {result}"),
        })
}

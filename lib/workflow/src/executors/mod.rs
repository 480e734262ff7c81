//! Built-in node executors.
//!
//! - [`ai`]: text, image, speech, translation and sentiment through
//!   [`flowmill_services::Services`]
//! - [`automation`]: email, Slack and webhooks
//! - [`logic`]: condition and merge (loops are run by the scheduler)
//! - [`data`]: input, output and transform

pub mod ai;
pub mod automation;
pub mod data;
pub mod logic;

use crate::error::NodeError;
use crate::node::{Node, NodeKind};
use crate::registry::{NodeRegistry, PortValues};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value as JsonValue};

/// Registers every built-in executor.
pub fn register_builtins(registry: &mut NodeRegistry) {
    registry.register(NodeKind::AiText, ai::TextExecutor);
    registry.register(NodeKind::AiImage, ai::ImageExecutor);
    registry.register(NodeKind::AiSpeech, ai::SpeechExecutor);
    registry.register(NodeKind::AiTranslate, ai::TranslateExecutor);
    registry.register(NodeKind::AiSentiment, ai::SentimentExecutor);
    registry.register(NodeKind::Email, automation::EmailExecutor);
    registry.register(NodeKind::Slack, automation::SlackExecutor);
    registry.register(NodeKind::Zapier, automation::ZapierExecutor);
    registry.register(NodeKind::PowerAutomate, automation::PowerAutomateExecutor);
    registry.register(NodeKind::Condition, logic::ConditionExecutor);
    registry.register(NodeKind::Merge, logic::MergeExecutor);
    registry.register(NodeKind::DataInput, data::InputExecutor);
    registry.register(NodeKind::DataOutput, data::OutputExecutor);
    registry.register(NodeKind::Transform, data::TransformExecutor);
}

/// Outputs with a single port.
pub(crate) fn single(port: &str, value: JsonValue) -> PortValues {
    PortValues::from([(port.to_string(), value)])
}

/// The executor was handed a node of another type.
pub(crate) fn wrong_config(node: &Node, expected: NodeKind) -> NodeError {
    NodeError::Failed {
        reason: format!(
            "node {} is a {} node, expected {expected}",
            node.id,
            node.kind()
        ),
    }
}

/// A string input that must be present.
pub(crate) fn required_text<'a>(inputs: &'a PortValues, port: &str) -> Result<&'a str, NodeError> {
    match inputs.get(port) {
        Some(JsonValue::String(s)) => Ok(s),
        Some(JsonValue::Null) | None => Err(NodeError::invalid_input(port, "a value is required")),
        Some(other) => Err(NodeError::invalid_input(
            port,
            format!("expected a string, got {other}"),
        )),
    }
}

/// An object input; absent values become an empty object.
pub(crate) fn object_or_empty(inputs: &PortValues, port: &str) -> Result<JsonValue, NodeError> {
    match inputs.get(port) {
        Some(value @ JsonValue::Object(_)) => Ok(value.clone()),
        Some(JsonValue::Null) | None => Ok(JsonValue::Object(Map::new())),
        Some(other) => Err(NodeError::invalid_input(
            port,
            format!("expected an object, got {other}"),
        )),
    }
}

/// Decodes a file value: base64 text, or an object with a base64 `data`
/// field.
pub(crate) fn file_bytes(inputs: &PortValues, port: &str) -> Result<Vec<u8>, NodeError> {
    let encoded = match inputs.get(port) {
        Some(JsonValue::String(s)) => s.as_str(),
        Some(JsonValue::Object(map)) => map
            .get("data")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| NodeError::invalid_input(port, "file object has no 'data' field"))?,
        Some(JsonValue::Null) | None => {
            return Err(NodeError::invalid_input(port, "a file is required"));
        }
        Some(_) => return Err(NodeError::invalid_input(port, "expected a file")),
    };
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| NodeError::invalid_input(port, format!("invalid base64: {e}")))
}

//! Stored workflow graph definitions.
//!
//! This is the JSON document the editor saves:
//!
//! ```json
//! {
//!   "nodes": [{"id": "in", "type": "data-input", "properties": {}}],
//!   "edges": [{"from": {"node": "in", "port": "value"}, "to": {"node": "out", "port": "data"}}]
//! }
//! ```
//!
//! Nothing here is validated beyond JSON shape. [`crate::graph::WorkflowGraph`]
//! turns a definition into a checked graph.

use crate::edge::{EdgeRef, PortRef};
use crate::error::GraphError;
use crate::node::{NodeId, Properties};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One node as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: NodeId,
    /// Type tag, e.g. `ai-text`.
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub properties: Properties,
}

impl NodeDefinition {
    #[must_use]
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            properties: Properties::new(),
        }
    }

    /// Sets one property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }
}

/// A whole stored graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeRef>,
}

impl GraphDefinition {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the stored JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::MalformedDefinition`] when the text is not a
    /// graph document.
    pub fn from_json(text: &str) -> Result<Self, GraphError> {
        serde_json::from_str(text).map_err(|e| GraphError::MalformedDefinition {
            reason: e.to_string(),
        })
    }

    /// Serializes to the stored JSON form.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Adds a node.
    #[must_use]
    pub fn with_node(mut self, node: NodeDefinition) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds an edge from `from_node:from_port` to `to_node:to_port`.
    #[must_use]
    pub fn with_edge(
        mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
    ) -> Self {
        self.edges.push(EdgeRef::new(
            PortRef::new(from_node, from_port),
            PortRef::new(to_node, to_port),
        ));
        self
    }
}

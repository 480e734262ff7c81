//! Edge types for workflow graphs.
//!
//! Edges connect an output port on one node to an input port on another.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An edge weight in the workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// The name of the output port on the source node.
    pub source_port: String,
    /// The name of the input port on the target node.
    pub target_port: String,
    /// Set when the edge returns a loop body's value to its loop node.
    /// Such edges are ignored by the acyclicity check.
    #[serde(default)]
    pub loop_back: bool,
}

impl Edge {
    #[must_use]
    pub fn new(source_port: impl Into<String>, target_port: impl Into<String>) -> Self {
        Self {
            source_port: source_port.into(),
            target_port: target_port.into(),
            loop_back: false,
        }
    }

    /// Marks the edge as a loop back-edge.
    #[must_use]
    pub fn into_loop_back(mut self) -> Self {
        self.loop_back = true;
        self
    }
}

/// One end of an edge: a port on a node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub node: NodeId,
    pub port: String,
}

impl PortRef {
    #[must_use]
    pub fn new(node: impl Into<NodeId>, port: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.port)
    }
}

/// A complete edge with both node ids, as stored in a graph definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRef {
    pub from: PortRef,
    pub to: PortRef,
}

impl EdgeRef {
    #[must_use]
    pub fn new(from: PortRef, to: PortRef) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for EdgeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

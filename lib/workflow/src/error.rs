//! Error types for the workflow crate.
//!
//! - `GraphError`: the definition is unusable; nothing runs.
//! - `NodeError`: one node failed; the execution carries on around it.
//! - `ExecutionError`: why an execution did not complete.
//! - `EngineError`: what the façade reports through a rootcause `Report`.

use crate::coercion::CoercionError;
use crate::node::NodeId;
use crate::port::PortType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a graph was rejected for its shape or for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphErrorKind {
    GraphInvalid,
    GraphCyclic,
}

/// Errors found while building and validating a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The definition is not a graph document.
    MalformedDefinition { reason: String },
    /// Two nodes share an id.
    DuplicateNode { node_id: NodeId },
    /// The type tag is not a known node type.
    UnknownNodeType { node_id: NodeId, node_type: String },
    /// The registry has no executor for this type.
    NoExecutor { node_id: NodeId, node_type: String },
    /// Property validation failed.
    InvalidProperties { node_id: NodeId, errors: Vec<String> },
    /// Node with the given ID was not found in the graph.
    NodeNotFound { node_id: NodeId },
    /// Source port not found on node.
    SourcePortNotFound { node_id: NodeId, port_name: String },
    /// Target port not found on node.
    TargetPortNotFound { node_id: NodeId, port_name: String },
    /// A second edge targets an input port.
    InputAlreadyConnected { node_id: NodeId, port_name: String },
    /// Port types are incompatible.
    IncompatiblePorts {
        source_node: NodeId,
        source_port: String,
        source_type: PortType,
        target_node: NodeId,
        target_port: String,
        target_type: PortType,
    },
    /// A property standing in for an unconnected input has the wrong type.
    InvalidPortDefault {
        node_id: NodeId,
        port_name: String,
        reason: String,
    },
    /// More than one `data-output` node.
    MultipleOutputNodes { node_ids: Vec<NodeId> },
    /// A loop body is wired in a way the scheduler cannot run.
    InvalidLoopBody { loop_id: NodeId, reason: String },
    /// Loops nest deeper than allowed.
    LoopNestingTooDeep { loop_id: NodeId, depth: usize },
    /// The graph contains a cycle that is not a loop back-edge.
    CycleDetected { node_ids: Vec<NodeId> },
}

impl GraphError {
    #[must_use]
    pub const fn kind(&self) -> GraphErrorKind {
        match self {
            Self::CycleDetected { .. } => GraphErrorKind::GraphCyclic,
            _ => GraphErrorKind::GraphInvalid,
        }
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedDefinition { reason } => {
                write!(f, "malformed graph definition: {reason}")
            }
            Self::DuplicateNode { node_id } => write!(f, "duplicate node id: {node_id}"),
            Self::UnknownNodeType { node_id, node_type } => {
                write!(f, "node {node_id} has unknown type '{node_type}'")
            }
            Self::NoExecutor { node_id, node_type } => {
                write!(f, "no executor registered for '{node_type}' (node {node_id})")
            }
            Self::InvalidProperties { node_id, errors } => {
                write!(f, "invalid properties on node {node_id}: {}", errors.join("; "))
            }
            Self::NodeNotFound { node_id } => {
                write!(f, "node not found: {node_id}")
            }
            Self::SourcePortNotFound { node_id, port_name } => {
                write!(f, "source port '{port_name}' not found on node {node_id}")
            }
            Self::TargetPortNotFound { node_id, port_name } => {
                write!(f, "target port '{port_name}' not found on node {node_id}")
            }
            Self::InputAlreadyConnected { node_id, port_name } => {
                write!(f, "input port '{port_name}' on node {node_id} already has an edge")
            }
            Self::IncompatiblePorts {
                source_node,
                source_port,
                source_type,
                target_node,
                target_port,
                target_type,
            } => {
                write!(
                    f,
                    "incompatible ports: {source_node}:{source_port} ({source_type}) -> {target_node}:{target_port} ({target_type})"
                )
            }
            Self::InvalidPortDefault {
                node_id,
                port_name,
                reason,
            } => {
                write!(
                    f,
                    "property '{port_name}' on node {node_id} does not fit its port: {reason}"
                )
            }
            Self::MultipleOutputNodes { node_ids } => {
                write!(f, "graph has {} data-output nodes", node_ids.len())
            }
            Self::InvalidLoopBody { loop_id, reason } => {
                write!(f, "invalid body for loop {loop_id}: {reason}")
            }
            Self::LoopNestingTooDeep { loop_id, depth } => {
                write!(f, "loop {loop_id} is nested {depth} levels deep")
            }
            Self::CycleDetected { node_ids } => {
                let names: Vec<&str> = node_ids.iter().map(NodeId::as_str).collect();
                write!(f, "graph contains a cycle through {}", names.join(", "))
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Why a single node failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum NodeError {
    /// A required input is missing or unusable.
    InvalidInput { port: String, reason: String },
    /// An incoming value could not be converted to its port type.
    CoercionFailed {
        port: String,
        from: PortType,
        to: PortType,
        reason: String,
    },
    /// An external service kept failing transiently.
    ExternalFailure { message: String, attempts: u32 },
    /// An external service refused the request.
    ExternalRejected { message: String },
    /// The loop collection was longer than `maxIterations`.
    LoopBounded {
        max_iterations: u32,
        collection_len: usize,
    },
    /// A loop body failed during one iteration.
    LoopIterationFailed {
        index: usize,
        node_id: NodeId,
        reason: String,
    },
    /// The executor itself failed.
    Failed { reason: String },
    /// The node was interrupted by cancellation or the deadline.
    Cancelled,
}

impl NodeError {
    /// Wraps a coercion failure for `port`.
    #[must_use]
    pub fn coercion(port: impl Into<String>, error: CoercionError) -> Self {
        Self::CoercionFailed {
            port: port.into(),
            from: error.from,
            to: error.to,
            reason: error.reason,
        }
    }

    #[must_use]
    pub fn invalid_input(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            port: port.into(),
            reason: reason.into(),
        }
    }

    /// Describes the failure of a single attempt, without retry counts.
    #[must_use]
    pub fn attempt_message(&self) -> String {
        match self {
            Self::ExternalFailure { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Returns true for failures worth another attempt.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ExternalFailure { .. })
    }
}

impl From<flowmill_services::ServiceError> for NodeError {
    fn from(e: flowmill_services::ServiceError) -> Self {
        if e.transient {
            Self::ExternalFailure {
                message: e.message,
                attempts: 1,
            }
        } else {
            Self::ExternalRejected { message: e.message }
        }
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { port, reason } => write!(f, "invalid input '{port}': {reason}"),
            Self::CoercionFailed {
                port,
                from,
                to,
                reason,
            } => write!(f, "cannot coerce {from} to {to} for input '{port}': {reason}"),
            Self::ExternalFailure { message, attempts } => {
                write!(f, "external service failed after {attempts} attempt(s): {message}")
            }
            Self::ExternalRejected { message } => {
                write!(f, "external service rejected the request: {message}")
            }
            Self::LoopBounded {
                max_iterations,
                collection_len,
            } => write!(
                f,
                "collection of {collection_len} items exceeds maxIterations {max_iterations}"
            ),
            Self::LoopIterationFailed {
                index,
                node_id,
                reason,
            } => write!(f, "iteration {index} failed at node {node_id}: {reason}"),
            Self::Failed { reason } => write!(f, "{reason}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for NodeError {}

/// Why an execution did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ExecutionError {
    /// The first node that failed.
    NodeFailed { node_id: NodeId, error: NodeError },
    /// The output node never received a value.
    OutputNotProduced { reason: String },
    Cancelled,
    TimedOut,
    /// The scheduler detected an impossible state and stopped.
    SchedulerInvariantViolated { reason: String },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeFailed { node_id, error } => write!(f, "node {node_id} failed: {error}"),
            Self::OutputNotProduced { reason } => write!(f, "output not produced: {reason}"),
            Self::Cancelled => write!(f, "execution cancelled"),
            Self::TimedOut => write!(f, "execution deadline exceeded"),
            Self::SchedulerInvariantViolated { reason } => {
                write!(f, "scheduler invariant violated: {reason}")
            }
        }
    }
}

impl std::error::Error for ExecutionError {}

/// Errors surfaced by [`crate::engine::Engine`] before any node runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The graph definition was rejected.
    Graph(GraphError),
    /// The execution input is not JSON.
    MalformedInput { reason: String },
}

impl EngineError {
    /// Returns the graph rejection kind, if this is one.
    #[must_use]
    pub const fn graph_kind(&self) -> Option<GraphErrorKind> {
        match self {
            Self::Graph(e) => Some(e.kind()),
            Self::MalformedInput { .. } => None,
        }
    }
}

impl From<GraphError> for EngineError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph(e) => write!(f, "graph rejected: {e}"),
            Self::MalformedInput { reason } => write!(f, "malformed execution input: {reason}"),
        }
    }
}

impl std::error::Error for EngineError {}

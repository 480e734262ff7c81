//! Node executors and the registry mapping node types to them.
//!
//! Executors are pure with respect to scheduling state: they receive the
//! node, its coerced input values and a [`NodeContext`], and return output
//! values or a [`NodeError`]. Retries, cancellation and bookkeeping belong to
//! the scheduler.

use crate::error::{GraphError, NodeError};
use crate::executors;
use crate::graph::WorkflowGraph;
use crate::node::{Node, NodeId, NodeKind};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use flowmill_services::Services;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use crate::run_state::PortValues;

/// What an executor may see of the running execution.
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,
    /// Execution deadline, if any.
    pub deadline: Option<Instant>,
    /// Cancelled when the execution is cancelled or times out.
    pub cancellation: CancellationToken,
    pub services: Arc<dyn Services>,
    /// The execution input; `null` when absent.
    pub input: Arc<JsonValue>,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("node_id", &self.node_id)
            .field("deadline", &self.deadline)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Trait for node execution.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Executes a node with the given inputs.
    async fn execute(
        &self,
        node: &Node,
        inputs: &PortValues,
        ctx: &NodeContext,
    ) -> Result<PortValues, NodeError>;

    /// How transient failures are retried; `None` disables retries.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    /// Outputs to report instead of failing once retries are exhausted.
    fn on_exhausted(&self, _node: &Node, _error: &NodeError) -> Option<PortValues> {
        None
    }
}

/// Maps node types to executors.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    executors: HashMap<NodeKind, Arc<dyn NodeExecutor>>,
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.executors.keys().map(|k| k.tag()).collect();
        kinds.sort_unstable();
        f.debug_struct("NodeRegistry").field("kinds", &kinds).finish()
    }
}

impl NodeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in executor.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        executors::register_builtins(&mut registry);
        registry
    }

    /// Registers an executor, replacing any previous one for the type.
    pub fn register(&mut self, kind: NodeKind, executor: impl NodeExecutor + 'static) {
        self.executors.insert(kind, Arc::new(executor));
    }

    #[must_use]
    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&kind).cloned()
    }

    /// Returns true if nodes of this type can run. Loops are run by the
    /// scheduler itself.
    #[must_use]
    pub fn supports(&self, kind: NodeKind) -> bool {
        kind == NodeKind::Loop || self.executors.contains_key(&kind)
    }

    /// Checks that every node in the graph can run.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NoExecutor`] for the first unsupported node.
    pub fn check(&self, graph: &WorkflowGraph) -> Result<(), GraphError> {
        for id in graph.topological_order() {
            let Some(node) = graph.get_node(id) else {
                continue;
            };
            if !self.supports(node.kind()) {
                return Err(GraphError::NoExecutor {
                    node_id: node.id.clone(),
                    node_type: node.kind().tag().to_string(),
                });
            }
        }
        Ok(())
    }
}

//! Workflow execution engine for flowmill.
//!
//! A workflow is a directed graph of typed nodes whose ports are wired
//! together by edges. This crate provides:
//!
//! - **Definitions**: the stored JSON form of a graph ([`GraphDefinition`])
//! - **Graph model**: validated, typed graphs on petgraph ([`WorkflowGraph`])
//! - **Planning**: branch gates, loop scopes and the output target
//!   ([`ExecutionPlan`])
//! - **Executors**: one [`NodeExecutor`] per node type, looked up in a
//!   [`NodeRegistry`]
//! - **Execution**: a bounded-concurrency scheduler with retries, deadlines
//!   and cancellation, driven through [`Engine`]

pub mod coercion;
pub mod definition;
pub mod edge;
pub mod engine;
pub mod error;
pub mod execution;
pub mod executors;
pub mod graph;
pub mod node;
pub mod path;
pub mod plan;
pub mod port;
pub mod propagate;
pub mod recorder;
pub mod registry;
pub mod retry;
pub mod run_state;
mod scheduler;

#[cfg(test)]
mod testing;

pub use definition::{GraphDefinition, NodeDefinition};
pub use edge::{Edge, PortRef};
pub use engine::Engine;
pub use error::{EngineError, ExecutionError, GraphError, GraphErrorKind, NodeError};
pub use execution::{
    EngineSettings, ExecuteOptions, ExecutionRecord, ExecutionResult, ExecutionStatus,
};
pub use graph::WorkflowGraph;
pub use node::{Node, NodeCategory, NodeConfig, NodeId, NodeKind};
pub use plan::ExecutionPlan;
pub use port::{InputPort, OutputPort, PortType};
pub use recorder::LogEntry;
pub use registry::{NodeContext, NodeExecutor, NodeRegistry, PortValues};
pub use retry::RetryPolicy;
pub use run_state::{NodeRunState, SkipReason};

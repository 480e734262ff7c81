//! Per-execution node state.
//!
//! A [`NodeRun`] is created for every node of a scope when the scope starts
//! and is owned by that scope's scheduler. Nodes themselves are never
//! mutated during execution.

use crate::coercion::AppliedCoercion;
use crate::error::NodeError;
use crate::node::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

/// Values keyed by port name.
pub type PortValues = BTreeMap<String, JsonValue>;

/// The lifecycle state of one node within one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeRunState {
    /// Waiting for inputs, captures or a condition.
    Pending,
    /// Queued for dispatch.
    Ready,
    /// Executor in flight.
    Running,
    Succeeded,
    Failed,
    /// Never ran; see [`SkipReason`].
    Skipped,
    /// Interrupted by cancellation or the deadline.
    Cancelled,
}

impl NodeRunState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }
}

/// Why a node was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SkipReason {
    /// A node it depends on failed; `node` is the one that failed first.
    UpstreamFailed { node: NodeId },
    /// It only feeds the branch a condition did not take.
    BranchNotTaken { condition: NodeId },
    /// The condition gating it finished without a value.
    ConditionUnresolved { condition: NodeId },
    /// No source reaches it.
    Unreachable,
    /// The execution stopped before it could run.
    Aborted,
}

impl SkipReason {
    /// The node whose failure caused this skip, if the skip propagates to
    /// consumers.
    #[must_use]
    pub fn failed_origin(&self) -> Option<&NodeId> {
        match self {
            Self::UpstreamFailed { node } => Some(node),
            _ => None,
        }
    }
}

/// One executor invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    /// 1-based.
    pub attempt: u32,
    /// Milliseconds from the node's start to the end of this attempt,
    /// including earlier attempts and backoff.
    pub elapsed_ms: u64,
    /// Why this attempt failed. The retry count lives on the node's final
    /// error only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Execution state of a single node within a scope.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRun {
    pub node_id: NodeId,
    pub state: NodeRunState,
    /// Connected input ports still waiting for a value.
    pub pending_inputs: BTreeSet<String>,
    pub input_values: PortValues,
    pub output_values: Option<PortValues>,
    pub error: Option<NodeError>,
    pub skip_reason: Option<SkipReason>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    pub attempts: Vec<Attempt>,
    pub coercions: Vec<AppliedCoercion>,
    /// Values still expected for this loop's body.
    pub pending_captures: usize,
    /// Condition branches not yet resolved in this node's favour.
    pub gates_pending: usize,
    /// Value ports of a condition whose feeder failed, with the origin.
    pub failed_ports: BTreeMap<String, NodeId>,
    /// Times promoted to Ready.
    pub promotions: u32,
}

impl NodeRun {
    /// Creates a new run in pending state.
    #[must_use]
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: NodeRunState::Pending,
            pending_inputs: BTreeSet::new(),
            input_values: PortValues::new(),
            output_values: None,
            error: None,
            skip_reason: None,
            started_at: None,
            finished_at: None,
            elapsed_ms: 0,
            attempts: Vec::new(),
            coercions: Vec::new(),
            pending_captures: 0,
            gates_pending: 0,
            failed_ports: BTreeMap::new(),
            promotions: 0,
        }
    }

    /// Returns true once nothing holds the node back.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.state == NodeRunState::Pending
            && self.pending_inputs.is_empty()
            && self.pending_captures == 0
            && self.gates_pending == 0
    }

    /// Marks the node as ready to execute.
    pub fn mark_ready(&mut self) {
        self.state = NodeRunState::Ready;
        self.promotions += 1;
    }

    /// Starts execution of this node.
    pub fn start(&mut self) {
        self.state = NodeRunState::Running;
        self.started_at = Some(Utc::now());
    }

    /// Marks the node as succeeded.
    pub fn succeed(&mut self, outputs: PortValues) {
        self.state = NodeRunState::Succeeded;
        self.output_values = Some(outputs);
        self.finish();
    }

    /// Marks the node as failed.
    pub fn fail(&mut self, error: NodeError) {
        self.state = NodeRunState::Failed;
        self.error = Some(error);
        self.finish();
    }

    /// Marks the node as skipped.
    pub fn skip(&mut self, reason: SkipReason) {
        self.state = NodeRunState::Skipped;
        self.skip_reason = Some(reason);
        self.finish();
    }

    /// Marks the node as cancelled.
    pub fn cancel(&mut self) {
        self.state = NodeRunState::Cancelled;
        self.error = Some(NodeError::Cancelled);
        self.finish();
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.finished_at = Some(now);
        if let Some(started) = self.started_at {
            self.elapsed_ms = u64::try_from((now - started).num_milliseconds()).unwrap_or(0);
        }
    }
}

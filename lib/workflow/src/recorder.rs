//! Execution trace.
//!
//! Every terminal transition of a [`NodeRun`] produces one [`LogEntry`].
//! Schedulers of all scopes share a [`Recorder`]; entries arrive in the
//! order the transitions happened.

use crate::coercion::AppliedCoercion;
use crate::error::NodeError;
use crate::node::{Node, NodeId, NodeKind};
use crate::run_state::{Attempt, NodeRun, NodeRunState, PortValues, SkipReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use tokio::sync::mpsc;

/// One node's terminal transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub node_id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeKind,
    pub state: NodeRunState,
    /// Iteration indexes of the enclosing loops, outermost first. Empty at
    /// the top level.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub iteration: Vec<usize>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    pub inputs_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<Attempt>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coercions: Vec<AppliedCoercion>,
    /// Present in verbose mode only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<PortValues>,
    /// Present in verbose mode only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<PortValues>,
}

impl LogEntry {
    /// Builds the entry for a run that just reached a terminal state.
    #[must_use]
    pub fn new(node: &Node, run: &NodeRun, iteration: &[usize], verbose: bool) -> Self {
        let outputs_digest = match run.state {
            NodeRunState::Succeeded => Some(digest(&port_json(
                run.output_values.as_ref().unwrap_or(&PortValues::new()),
            ))),
            _ => None,
        };
        Self {
            node_id: run.node_id.clone(),
            node_type: node.kind(),
            state: run.state,
            iteration: iteration.to_vec(),
            started_at: run.started_at,
            finished_at: run.finished_at,
            elapsed_ms: run.elapsed_ms,
            inputs_digest: digest(&port_json(&run.input_values)),
            outputs_digest,
            error: run.error.clone(),
            skip_reason: run.skip_reason.clone(),
            attempts: run.attempts.clone(),
            coercions: run.coercions.clone(),
            inputs: verbose.then(|| run.input_values.clone()),
            outputs: if verbose {
                run.output_values.clone()
            } else {
                None
            },
        }
    }
}

fn port_json(values: &PortValues) -> JsonValue {
    JsonValue::Object(
        values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

/// Lowercase hex SHA-256 of the canonical JSON encoding of `value`.
#[must_use]
pub fn digest(value: &JsonValue) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Compact JSON with object keys sorted, independent of map ordering.
fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&JsonValue::String(key.clone()), out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

/// Collects log entries from every scope of one execution.
#[derive(Debug, Clone)]
pub struct Recorder {
    tx: mpsc::UnboundedSender<LogEntry>,
    verbose: bool,
}

/// The receiving end of a [`Recorder`].
#[derive(Debug)]
pub struct RecordedLog {
    rx: mpsc::UnboundedReceiver<LogEntry>,
}

impl Recorder {
    #[must_use]
    pub fn channel(verbose: bool) -> (Self, RecordedLog) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, verbose }, RecordedLog { rx })
    }

    /// Appends the entry for `run`, which must be terminal.
    pub fn record(&self, node: &Node, run: &NodeRun, iteration: &[usize]) {
        // the receiver outlives every scheduler; a send error means the
        // execution was dropped and nobody reads the log
        let _ = self
            .tx
            .send(LogEntry::new(node, run, iteration, self.verbose));
    }
}

impl RecordedLog {
    /// Returns every entry recorded so far, in order.
    pub fn drain(&mut self) -> Vec<LogEntry> {
        let mut entries = Vec::new();
        while let Ok(entry) = self.rx.try_recv() {
            entries.push(entry);
        }
        entries
    }
}

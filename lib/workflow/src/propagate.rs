//! Value propagation.
//!
//! Moves values between nodes: the outputs of a finished node onto its
//! outbound edges, and values arriving at an input port into the
//! consumer's [`NodeRun`], coerced to the port's type.

use crate::coercion::{AppliedCoercion, coerce};
use crate::edge::PortRef;
use crate::error::NodeError;
use crate::graph::WorkflowGraph;
use crate::node::{LOOP_INDEX_PORT, LOOP_RESULT_PORT, Node, NodeId, NodeKind};
use crate::plan::ExecutionPlan;
use crate::port::PortType;
use crate::run_state::{NodeRun, PortValues};
use serde_json::Value as JsonValue;

/// Writes `value` into `port` of `run`, coercing it to the port's type.
///
/// The port stops being pending even when coercion fails.
///
/// # Errors
///
/// Returns [`NodeError::CoercionFailed`] when the value cannot be converted.
pub fn deliver(
    node: &Node,
    run: &mut NodeRun,
    port: &str,
    value: JsonValue,
) -> Result<(), NodeError> {
    run.pending_inputs.remove(port);
    let target = node.input_port(port).map_or(PortType::Any, |p| p.port_type);
    let (converted, applied) = coerce(value, target).map_err(|e| NodeError::coercion(port, e))?;
    if let Some((from, to)) = applied {
        run.coercions.push(AppliedCoercion {
            port: port.to_string(),
            from,
            to,
        });
    }
    run.input_values.insert(port.to_string(), converted);
    Ok(())
}

/// Connected input ports a node waits for. A loop never waits for its own
/// `result` back-edge.
#[must_use]
pub fn connected_inputs(graph: &WorkflowGraph, node: &Node) -> Vec<String> {
    node.inputs
        .iter()
        .filter(|port| !is_back_edge_port(node, &port.name))
        .filter(|port| graph.inbound(&node.id, &port.name).is_some())
        .map(|port| port.name.clone())
        .collect()
}

/// Unconnected input ports with a same-named property, and that property's
/// value.
#[must_use]
pub fn property_fallbacks(graph: &WorkflowGraph, node: &Node) -> Vec<(String, JsonValue)> {
    node.inputs
        .iter()
        .filter(|port| !is_back_edge_port(node, &port.name))
        .filter(|port| graph.inbound(&node.id, &port.name).is_none())
        .filter_map(|port| {
            let value = node.properties.get(&port.name)?;
            Some((port.name.clone(), value.clone()))
        })
        .collect()
}

/// The values a succeeded node sends along its forward edges. An output
/// port the executor left unset sends `null`.
#[must_use]
pub fn outbound_values(
    plan: &ExecutionPlan,
    node_id: &NodeId,
    outputs: &PortValues,
) -> Vec<(PortRef, JsonValue)> {
    plan.forward_outbound(node_id)
        .into_iter()
        .map(|c| {
            let value = outputs.get(c.source_port).cloned().unwrap_or(JsonValue::Null);
            (PortRef::new(c.node.clone(), c.target_port), value)
        })
        .collect()
}

/// The values that start one loop iteration: the element on `item` edges and
/// its position on `index` edges.
#[must_use]
pub fn iteration_values(
    plan: &ExecutionPlan,
    loop_id: &NodeId,
    item: &JsonValue,
    index: usize,
) -> Vec<(PortRef, JsonValue)> {
    plan.iteration_seeds(loop_id)
        .into_iter()
        .map(|c| {
            let value = if c.source_port == LOOP_INDEX_PORT {
                JsonValue::from(index)
            } else {
                item.clone()
            };
            (PortRef::new(c.node.clone(), c.target_port), value)
        })
        .collect()
}

fn is_back_edge_port(node: &Node, port: &str) -> bool {
    node.kind() == NodeKind::Loop && port == LOOP_RESULT_PORT
}

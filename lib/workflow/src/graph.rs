//! Workflow graph implementation using petgraph.
//!
//! Workflows are directed graphs where:
//! - Nodes are workflow steps with typed ports
//! - Edges connect output ports to input ports
//!
//! [`WorkflowGraph::from_definition`] performs every structural check that
//! does not depend on loop layout: unique ids, known types, valid properties,
//! existing ports, one edge per input, port type compatibility and
//! acyclicity once loop back-edges are set aside.

use crate::coercion::coerce;
use crate::definition::GraphDefinition;
use crate::edge::{Edge, EdgeRef, PortRef};
use crate::error::GraphError;
use crate::node::{LOOP_RESULT_PORT, Node, NodeId, NodeKind};
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef as _;
use std::collections::HashMap;

/// A validated workflow graph.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    /// The underlying directed graph.
    graph: DiGraph<Node, Edge>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<NodeId, NodeIndex>,
    /// Node ids in topological order of forward edges.
    topological_order: Vec<NodeId>,
}

/// A connection as seen from one of its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection<'a> {
    /// The node at the other end.
    pub node: &'a NodeId,
    pub source_port: &'a str,
    pub target_port: &'a str,
    pub loop_back: bool,
}

impl WorkflowGraph {
    /// Builds and validates a graph from its stored definition.
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found. Cycles are reported as
    /// [`GraphError::CycleDetected`]; everything else is a shape error.
    pub fn from_definition(definition: &GraphDefinition) -> Result<Self, GraphError> {
        let mut graph = Self {
            graph: DiGraph::new(),
            node_index_map: HashMap::new(),
            topological_order: Vec::new(),
        };

        for def in &definition.nodes {
            let kind =
                NodeKind::from_tag(&def.node_type).ok_or_else(|| GraphError::UnknownNodeType {
                    node_id: def.id.clone(),
                    node_type: def.node_type.clone(),
                })?;
            let node = Node::new(def.id.clone(), kind, def.properties.clone()).map_err(|errors| {
                GraphError::InvalidProperties {
                    node_id: def.id.clone(),
                    errors,
                }
            })?;
            graph.add_node(node)?;
        }

        for edge in &definition.edges {
            graph.add_edge(edge)?;
        }

        graph.check_port_defaults()?;
        graph.topological_order = graph.forward_order()?;
        Ok(graph)
    }

    fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.node_index_map.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode { node_id: node.id });
        }
        let node_id = node.id.clone();
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id, index);
        Ok(())
    }

    /// Adds an edge between two ports.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Source or target node doesn't exist
    /// - Source port doesn't exist on source node
    /// - Target port doesn't exist on target node, or already has an edge
    /// - Port types are incompatible
    fn add_edge(&mut self, edge: &EdgeRef) -> Result<(), GraphError> {
        let EdgeRef { from, to } = edge;
        let source_index = self.index_of(&from.node)?;
        let target_index = self.index_of(&to.node)?;
        let source_node = &self.graph[source_index];
        let target_node = &self.graph[target_index];

        let source_port =
            source_node
                .output_port(&from.port)
                .ok_or_else(|| GraphError::SourcePortNotFound {
                    node_id: from.node.clone(),
                    port_name: from.port.clone(),
                })?;
        let target_port =
            target_node
                .input_port(&to.port)
                .ok_or_else(|| GraphError::TargetPortNotFound {
                    node_id: to.node.clone(),
                    port_name: to.port.clone(),
                })?;

        let already_connected = self
            .graph
            .edges_directed(target_index, Direction::Incoming)
            .any(|e| e.weight().target_port == to.port);
        if already_connected {
            return Err(GraphError::InputAlreadyConnected {
                node_id: to.node.clone(),
                port_name: to.port.clone(),
            });
        }

        if !source_port.port_type.is_compatible_with(target_port.port_type) {
            return Err(GraphError::IncompatiblePorts {
                source_node: from.node.clone(),
                source_port: from.port.clone(),
                source_type: source_port.port_type,
                target_node: to.node.clone(),
                target_port: to.port.clone(),
                target_type: target_port.port_type,
            });
        }

        let mut weight = Edge::new(from.port.clone(), to.port.clone());
        if target_node.kind() == NodeKind::Loop && to.port == LOOP_RESULT_PORT {
            weight = weight.into_loop_back();
        }
        self.graph.add_edge(source_index, target_index, weight);
        Ok(())
    }

    /// Unconnected inputs read a same-named property. Those values must fit
    /// the port.
    fn check_port_defaults(&self) -> Result<(), GraphError> {
        for node in self.nodes() {
            for port in &node.inputs {
                let Some(value) = node.properties.get(&port.name) else {
                    continue;
                };
                if self.inbound(&node.id, &port.name).is_some() {
                    continue;
                }
                coerce(value.clone(), port.port_type).map_err(|e| {
                    GraphError::InvalidPortDefault {
                        node_id: node.id.clone(),
                        port_name: port.name.clone(),
                        reason: e.to_string(),
                    }
                })?;
            }
        }
        Ok(())
    }

    /// Orders nodes along forward edges, or reports the nodes on a cycle.
    fn forward_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let forward = self
            .graph
            .filter_map(|_, node| Some(node.id.clone()), |_, edge| (!edge.loop_back).then_some(()));

        match toposort(&forward, None) {
            Ok(order) => Ok(order.into_iter().map(|i| forward[i].clone()).collect()),
            Err(_) => {
                let mut node_ids: Vec<NodeId> = tarjan_scc(&forward)
                    .into_iter()
                    .filter(|scc| scc.len() > 1 || forward.contains_edge(scc[0], scc[0]))
                    .flatten()
                    .map(|i| forward[i].clone())
                    .collect();
                node_ids.sort();
                Err(GraphError::CycleDetected { node_ids })
            }
        }
    }

    fn index_of(&self, node_id: &NodeId) -> Result<NodeIndex, GraphError> {
        self.node_index_map
            .get(node_id)
            .copied()
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: node_id.clone(),
            })
    }

    /// Returns a reference to a node by its ID.
    #[must_use]
    pub fn get_node(&self, node_id: &NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns all nodes in the graph.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node ids ordered so that every forward edge points later.
    #[must_use]
    pub fn topological_order(&self) -> &[NodeId] {
        &self.topological_order
    }

    /// Returns nodes that have no incoming edges (sources).
    pub fn entry_nodes(&self) -> Vec<&Node> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Incoming).count() == 0)
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Returns nodes that have no outgoing edges (sinks).
    pub fn terminal_nodes(&self) -> Vec<&Node> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Outgoing).count() == 0)
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Returns the outgoing connections of a node; `node` is each target.
    pub fn successors(&self, node_id: &NodeId) -> Vec<Connection<'_>> {
        self.connections(node_id, Direction::Outgoing)
    }

    /// Returns the incoming connections of a node; `node` is each source.
    pub fn predecessors(&self, node_id: &NodeId) -> Vec<Connection<'_>> {
        self.connections(node_id, Direction::Incoming)
    }

    fn connections(&self, node_id: &NodeId, direction: Direction) -> Vec<Connection<'_>> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };

        let mut connections: Vec<Connection<'_>> = self
            .graph
            .edges_directed(index, direction)
            .map(|edge| {
                let other = match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                let weight = edge.weight();
                Connection {
                    node: &self.graph[other].id,
                    source_port: &weight.source_port,
                    target_port: &weight.target_port,
                    loop_back: weight.loop_back,
                }
            })
            .collect();
        // petgraph yields edges newest first
        connections.reverse();
        connections
    }

    /// Returns the source feeding an input port, if connected.
    #[must_use]
    pub fn inbound(&self, node_id: &NodeId, port: &str) -> Option<PortRef> {
        self.predecessors(node_id)
            .into_iter()
            .find(|c| c.target_port == port)
            .map(|c| PortRef::new(c.node.clone(), c.source_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::NodeDefinition;
    use crate::error::GraphErrorKind;
    use serde_json::json;

    fn text_pipeline() -> GraphDefinition {
        GraphDefinition::new()
            .with_node(NodeDefinition::new("in", "data-input"))
            .with_node(NodeDefinition::new("ai", "ai-text"))
            .with_node(NodeDefinition::new("out", "data-output"))
            .with_edge("in", "value", "ai", "prompt")
            .with_edge("ai", "text", "out", "data")
    }

    #[test]
    fn builds_linear_graph() {
        let graph = WorkflowGraph::from_definition(&text_pipeline()).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        let order: Vec<&str> = graph.topological_order().iter().map(NodeId::as_str).collect();
        assert_eq!(order, ["in", "ai", "out"]);
    }

    #[test]
    fn entry_and_terminal_nodes() {
        let graph = WorkflowGraph::from_definition(&text_pipeline()).unwrap();
        let entries = graph.entry_nodes();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id.as_str(), "in");
        assert_eq!(graph.terminal_nodes()[0].id.as_str(), "out");
    }

    #[test]
    fn successors_and_inbound() {
        let graph = WorkflowGraph::from_definition(&text_pipeline()).unwrap();
        let next = graph.successors(&"in".into());
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].node.as_str(), "ai");
        assert_eq!(next[0].target_port, "prompt");
        assert_eq!(
            graph.inbound(&"out".into(), "data"),
            Some(PortRef::new("ai", "text"))
        );
        assert_eq!(graph.inbound(&"in".into(), "value"), None);
    }

    #[test]
    fn rejects_unknown_type() {
        let definition =
            GraphDefinition::new().with_node(NodeDefinition::new("x", "ai-telepathy"));
        let err = WorkflowGraph::from_definition(&definition).unwrap_err();
        assert!(matches!(err, GraphError::UnknownNodeType { .. }));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let definition = GraphDefinition::new()
            .with_node(NodeDefinition::new("x", "data-input"))
            .with_node(NodeDefinition::new("x", "data-output"));
        let err = WorkflowGraph::from_definition(&definition).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode { node_id: "x".into() });
    }

    #[test]
    fn rejects_invalid_properties() {
        let definition = GraphDefinition::new()
            .with_node(NodeDefinition::new("ai", "ai-text").with_property("model", json!("")));
        let err = WorkflowGraph::from_definition(&definition).unwrap_err();
        assert_eq!(err.kind(), GraphErrorKind::GraphInvalid);
        assert!(matches!(err, GraphError::InvalidProperties { .. }));
    }

    #[test]
    fn rejects_missing_ports_and_nodes() {
        let base = GraphDefinition::new()
            .with_node(NodeDefinition::new("in", "data-input"))
            .with_node(NodeDefinition::new("ai", "ai-text"));

        let missing_source = base.clone().with_edge("in", "nope", "ai", "prompt");
        assert!(matches!(
            WorkflowGraph::from_definition(&missing_source),
            Err(GraphError::SourcePortNotFound { .. })
        ));

        let missing_target = base.clone().with_edge("in", "value", "ai", "nope");
        assert!(matches!(
            WorkflowGraph::from_definition(&missing_target),
            Err(GraphError::TargetPortNotFound { .. })
        ));

        let missing_node = base.with_edge("ghost", "value", "ai", "prompt");
        assert!(matches!(
            WorkflowGraph::from_definition(&missing_node),
            Err(GraphError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn rejects_second_edge_into_input() {
        let definition = GraphDefinition::new()
            .with_node(NodeDefinition::new("a", "data-input"))
            .with_node(NodeDefinition::new("b", "data-input"))
            .with_node(NodeDefinition::new("ai", "ai-text"))
            .with_edge("a", "value", "ai", "prompt")
            .with_edge("b", "value", "ai", "prompt");
        assert!(matches!(
            WorkflowGraph::from_definition(&definition),
            Err(GraphError::InputAlreadyConnected { .. })
        ));
    }

    #[test]
    fn rejects_incompatible_port_types() {
        let definition = GraphDefinition::new()
            .with_node(NodeDefinition::new("sentiment", "ai-sentiment"))
            .with_node(NodeDefinition::new("email", "automation-email"))
            .with_edge("sentiment", "sentiment", "email", "body");
        // object -> string is a registered coercion
        assert!(WorkflowGraph::from_definition(&definition).is_ok());

        let definition = GraphDefinition::new()
            .with_node(NodeDefinition::new("send", "automation-email"))
            .with_node(NodeDefinition::new("ai", "ai-text"))
            .with_edge("send", "status", "ai", "prompt");
        let err = WorkflowGraph::from_definition(&definition).unwrap_err();
        assert!(matches!(err, GraphError::IncompatiblePorts { .. }));
    }

    #[test]
    fn rejects_ill_typed_port_default() {
        let definition = GraphDefinition::new().with_node(
            NodeDefinition::new("cond", "logic-condition")
                .with_property("condition", json!("yes")),
        );
        let err = WorkflowGraph::from_definition(&definition).unwrap_err();
        assert!(matches!(err, GraphError::InvalidPortDefault { .. }));
    }

    #[test]
    fn detects_two_node_cycle() {
        let definition = GraphDefinition::new()
            .with_node(NodeDefinition::new("a", "data-transform"))
            .with_node(NodeDefinition::new("b", "data-transform"))
            .with_edge("a", "output", "b", "input")
            .with_edge("b", "output", "a", "input");
        let err = WorkflowGraph::from_definition(&definition).unwrap_err();
        assert_eq!(err.kind(), GraphErrorKind::GraphCyclic);
        assert_eq!(
            err,
            GraphError::CycleDetected {
                node_ids: vec!["a".into(), "b".into()]
            }
        );
    }

    #[test]
    fn detects_self_loop() {
        let definition = GraphDefinition::new()
            .with_node(NodeDefinition::new("a", "logic-merge"))
            .with_edge("a", "merged", "a", "input1");
        let err = WorkflowGraph::from_definition(&definition).unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                node_ids: vec!["a".into()]
            }
        );
    }

    #[test]
    fn loop_back_edges_are_not_cycles() {
        let definition = GraphDefinition::new()
            .with_node(NodeDefinition::new("in", "data-input"))
            .with_node(NodeDefinition::new("loop", "logic-loop"))
            .with_node(NodeDefinition::new("t", "data-transform"))
            .with_edge("in", "value", "loop", "collection")
            .with_edge("loop", "item", "t", "input")
            .with_edge("t", "output", "loop", "result");
        let graph = WorkflowGraph::from_definition(&definition).unwrap();
        let back: Vec<_> = graph
            .predecessors(&"loop".into())
            .into_iter()
            .filter(|c| c.loop_back)
            .collect();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].node.as_str(), "t");
    }
}

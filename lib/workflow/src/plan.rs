//! Static execution plan.
//!
//! Everything the scheduler needs that can be derived from the graph alone
//! is computed once here: topological ranks, loop bodies and their nesting,
//! the scope each node runs in, values captured into loop bodies, the nodes
//! held back behind each condition, unreachable nodes and the designated
//! output.
//!
//! A *scope* is either the top level (`None`) or one loop's body
//! (`Some(loop_id)`). Every node belongs to exactly one scope: the innermost
//! loop whose body contains it.

use crate::edge::{EdgeRef, PortRef};
use crate::error::GraphError;
use crate::graph::{Connection, WorkflowGraph};
use crate::node::{
    FALSE_VALUE_PORT, LOOP_INDEX_PORT, LOOP_ITEM_PORT, LOOP_RESULT_PORT, LOOP_RESULTS_PORT, Node,
    NodeId, NodeKind, TRUE_VALUE_PORT,
};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Deepest allowed loop nesting.
pub const MAX_LOOP_DEPTH: usize = 16;

/// Which value port of a condition a gate guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Branch {
    True,
    False,
}

impl Branch {
    #[must_use]
    pub const fn port(self) -> &'static str {
        match self {
            Self::True => TRUE_VALUE_PORT,
            Self::False => FALSE_VALUE_PORT,
        }
    }

    #[must_use]
    pub const fn taken(condition: bool) -> Self {
        if condition { Self::True } else { Self::False }
    }

    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
        }
    }
}

/// A condition branch a node is exclusive to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Gate {
    pub condition: NodeId,
    pub branch: Branch,
}

/// Where a value written to an input port lands, seen from one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The target runs in this scope.
    Member(NodeId),
    /// The target is inside the body of a loop that runs in this scope.
    Nested(NodeId),
    /// The target is the `result` port of the loop this scope iterates.
    ResultSlot,
}

/// Static facts about one loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopPlan {
    /// Every node the loop runs per iteration, nested bodies included.
    pub body: BTreeSet<NodeId>,
    /// 1 for a top-level loop.
    pub depth: usize,
    /// Edges feeding the body from outside it, excluding the loop's own
    /// `item`/`index` outputs.
    pub captures: Vec<EdgeRef>,
    /// Whether a body node feeds the `result` port.
    pub has_result: bool,
}

/// What the execution output is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// The `data` input of the single `data-output` node.
    DataOutput(NodeId),
    /// All top-level sinks.
    Sinks(Vec<NodeId>),
}

/// A validated graph plus its scheduling metadata.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    graph: WorkflowGraph,
    ranks: HashMap<NodeId, usize>,
    scope_of: HashMap<NodeId, Option<NodeId>>,
    members: HashMap<Option<NodeId>, Vec<NodeId>>,
    loops: HashMap<NodeId, LoopPlan>,
    gates: HashMap<NodeId, Vec<Gate>>,
    exclusives: HashMap<(NodeId, Branch), BTreeSet<NodeId>>,
    unreachable: BTreeSet<NodeId>,
    output: OutputTarget,
}

impl ExecutionPlan {
    /// Analyses a graph.
    ///
    /// # Errors
    ///
    /// Returns an error for more than one `data-output` node, malformed loop
    /// bodies and loops nested too deeply.
    pub fn new(graph: WorkflowGraph) -> Result<Self, GraphError> {
        let mut plan = Self {
            ranks: ranks(&graph),
            graph,
            scope_of: HashMap::new(),
            members: HashMap::new(),
            loops: HashMap::new(),
            gates: HashMap::new(),
            exclusives: HashMap::new(),
            unreachable: BTreeSet::new(),
            output: OutputTarget::Sinks(Vec::new()),
        };

        let outputs: Vec<NodeId> = plan
            .graph
            .nodes()
            .filter(|n| n.kind() == NodeKind::DataOutput)
            .map(|n| n.id.clone())
            .collect();
        if outputs.len() > 1 {
            let mut node_ids = outputs;
            node_ids.sort();
            return Err(GraphError::MultipleOutputNodes { node_ids });
        }

        plan.plan_loops()?;
        if let Some(output) = outputs.first() {
            if plan.scope_of(output).is_some() {
                return Err(GraphError::InvalidLoopBody {
                    loop_id: plan.scope_of(output).cloned().unwrap_or_else(|| output.clone()),
                    reason: format!("data-output node {output} cannot run per iteration"),
                });
            }
        }

        plan.plan_members();
        plan.plan_gates();
        plan.plan_reachability();
        plan.output = match outputs.into_iter().next() {
            Some(output) => OutputTarget::DataOutput(output),
            None => OutputTarget::Sinks(plan.sinks()),
        };
        Ok(plan)
    }

    fn plan_loops(&mut self) -> Result<(), GraphError> {
        let loop_ids: Vec<NodeId> = self
            .graph
            .topological_order()
            .iter()
            .filter(|id| self.kind_of(id) == Some(NodeKind::Loop))
            .cloned()
            .collect();

        let mut bodies: HashMap<NodeId, BTreeSet<NodeId>> = HashMap::new();
        for loop_id in &loop_ids {
            let body = self.body_of(loop_id);
            self.check_body(loop_id, &body)?;
            bodies.insert(loop_id.clone(), body);
        }

        // innermost containing loop per node; bodies must nest
        let mut containing: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
        for (loop_id, body) in &bodies {
            for node in body {
                containing.entry(node).or_default().push(loop_id);
            }
        }
        for (node, loops) in &mut containing {
            loops.sort_by_key(|l| std::cmp::Reverse(bodies[*l].len()));
            for pair in loops.windows(2) {
                let (outer, inner) = (pair[0], pair[1]);
                if !bodies[outer].contains(inner) {
                    return Err(GraphError::InvalidLoopBody {
                        loop_id: inner.clone(),
                        reason: format!(
                            "node {node} is also in the body of unrelated loop {outer}"
                        ),
                    });
                }
            }
            self.scope_of
                .insert((*node).clone(), loops.last().map(|l| (*l).clone()));
        }
        for node in self.graph.nodes() {
            self.scope_of.entry(node.id.clone()).or_insert(None);
        }

        // parents come first in topological order
        for loop_id in &loop_ids {
            let depth = match self.scope_of(loop_id) {
                Some(parent) => self.loops.get(parent).map_or(1, |p| p.depth + 1),
                None => 1,
            };
            if depth > MAX_LOOP_DEPTH {
                return Err(GraphError::LoopNestingTooDeep {
                    loop_id: loop_id.clone(),
                    depth,
                });
            }
            let body = bodies.remove(loop_id).unwrap_or_default();
            let captures = self.captures_of(loop_id, &body);
            let has_result = self.graph.inbound(loop_id, LOOP_RESULT_PORT).is_some();
            self.loops.insert(
                loop_id.clone(),
                LoopPlan {
                    body,
                    depth,
                    captures,
                    has_result,
                },
            );
        }
        Ok(())
    }

    /// Nodes reachable from the loop's `item`/`index` outputs without
    /// passing through the loop or following back-edges.
    fn body_of(&self, loop_id: &NodeId) -> BTreeSet<NodeId> {
        let mut body = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = self
            .graph
            .successors(loop_id)
            .into_iter()
            .filter(|c| is_iteration_port(c.source_port))
            .map(|c| c.node.clone())
            .collect();

        while let Some(node) = queue.pop_front() {
            if node == *loop_id || !body.insert(node.clone()) {
                continue;
            }
            for next in self.graph.successors(&node) {
                if !next.loop_back {
                    queue.push_back(next.node.clone());
                }
            }
        }
        body
    }

    fn check_body(&self, loop_id: &NodeId, body: &BTreeSet<NodeId>) -> Result<(), GraphError> {
        let invalid = |reason: String| GraphError::InvalidLoopBody {
            loop_id: loop_id.clone(),
            reason,
        };

        for node in body {
            for next in self.graph.successors(node) {
                if next.node == loop_id {
                    if next.target_port != LOOP_RESULT_PORT {
                        return Err(invalid(format!(
                            "body node {node} feeds loop input '{}'",
                            next.target_port
                        )));
                    }
                } else if !body.contains(next.node) {
                    return Err(invalid(format!(
                        "body node {node} feeds {} outside the body",
                        next.node
                    )));
                }
            }
        }

        for next in self.graph.successors(loop_id) {
            if next.source_port == LOOP_RESULTS_PORT && body.contains(next.node) {
                return Err(invalid(format!(
                    "'results' feeds body node {}",
                    next.node
                )));
            }
        }

        if let Some(source) = self.graph.inbound(loop_id, LOOP_RESULT_PORT) {
            if !body.contains(&source.node) {
                return Err(invalid(format!(
                    "'result' is fed by {} which is not in the body",
                    source.node
                )));
            }
        }
        Ok(())
    }

    fn captures_of(&self, loop_id: &NodeId, body: &BTreeSet<NodeId>) -> Vec<EdgeRef> {
        let mut captures = Vec::new();
        for node in body {
            for prev in self.graph.predecessors(node) {
                if prev.node != loop_id && !body.contains(prev.node) {
                    captures.push(EdgeRef::new(
                        PortRef::new(prev.node.clone(), prev.source_port),
                        PortRef::new(node.clone(), prev.target_port),
                    ));
                }
            }
        }
        captures
    }

    fn plan_members(&mut self) {
        for id in self.graph.topological_order() {
            let scope = self.scope_of.get(id).cloned().flatten();
            self.members.entry(scope).or_default().push(id.clone());
        }
        let ranks = &self.ranks;
        let rank = |id: &NodeId| ranks.get(id).copied().unwrap_or_default();
        for members in self.members.values_mut() {
            members.sort_by(|a, b| rank(a).cmp(&rank(b)).then_with(|| a.cmp(b)));
        }
    }

    /// A node is exclusive to (C, p) when every value it produces flows
    /// only into `C.p`, directly or through other exclusive nodes of the
    /// same scope.
    fn plan_gates(&mut self) {
        let mut found: Vec<((NodeId, Branch), BTreeSet<NodeId>)> = Vec::new();

        for members in self.members.values() {
            for condition in members
                .iter()
                .filter(|id| self.kind_of(id) == Some(NodeKind::Condition))
            {
                for branch in [Branch::True, Branch::False] {
                    let mut exclusive = BTreeSet::new();
                    for candidate in members.iter().rev() {
                        if candidate == condition {
                            continue;
                        }
                        let outbound = self.forward_outbound(candidate);
                        let only_into_branch = !outbound.is_empty()
                            && outbound.iter().all(|c| {
                                (c.node == condition && c.target_port == branch.port())
                                    || exclusive.contains(c.node)
                            });
                        if only_into_branch {
                            exclusive.insert(candidate.clone());
                        }
                    }
                    if !exclusive.is_empty() {
                        found.push(((condition.clone(), branch), exclusive));
                    }
                }
            }
        }

        for ((condition, branch), exclusive) in found {
            for node in &exclusive {
                self.gates.entry(node.clone()).or_default().push(Gate {
                    condition: condition.clone(),
                    branch,
                });
            }
            self.exclusives.insert((condition, branch), exclusive);
        }
    }

    fn plan_reachability(&mut self) {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&NodeId> =
            self.graph.entry_nodes().into_iter().map(|n| &n.id).collect();
        while let Some(node) = queue.pop_front() {
            if !seen.insert(node.clone()) {
                continue;
            }
            queue.extend(self.graph.successors(node).into_iter().map(|c| c.node));
        }
        self.unreachable = self
            .graph
            .nodes()
            .map(|n| n.id.clone())
            .filter(|id| !seen.contains(id))
            .collect();
    }

    fn sinks(&self) -> Vec<NodeId> {
        self.members(None)
            .iter()
            .filter(|id| !self.unreachable.contains(*id))
            .filter(|id| self.forward_outbound(id).is_empty())
            .cloned()
            .collect()
    }

    fn kind_of(&self, id: &NodeId) -> Option<NodeKind> {
        self.graph.get_node(id).map(Node::kind)
    }

    /// Returns the underlying graph.
    #[must_use]
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.graph.get_node(id)
    }

    /// Longest forward path from any source to this node.
    #[must_use]
    pub fn rank(&self, id: &NodeId) -> usize {
        self.ranks.get(id).copied().unwrap_or_default()
    }

    /// The innermost loop whose body contains the node.
    #[must_use]
    pub fn scope_of(&self, id: &NodeId) -> Option<&NodeId> {
        self.scope_of.get(id).and_then(Option::as_ref)
    }

    /// Nodes running directly in a scope, in (rank, id) order.
    #[must_use]
    pub fn members(&self, scope: Option<&NodeId>) -> &[NodeId] {
        self.members
            .get(&scope.cloned())
            .map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn loop_plan(&self, loop_id: &NodeId) -> Option<&LoopPlan> {
        self.loops.get(loop_id)
    }

    /// Condition branches the node is held behind.
    #[must_use]
    pub fn gates(&self, id: &NodeId) -> &[Gate] {
        self.gates.get(id).map_or(&[], Vec::as_slice)
    }

    /// Nodes exclusive to one branch of a condition.
    pub fn exclusives(&self, condition: &NodeId, branch: Branch) -> impl Iterator<Item = &NodeId> {
        self.exclusives
            .get(&(condition.clone(), branch))
            .into_iter()
            .flatten()
    }

    #[must_use]
    pub fn is_exclusive(&self, node: &NodeId, condition: &NodeId, branch: Branch) -> bool {
        self.exclusives
            .get(&(condition.clone(), branch))
            .is_some_and(|set| set.contains(node))
    }

    /// Nodes no source reaches.
    #[must_use]
    pub fn unreachable(&self) -> &BTreeSet<NodeId> {
        &self.unreachable
    }

    #[must_use]
    pub fn output(&self) -> &OutputTarget {
        &self.output
    }

    /// Outbound connections that carry a node's outputs to its scope.
    ///
    /// A loop's `item`/`index` edges belong to its iterations and are left
    /// out.
    #[must_use]
    pub fn forward_outbound(&self, id: &NodeId) -> Vec<Connection<'_>> {
        let is_loop = self.kind_of(id) == Some(NodeKind::Loop);
        self.graph
            .successors(id)
            .into_iter()
            .filter(|c| !(is_loop && is_iteration_port(c.source_port)))
            .collect()
    }

    /// The loop's `item`/`index` edges, which seed each iteration.
    #[must_use]
    pub fn iteration_seeds(&self, loop_id: &NodeId) -> Vec<Connection<'_>> {
        self.graph
            .successors(loop_id)
            .into_iter()
            .filter(|c| is_iteration_port(c.source_port))
            .collect()
    }

    /// Resolves where a value written to `target` lands when produced in
    /// `scope`. `None` means the target is not visible from the scope.
    #[must_use]
    pub fn route(&self, scope: Option<&NodeId>, target: &PortRef) -> Option<Route> {
        let target_scope = self.scope_of.get(&target.node)?.as_ref();
        if target_scope == scope {
            return Some(Route::Member(target.node.clone()));
        }
        if scope == Some(&target.node) && target.port == LOOP_RESULT_PORT {
            return Some(Route::ResultSlot);
        }

        let mut current = target_scope;
        while let Some(loop_id) = current {
            let parent = self.scope_of(loop_id);
            if parent == scope {
                return Some(Route::Nested(loop_id.clone()));
            }
            current = parent;
        }
        None
    }
}

fn is_iteration_port(port: &str) -> bool {
    port == LOOP_ITEM_PORT || port == LOOP_INDEX_PORT
}

/// Longest path from a source along forward edges.
fn ranks(graph: &WorkflowGraph) -> HashMap<NodeId, usize> {
    let mut ranks: HashMap<NodeId, usize> = HashMap::new();
    for id in graph.topological_order() {
        let rank = graph
            .predecessors(id)
            .into_iter()
            .filter(|c| !c.loop_back)
            .filter_map(|c| ranks.get(c.node).map(|r| r + 1))
            .max()
            .unwrap_or(0);
        ranks.insert(id.clone(), rank);
    }
    ranks
}

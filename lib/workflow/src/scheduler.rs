//! Scope scheduler.
//!
//! A [`ScopeRun`] owns the [`NodeRun`]s of one scope (the top level or one
//! loop iteration) and drives them to terminal states:
//!
//! 1. Seed inputs from properties, captured values and loop bindings
//! 2. Promote nodes whose inputs, captures and gates are satisfied
//! 3. Dispatch ready nodes in (rank, id) order, one permit per executor
//! 4. Apply completions, propagate values and cascade failures
//! 5. Stop when nothing is ready or in flight, or the execution aborts
//!
//! Executors run as tokio tasks and report back through a `JoinSet`, so the
//! scope state itself is only touched by the scope's own task. Loops hold no
//! permit while their iterations run; each iteration is a child `ScopeRun`.

use crate::edge::PortRef;
use crate::error::NodeError;
use crate::executors::logic::condition_value;
use crate::node::{
    CONDITION_PORT, LOOP_COLLECTION_PORT, LOOP_RESULTS_PORT, NodeConfig, NodeId, NodeKind,
};
use crate::plan::{Branch, ExecutionPlan, Route};
use crate::propagate;
use crate::recorder::Recorder;
use crate::registry::{NodeContext, NodeRegistry};
use crate::run_state::{Attempt, NodeRun, NodeRunState, PortValues, SkipReason};
use flowmill_services::Services;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Every scope, including each loop iteration, starts from fresh runs and
/// only a pending run is promoted, so a second promotion is a scheduler bug.
const MAX_PROMOTIONS: u32 = 1;

/// State shared by every scope of one execution.
pub(crate) struct Shared {
    pub plan: ExecutionPlan,
    pub registry: NodeRegistry,
    pub services: Arc<dyn Services>,
    pub input: Arc<JsonValue>,
    pub permits: Arc<Semaphore>,
    /// Cancelled by the caller.
    pub cancellation: CancellationToken,
    /// Cancelled on caller cancellation, at the deadline and on fatal errors.
    pub abort: CancellationToken,
    pub deadline: Option<Instant>,
    pub recorder: Recorder,
}

impl Shared {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plan: ExecutionPlan,
        registry: NodeRegistry,
        services: Arc<dyn Services>,
        input: JsonValue,
        concurrency: usize,
        cancellation: CancellationToken,
        deadline: Option<Instant>,
        recorder: Recorder,
    ) -> Self {
        Self {
            plan,
            registry,
            services,
            input: Arc::new(input),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            abort: cancellation.child_token(),
            cancellation,
            deadline,
            recorder,
        }
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Resolves at the deadline, or never.
async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// How a dispatched node ended.
#[derive(Debug)]
enum Outcome {
    Succeeded(PortValues),
    Failed(NodeError),
    Cancelled,
    /// Stops the whole execution.
    Fatal(String),
}

#[derive(Debug)]
struct Completion {
    node_id: NodeId,
    attempts: Vec<Attempt>,
    outcome: Outcome,
}

/// Final state of one scope.
#[derive(Debug)]
pub(crate) struct ScopeOutcome {
    pub runs: BTreeMap<NodeId, NodeRun>,
    /// The value that reached the loop's `result` port.
    pub result: Option<JsonValue>,
    pub fatal: Option<String>,
}

pub(crate) struct ScopeRun {
    shared: Arc<Shared>,
    scope: Option<NodeId>,
    iteration: Vec<usize>,
    runs: BTreeMap<NodeId, NodeRun>,
    /// Values waiting for nested loops, handed over when the loop starts.
    captures: HashMap<NodeId, Vec<(PortRef, JsonValue)>>,
    /// Branch taken by each resolved condition.
    resolved: HashMap<NodeId, bool>,
    ready: BTreeSet<(usize, NodeId)>,
    in_flight: JoinSet<Completion>,
    tasks: HashMap<task::Id, NodeId>,
    result: Option<JsonValue>,
    fatal: Option<String>,
}

impl ScopeRun {
    pub fn new(shared: Arc<Shared>, scope: Option<NodeId>, iteration: Vec<usize>) -> Self {
        Self {
            shared,
            scope,
            iteration,
            runs: BTreeMap::new(),
            captures: HashMap::new(),
            resolved: HashMap::new(),
            ready: BTreeSet::new(),
            in_flight: JoinSet::new(),
            tasks: HashMap::new(),
            result: None,
            fatal: None,
        }
    }

    /// Runs the scope to completion with `deliveries` written first.
    pub fn run(self, deliveries: Vec<(PortRef, JsonValue)>) -> BoxFuture<'static, ScopeOutcome> {
        self.drive(deliveries).boxed()
    }

    async fn drive(mut self, deliveries: Vec<(PortRef, JsonValue)>) -> ScopeOutcome {
        self.seed(deliveries);

        loop {
            if self.shared.deadline_passed() {
                self.shared.abort.cancel();
            }
            if self.fatal.is_some() || self.shared.abort.is_cancelled() {
                break;
            }
            self.dispatch_ready();
            if self.in_flight.is_empty() && self.ready.is_empty() {
                break;
            }

            let permits = Arc::clone(&self.shared.permits);
            let waiting = !self.ready.is_empty();
            tokio::select! {
                biased;
                () = self.shared.abort.cancelled() => {}
                () = until(self.shared.deadline) => self.shared.abort.cancel(),
                Some(joined) = self.in_flight.join_next_with_id() => self.on_joined(joined),
                Ok(permit) = permits.acquire_owned(), if waiting => self.dispatch_next(permit),
            }
        }

        self.finish().await
    }

    fn seed(&mut self, deliveries: Vec<(PortRef, JsonValue)>) {
        let shared = Arc::clone(&self.shared);
        let plan = &shared.plan;
        let members = plan.members(self.scope.as_ref());

        let mut rejected = Vec::new();
        for id in members {
            let Some(node) = plan.node(id) else {
                continue;
            };
            let mut run = NodeRun::new(id.clone());
            run.pending_inputs = propagate::connected_inputs(plan.graph(), node)
                .into_iter()
                .collect();
            run.gates_pending = plan.gates(id).len();
            if let Some(loop_plan) = plan.loop_plan(id) {
                run.pending_captures = loop_plan.captures.len();
            }
            for (port, value) in propagate::property_fallbacks(plan.graph(), node) {
                if let Err(error) = propagate::deliver(node, &mut run, &port, value) {
                    rejected.push((id.clone(), error));
                }
            }
            self.runs.insert(id.clone(), run);
        }

        if self.scope.is_none() {
            let unreachable: Vec<&NodeId> = members
                .iter()
                .filter(|id| plan.unreachable().contains(*id))
                .collect();
            for id in &unreachable {
                warn!(node_id = %id, "node is not reachable from any source");
                if let Some(run) = self.runs.get_mut(*id) {
                    run.skip(SkipReason::Unreachable);
                }
                self.record(id);
            }
            for id in unreachable {
                self.cascade(id, id);
            }
        }

        for (id, error) in rejected {
            self.fail_unstarted(&id, error);
        }

        // an unconnected condition reads its property, or false
        for id in members {
            if plan.node(id).map(|n| n.kind()) == Some(NodeKind::Condition)
                && plan.graph().inbound(id, CONDITION_PORT).is_none()
            {
                self.resolve(id);
            }
        }

        for (target, value) in deliveries {
            self.route(target, value);
        }
        for id in members {
            self.try_promote(id);
        }
    }

    fn dispatch_ready(&mut self) {
        while let Some((_, id)) = self.ready.first().cloned() {
            if self.is_loop(&id) {
                self.ready.pop_first();
                self.start_loop(&id);
                continue;
            }
            let Ok(permit) = Arc::clone(&self.shared.permits).try_acquire_owned() else {
                break;
            };
            self.ready.pop_first();
            self.start_leaf(&id, permit);
        }
    }

    fn dispatch_next(&mut self, permit: OwnedSemaphorePermit) {
        let Some((_, id)) = self.ready.pop_first() else {
            return;
        };
        if self.is_loop(&id) {
            self.start_loop(&id);
        } else {
            self.start_leaf(&id, permit);
        }
    }

    fn is_loop(&self, id: &NodeId) -> bool {
        self.shared.plan.node(id).map(|n| n.kind()) == Some(NodeKind::Loop)
    }

    fn start_leaf(&mut self, id: &NodeId, permit: OwnedSemaphorePermit) {
        let Some(run) = self.runs.get_mut(id) else {
            return;
        };
        run.start();
        let inputs = run.input_values.clone();
        debug!(node_id = %id, iteration = ?self.iteration, "dispatching");
        let handle = self.in_flight.spawn(run_leaf(
            Arc::clone(&self.shared),
            id.clone(),
            inputs,
            permit,
        ));
        self.tasks.insert(handle.id(), id.clone());
    }

    fn start_loop(&mut self, id: &NodeId) {
        let Some(run) = self.runs.get_mut(id) else {
            return;
        };
        run.start();
        let collection = run.input_values.get(LOOP_COLLECTION_PORT).cloned();
        let captures = self.captures.remove(id).unwrap_or_default();
        debug!(node_id = %id, iteration = ?self.iteration, "starting loop");
        let handle = self.in_flight.spawn(run_loop(
            Arc::clone(&self.shared),
            id.clone(),
            collection,
            captures,
            self.iteration.clone(),
        ));
        self.tasks.insert(handle.id(), id.clone());
    }

    fn on_joined(&mut self, joined: Result<(task::Id, Completion), JoinError>) {
        match joined {
            Ok((task, completion)) => {
                self.tasks.remove(&task);
                self.complete(completion);
            }
            Err(e) => {
                let reason = match self.tasks.remove(&e.id()) {
                    Some(id) => format!("task for node {id} did not finish: {e}"),
                    None => format!("unknown task did not finish: {e}"),
                };
                self.violate(reason);
            }
        }
    }

    fn complete(&mut self, completion: Completion) {
        let Completion {
            node_id,
            attempts,
            outcome,
        } = completion;
        let Some(run) = self.runs.get_mut(&node_id) else {
            self.violate(format!("completion for unknown node {node_id}"));
            return;
        };
        if run.state != NodeRunState::Running {
            let state = run.state;
            self.violate(format!(
                "completion for node {node_id} in state {state:?}"
            ));
            return;
        }
        run.attempts = attempts;

        match outcome {
            Outcome::Succeeded(outputs) => {
                debug!(node_id = %node_id, "succeeded");
                run.succeed(outputs.clone());
                self.record(&node_id);
                let shared = Arc::clone(&self.shared);
                for (target, value) in propagate::outbound_values(&shared.plan, &node_id, &outputs)
                {
                    self.route(target, value);
                }
            }
            Outcome::Failed(error) => {
                warn!(node_id = %node_id, %error, "node failed");
                run.fail(error);
                self.record(&node_id);
                self.cascade(&node_id, &node_id);
                self.settle_gates(&node_id);
            }
            Outcome::Cancelled => {
                run.cancel();
                self.record(&node_id);
            }
            Outcome::Fatal(reason) => {
                run.cancel();
                self.record(&node_id);
                self.violate(reason);
            }
        }
    }

    /// Writes a value produced in this scope to wherever `target` lives.
    fn route(&mut self, target: PortRef, value: JsonValue) {
        let shared = Arc::clone(&self.shared);
        match shared.plan.route(self.scope.as_ref(), &target) {
            Some(Route::Member(id)) => self.write(&id, &target.port, value),
            Some(Route::Nested(loop_id)) => {
                if let Some(run) = self.runs.get_mut(&loop_id) {
                    run.pending_captures = run.pending_captures.saturating_sub(1);
                }
                self.captures
                    .entry(loop_id.clone())
                    .or_default()
                    .push((target, value));
                self.try_promote(&loop_id);
            }
            Some(Route::ResultSlot) => self.result = Some(value),
            None => self.violate(format!("{target} is not reachable from this scope")),
        }
    }

    fn write(&mut self, id: &NodeId, port: &str, value: JsonValue) {
        let shared = Arc::clone(&self.shared);
        let Some(node) = shared.plan.node(id) else {
            return;
        };
        let Some(run) = self.runs.get_mut(id) else {
            return;
        };
        if run.state != NodeRunState::Pending {
            return;
        }
        if let Err(error) = propagate::deliver(node, run, port, value) {
            warn!(node_id = %id, port, %error, "input rejected");
            self.fail_unstarted(id, error);
            return;
        }
        if node.kind() == NodeKind::Condition && port == CONDITION_PORT {
            self.resolve(id);
        }
        self.try_promote(id);
    }

    /// Settles the gates of a condition whose `condition` value is known.
    fn resolve(&mut self, condition: &NodeId) {
        if self.resolved.contains_key(condition) {
            return;
        }
        let Some(run) = self.runs.get(condition) else {
            return;
        };
        if run.state.is_terminal() {
            return;
        }
        let taken = match condition_value(run.input_values.get(CONDITION_PORT)) {
            Ok(taken) => taken,
            Err(error) => {
                self.fail_unstarted(condition, error);
                return;
            }
        };
        self.resolved.insert(condition.clone(), taken);
        debug!(node_id = %condition, taken, "condition resolved");

        let shared = Arc::clone(&self.shared);
        let plan = &shared.plan;
        let branch = Branch::taken(taken);

        let released: Vec<&NodeId> = plan.exclusives(condition, branch).collect();
        for id in &released {
            if let Some(run) = self.runs.get_mut(*id) {
                run.gates_pending = run.gates_pending.saturating_sub(1);
            }
        }
        for id in released {
            self.try_promote(id);
        }

        for id in plan.exclusives(condition, branch.other()) {
            self.skip(
                id,
                SkipReason::BranchNotTaken {
                    condition: condition.clone(),
                },
            );
        }

        let dropped = branch.other().port();
        if let Some(feeder) = plan.graph().inbound(condition, dropped)
            && plan.is_exclusive(&feeder.node, condition, branch.other())
            && let Some(run) = self.runs.get_mut(condition)
        {
            run.pending_inputs.remove(dropped);
        }
        self.try_promote(condition);
    }

    /// A condition that ended without resolving releases nothing.
    fn settle_gates(&mut self, id: &NodeId) {
        if self.resolved.contains_key(id) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        if shared.plan.node(id).map(|n| n.kind()) != Some(NodeKind::Condition) {
            return;
        }
        for branch in [Branch::True, Branch::False] {
            for gated in shared.plan.exclusives(id, branch) {
                self.skip(
                    gated,
                    SkipReason::ConditionUnresolved {
                        condition: id.clone(),
                    },
                );
            }
        }
    }

    fn try_promote(&mut self, id: &NodeId) {
        let rank = self.shared.plan.rank(id);
        let Some(run) = self.runs.get_mut(id) else {
            return;
        };
        if !run.is_satisfied() {
            return;
        }
        if let Some(&taken) = self.resolved.get(id)
            && let Some(origin) = run.failed_ports.get(Branch::taken(taken).port()).cloned()
        {
            self.skip(id, SkipReason::UpstreamFailed { node: origin });
            return;
        }

        run.mark_ready();
        let promotions = run.promotions;
        if promotions > MAX_PROMOTIONS {
            self.violate(format!("node {id} promoted {promotions} times"));
            return;
        }
        self.ready.insert((rank, id.clone()));
    }

    /// Marks consumers of a failed or upstream-failed node.
    fn cascade(&mut self, from: &NodeId, origin: &NodeId) {
        let shared = Arc::clone(&self.shared);
        for next in shared.plan.forward_outbound(from) {
            let target = PortRef::new(next.node.clone(), next.target_port);
            match shared.plan.route(self.scope.as_ref(), &target) {
                Some(Route::Member(id)) => self.upstream_failed(&id, &target.port, origin),
                Some(Route::Nested(loop_id)) => self.skip(
                    &loop_id,
                    SkipReason::UpstreamFailed {
                        node: origin.clone(),
                    },
                ),
                // the iteration's failure is reported by the loop
                Some(Route::ResultSlot) | None => {}
            }
        }
    }

    /// A condition fails with its upstream unless `errorAsFalse` is set;
    /// every other consumer is skipped.
    fn upstream_failed(&mut self, id: &NodeId, port: &str, origin: &NodeId) {
        let shared = Arc::clone(&self.shared);
        if let Some(NodeConfig::Condition(config)) = shared.plan.node(id).map(|n| &n.config) {
            if !config.error_as_false {
                self.fail_unstarted(
                    id,
                    NodeError::Failed {
                        reason: format!("input '{port}' depends on failed node {origin}"),
                    },
                );
                return;
            }
            if port == CONDITION_PORT {
                self.write(id, port, JsonValue::Bool(false));
            } else if let Some(run) = self.runs.get_mut(id)
                && run.state == NodeRunState::Pending
            {
                run.pending_inputs.remove(port);
                run.failed_ports.insert(port.to_string(), origin.clone());
                self.try_promote(id);
            }
            return;
        }
        self.skip(
            id,
            SkipReason::UpstreamFailed {
                node: origin.clone(),
            },
        );
    }

    fn skip(&mut self, id: &NodeId, reason: SkipReason) {
        let rank = self.shared.plan.rank(id);
        let Some(run) = self.runs.get_mut(id) else {
            return;
        };
        if run.state.is_terminal() || run.state == NodeRunState::Running {
            return;
        }
        debug!(node_id = %id, ?reason, "skipped");
        self.ready.remove(&(rank, id.clone()));
        let origin = reason.failed_origin().cloned();
        run.skip(reason);
        self.record(id);
        if let Some(origin) = origin {
            self.cascade(id, &origin);
        }
        self.settle_gates(id);
    }

    /// Fails a node that never ran, such as one whose input was rejected.
    fn fail_unstarted(&mut self, id: &NodeId, error: NodeError) {
        let rank = self.shared.plan.rank(id);
        let Some(run) = self.runs.get_mut(id) else {
            return;
        };
        if run.state.is_terminal() || run.state == NodeRunState::Running {
            return;
        }
        self.ready.remove(&(rank, id.clone()));
        run.fail(error);
        self.record(id);
        self.cascade(id, id);
        self.settle_gates(id);
    }

    fn record(&self, id: &NodeId) {
        if let (Some(node), Some(run)) = (self.shared.plan.node(id), self.runs.get(id)) {
            self.shared.recorder.record(node, run, &self.iteration);
        }
    }

    fn violate(&mut self, reason: String) {
        error!(scope = ?self.scope, iteration = ?self.iteration, %reason, "scheduler invariant violated");
        self.fatal.get_or_insert(reason);
        self.shared.abort.cancel();
    }

    async fn finish(mut self) -> ScopeOutcome {
        let aborted = self.fatal.is_some() || self.shared.abort.is_cancelled();
        if aborted {
            while let Some(joined) = self.in_flight.join_next_with_id().await {
                self.on_joined(joined);
            }
        }

        let leftovers: Vec<NodeId> = self
            .runs
            .values()
            .filter(|run| !run.state.is_terminal())
            .map(|run| run.node_id.clone())
            .collect();
        if !aborted && !leftovers.is_empty() {
            let names: Vec<&str> = leftovers.iter().map(NodeId::as_str).collect();
            self.violate(format!("nodes never became ready: {}", names.join(", ")));
        }
        for id in &leftovers {
            if let Some(run) = self.runs.get_mut(id) {
                if run.state == NodeRunState::Running {
                    run.cancel();
                } else {
                    run.skip(SkipReason::Aborted);
                }
            }
            self.record(id);
        }

        ScopeOutcome {
            runs: self.runs,
            result: self.result,
            fatal: self.fatal,
        }
    }
}

/// Runs one executor, retrying transient failures within the deadline.
async fn run_leaf(
    shared: Arc<Shared>,
    node_id: NodeId,
    inputs: PortValues,
    _permit: OwnedSemaphorePermit,
) -> Completion {
    let mut attempts = Vec::new();
    let outcome = execute_with_retry(&shared, &node_id, &inputs, &mut attempts).await;
    Completion {
        node_id,
        attempts,
        outcome,
    }
}

async fn execute_with_retry(
    shared: &Shared,
    node_id: &NodeId,
    inputs: &PortValues,
    attempts: &mut Vec<Attempt>,
) -> Outcome {
    let Some(node) = shared.plan.node(node_id) else {
        return Outcome::Fatal(format!("node {node_id} is not in the plan"));
    };
    let Some(executor) = shared.registry.get(node.kind()) else {
        return Outcome::Fatal(format!("no executor for {} node {node_id}", node.kind()));
    };
    let policy = executor.retry_policy();

    let node_started = Instant::now();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let ctx = NodeContext {
            node_id: node_id.clone(),
            deadline: shared.deadline,
            cancellation: shared.abort.clone(),
            services: Arc::clone(&shared.services),
            input: Arc::clone(&shared.input),
            attempt,
        };

        let result = tokio::select! {
            biased;
            () = shared.abort.cancelled() => return Outcome::Cancelled,
            () = until(shared.deadline) => return Outcome::Cancelled,
            result = executor.execute(node, inputs, &ctx) => result,
        };
        let elapsed_ms = millis(node_started.elapsed());

        let error = match result {
            Ok(outputs) => {
                attempts.push(Attempt {
                    attempt,
                    elapsed_ms,
                    error: None,
                });
                return Outcome::Succeeded(outputs);
            }
            Err(error) => error,
        };
        attempts.push(Attempt {
            attempt,
            elapsed_ms,
            error: Some(error.attempt_message()),
        });

        if error.is_transient()
            && let Some(policy) = policy
            && policy.allows_retry_after(attempt)
        {
            let delay = policy.delay(attempt);
            if shared.deadline.is_none_or(|d| Instant::now() + delay < d) {
                warn!(node_id = %node_id, attempt, ?delay, %error, "transient failure, retrying");
                tokio::select! {
                    biased;
                    () = shared.abort.cancelled() => return Outcome::Cancelled,
                    () = tokio::time::sleep(delay) => {}
                }
                continue;
            }
            debug!(node_id = %node_id, attempt, "next retry would pass the deadline");
        }

        let error = match error {
            NodeError::ExternalFailure { message, .. } => NodeError::ExternalFailure {
                message,
                attempts: attempt,
            },
            other => other,
        };
        if let Some(outputs) = executor.on_exhausted(node, &error) {
            return Outcome::Succeeded(outputs);
        }
        return Outcome::Failed(error);
    }
}

/// Runs every iteration of a loop and collects the results.
fn run_loop(
    shared: Arc<Shared>,
    loop_id: NodeId,
    collection: Option<JsonValue>,
    captures: Vec<(PortRef, JsonValue)>,
    path: Vec<usize>,
) -> BoxFuture<'static, Completion> {
    async move {
        let outcome = iterate(&shared, &loop_id, collection, &captures, &path).await;
        Completion {
            node_id: loop_id,
            attempts: Vec::new(),
            outcome,
        }
    }
    .boxed()
}

async fn iterate(
    shared: &Arc<Shared>,
    loop_id: &NodeId,
    collection: Option<JsonValue>,
    captures: &[(PortRef, JsonValue)],
    path: &[usize],
) -> Outcome {
    let Some(NodeConfig::Loop(config)) = shared.plan.node(loop_id).map(|n| &n.config) else {
        return Outcome::Fatal(format!("node {loop_id} is not a loop"));
    };
    let has_result = shared
        .plan
        .loop_plan(loop_id)
        .is_some_and(|plan| plan.has_result);

    let items = match collection {
        Some(JsonValue::Array(items)) => items,
        Some(JsonValue::Null) | None => {
            return Outcome::Failed(NodeError::invalid_input(
                LOOP_COLLECTION_PORT,
                "there is no collection to iterate",
            ));
        }
        Some(other) => {
            return Outcome::Failed(NodeError::invalid_input(
                LOOP_COLLECTION_PORT,
                format!("expected an array, got {other}"),
            ));
        }
    };
    let max = usize::try_from(config.max_iterations).unwrap_or(usize::MAX);
    let count = items.len().min(max);
    debug!(node_id = %loop_id, count, parallel = config.parallel, "iterating");

    let iteration = |index: usize| {
        let mut deliveries = propagate::iteration_values(&shared.plan, loop_id, &items[index], index);
        deliveries.extend(captures.iter().cloned());
        let mut iteration_path = path.to_vec();
        iteration_path.push(index);
        ScopeRun::new(Arc::clone(shared), Some(loop_id.clone()), iteration_path).run(deliveries)
    };

    let outcomes: Vec<ScopeOutcome> = if config.parallel {
        join_all((0..count).map(&iteration)).await
    } else {
        let mut outcomes = Vec::with_capacity(count);
        for index in 0..count {
            let outcome = iteration(index).await;
            let stop = outcome.fatal.is_some()
                || first_failure(&outcome.runs).is_some()
                || shared.abort.is_cancelled();
            outcomes.push(outcome);
            if stop {
                break;
            }
        }
        outcomes
    };

    if let Some(reason) = outcomes.iter().find_map(|o| o.fatal.clone()) {
        return Outcome::Fatal(reason);
    }
    if shared.abort.is_cancelled() {
        return Outcome::Cancelled;
    }

    let mut results = Vec::with_capacity(outcomes.len());
    for (index, outcome) in outcomes.into_iter().enumerate() {
        if let Some(failed) = first_failure(&outcome.runs) {
            return Outcome::Failed(NodeError::LoopIterationFailed {
                index,
                node_id: failed.node_id.clone(),
                reason: failed
                    .error
                    .as_ref()
                    .map_or_else(|| "failed".to_string(), ToString::to_string),
            });
        }
        results.push(if has_result {
            outcome.result.unwrap_or(JsonValue::Null)
        } else {
            items[index].clone()
        });
    }

    if items.len() > max {
        return Outcome::Failed(NodeError::LoopBounded {
            max_iterations: config.max_iterations,
            collection_len: items.len(),
        });
    }
    Outcome::Succeeded(PortValues::from([(
        LOOP_RESULTS_PORT.to_string(),
        JsonValue::Array(results),
    )]))
}

/// The body node that failed first.
fn first_failure(runs: &BTreeMap<NodeId, NodeRun>) -> Option<&NodeRun> {
    runs.values()
        .filter(|run| run.state == NodeRunState::Failed)
        .min_by_key(|run| run.finished_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{GraphDefinition, NodeDefinition};
    use crate::graph::WorkflowGraph;
    use crate::recorder::LogEntry;
    use crate::testing::FakeServices;
    use serde_json::json;

    async fn run(
        definition: &GraphDefinition,
        input: JsonValue,
        services: FakeServices,
        concurrency: usize,
    ) -> (ScopeOutcome, Vec<LogEntry>) {
        let plan = ExecutionPlan::new(WorkflowGraph::from_definition(definition).unwrap()).unwrap();
        let (recorder, mut log) = Recorder::channel(false);
        let shared = Arc::new(Shared::new(
            plan,
            NodeRegistry::with_builtins(),
            Arc::new(services),
            input,
            concurrency,
            CancellationToken::new(),
            None,
            recorder,
        ));
        let outcome = ScopeRun::new(shared, None, Vec::new()).run(Vec::new()).await;
        (outcome, log.drain())
    }

    fn state(outcome: &ScopeOutcome, id: &str) -> NodeRunState {
        outcome.runs[&NodeId::from(id)].state
    }

    fn skip_reason(outcome: &ScopeOutcome, id: &str) -> Option<SkipReason> {
        outcome.runs[&NodeId::from(id)].skip_reason.clone()
    }

    fn transform(id: &str, template: &str) -> NodeDefinition {
        NodeDefinition::new(id, "data-transform")
            .with_property("transformation", json!("template"))
            .with_property("template", json!(template))
    }

    /// flag → cond.condition, yes → cond.trueValue, no → cond.falseValue
    fn branching(error_as_false: bool) -> GraphDefinition {
        GraphDefinition::new()
            .with_node(NodeDefinition::new("in", "data-input"))
            .with_node(NodeDefinition::new("flag", "data-input").with_property("path", json!("$.flag")))
            .with_node(transform("yes", "yes {{name}}"))
            .with_node(transform("no", "no {{name}}"))
            .with_node(
                NodeDefinition::new("cond", "logic-condition")
                    .with_property("errorAsFalse", json!(error_as_false)),
            )
            .with_edge("flag", "value", "cond", "condition")
            .with_edge("in", "value", "yes", "input")
            .with_edge("in", "value", "no", "input")
            .with_edge("yes", "output", "cond", "trueValue")
            .with_edge("no", "output", "cond", "falseValue")
    }

    #[tokio::test]
    async fn prunes_the_branch_not_taken() {
        let (outcome, log) = run(
            &branching(false),
            json!({"flag": true, "name": "ada"}),
            FakeServices::echo(),
            1,
        )
        .await;

        assert!(outcome.fatal.is_none());
        assert_eq!(state(&outcome, "yes"), NodeRunState::Succeeded);
        assert_eq!(
            skip_reason(&outcome, "no"),
            Some(SkipReason::BranchNotTaken {
                condition: "cond".into()
            })
        );
        let cond = &outcome.runs[&NodeId::from("cond")];
        assert_eq!(cond.output_values.as_ref().unwrap()["result"], "yes ada");
        // every node reaches exactly one terminal transition
        assert_eq!(log.len(), 5);
    }

    #[tokio::test]
    async fn rejected_condition_value_fails_and_releases_nothing() {
        let (outcome, _) = run(
            &branching(false),
            json!({"flag": "perhaps"}),
            FakeServices::echo(),
            2,
        )
        .await;

        let cond = &outcome.runs[&NodeId::from("cond")];
        assert_eq!(cond.state, NodeRunState::Failed);
        assert!(matches!(cond.error, Some(NodeError::CoercionFailed { .. })));
        for gated in ["yes", "no"] {
            assert_eq!(
                skip_reason(&outcome, gated),
                Some(SkipReason::ConditionUnresolved {
                    condition: "cond".into()
                })
            );
        }
    }

    #[tokio::test]
    async fn failures_cascade_downstream() {
        let definition = GraphDefinition::new()
            .with_node(NodeDefinition::new("in", "data-input"))
            .with_node(NodeDefinition::new("ai", "ai-text"))
            .with_node(transform("t", "{{$}}"))
            .with_node(NodeDefinition::new("out", "data-output"))
            .with_edge("in", "value", "ai", "prompt")
            .with_edge("ai", "text", "t", "input")
            .with_edge("t", "output", "out", "data");

        let (outcome, log) = run(
            &definition,
            json!("hi"),
            FakeServices::echo().rejecting_text("no"),
            4,
        )
        .await;

        assert_eq!(state(&outcome, "ai"), NodeRunState::Failed);
        for id in ["t", "out"] {
            assert_eq!(
                skip_reason(&outcome, id),
                Some(SkipReason::UpstreamFailed { node: "ai".into() })
            );
        }
        let order: Vec<&str> = log.iter().map(|e| e.node_id.as_str()).collect();
        assert_eq!(order, ["in", "ai", "t", "out"]);
    }

    #[tokio::test]
    async fn condition_fails_with_its_upstream() {
        let definition = GraphDefinition::new()
            .with_node(NodeDefinition::new("in", "data-input"))
            .with_node(NodeDefinition::new("ai", "ai-text"))
            .with_node(transform("t", "{{$}}"))
            .with_node(NodeDefinition::new("cond", "logic-condition"))
            .with_node(NodeDefinition::new("out", "data-output"))
            .with_edge("in", "value", "ai", "prompt")
            .with_edge("ai", "text", "t", "input")
            .with_edge("t", "output", "cond", "condition")
            .with_edge("in", "value", "cond", "trueValue")
            .with_edge("cond", "result", "out", "data");

        let (outcome, log) = run(
            &definition,
            json!("hi"),
            FakeServices::echo().rejecting_text("no"),
            2,
        )
        .await;

        assert_eq!(
            skip_reason(&outcome, "t"),
            Some(SkipReason::UpstreamFailed { node: "ai".into() })
        );
        let cond = &outcome.runs[&NodeId::from("cond")];
        assert_eq!(cond.state, NodeRunState::Failed);
        assert!(cond.started_at.is_none());
        assert_eq!(
            cond.error,
            Some(NodeError::Failed {
                reason: "input 'condition' depends on failed node ai".to_string()
            })
        );
        assert_eq!(
            skip_reason(&outcome, "out"),
            Some(SkipReason::UpstreamFailed {
                node: "cond".into()
            })
        );
        let order: Vec<&str> = log.iter().map(|e| e.node_id.as_str()).collect();
        assert_eq!(order, ["in", "ai", "t", "cond", "out"]);
    }

    #[tokio::test]
    async fn error_as_false_takes_the_false_branch() {
        let definition = GraphDefinition::new()
            .with_node(NodeDefinition::new("in", "data-input"))
            .with_node(NodeDefinition::new("ai", "ai-text"))
            .with_node(NodeDefinition::new("judge", "data-transform").with_property(
                "transformation",
                json!("jsonPath"),
            ).with_property("jsonPath", json!("$.ok")))
            .with_node(
                NodeDefinition::new("cond", "logic-condition")
                    .with_property("errorAsFalse", json!(true))
                    .with_property("falseValue", json!("fallback")),
            )
            .with_edge("in", "value", "ai", "prompt")
            .with_edge("ai", "text", "judge", "input")
            .with_edge("judge", "output", "cond", "condition")
            .with_edge("in", "value", "cond", "trueValue");

        let (outcome, _) = run(
            &definition,
            json!("hi"),
            FakeServices::echo().rejecting_text("no"),
            2,
        )
        .await;

        assert_eq!(
            skip_reason(&outcome, "judge"),
            Some(SkipReason::UpstreamFailed { node: "ai".into() })
        );
        let cond = &outcome.runs[&NodeId::from("cond")];
        assert_eq!(cond.state, NodeRunState::Succeeded);
        assert_eq!(cond.output_values.as_ref().unwrap()["result"], "fallback");
    }

    #[tokio::test]
    async fn loop_bodies_see_captured_values() {
        let definition = GraphDefinition::new()
            .with_node(NodeDefinition::new("items", "data-input").with_property("path", json!("$.items")))
            .with_node(NodeDefinition::new("tag", "data-input").with_property("path", json!("$.tag")))
            .with_node(NodeDefinition::new("loop", "logic-loop"))
            .with_node(NodeDefinition::new("pair", "logic-merge"))
            .with_edge("items", "value", "loop", "collection")
            .with_edge("loop", "item", "pair", "input1")
            .with_edge("tag", "value", "pair", "input2")
            .with_edge("pair", "merged", "loop", "result");

        let (outcome, log) = run(
            &definition,
            json!({"items": [1, 2], "tag": "x"}),
            FakeServices::echo(),
            2,
        )
        .await;

        let looped = &outcome.runs[&NodeId::from("loop")];
        assert_eq!(looped.state, NodeRunState::Succeeded);
        assert_eq!(
            looped.output_values.as_ref().unwrap()["results"],
            json!([[1, "x"], [2, "x"]])
        );
        let iterations: Vec<Vec<usize>> = log
            .iter()
            .filter(|e| e.node_id.as_str() == "pair")
            .map(|e| e.iteration.clone())
            .collect();
        assert_eq!(iterations, vec![vec![0], vec![1]]);
    }

    #[tokio::test]
    async fn failing_iteration_fails_the_loop() {
        let definition = GraphDefinition::new()
            .with_node(NodeDefinition::new("in", "data-input"))
            .with_node(NodeDefinition::new("loop", "logic-loop"))
            .with_node(NodeDefinition::new("ai", "ai-text"))
            .with_edge("in", "value", "loop", "collection")
            .with_edge("loop", "item", "ai", "prompt")
            .with_edge("ai", "text", "loop", "result");

        let services = FakeServices::echo().rejecting_text("blocked");
        let (outcome, log) = run(&definition, json!(["a", "b"]), services, 2).await;

        let looped = &outcome.runs[&NodeId::from("loop")];
        assert_eq!(
            looped.error,
            Some(NodeError::LoopIterationFailed {
                index: 0,
                node_id: "ai".into(),
                reason: "external service rejected the request: blocked".to_string(),
            })
        );
        // sequential loops stop at the first failing iteration
        assert_eq!(log.iter().filter(|e| e.node_id.as_str() == "ai").count(), 1);
    }

    #[tokio::test]
    async fn unreachable_loop_is_skipped() {
        let definition = GraphDefinition::new()
            .with_node(NodeDefinition::new("loop", "logic-loop").with_property("collection", json!([1])))
            .with_node(transform("body", "{{$}}"))
            .with_node(NodeDefinition::new("out", "data-output"))
            .with_edge("loop", "item", "body", "input")
            .with_edge("body", "output", "loop", "result")
            .with_edge("loop", "results", "out", "data");

        let (outcome, log) = run(&definition, JsonValue::Null, FakeServices::echo(), 1).await;

        assert!(outcome.fatal.is_none());
        assert_eq!(skip_reason(&outcome, "loop"), Some(SkipReason::Unreachable));
        assert_eq!(skip_reason(&outcome, "out"), Some(SkipReason::Unreachable));
        // body nodes of a loop that never iterates are not logged
        assert!(log.iter().all(|e| e.node_id.as_str() != "body"));
    }

    #[tokio::test]
    async fn cancelled_execution_runs_nothing() {
        let definition = GraphDefinition::new()
            .with_node(NodeDefinition::new("in", "data-input"))
            .with_node(transform("t", "{{$}}"))
            .with_edge("in", "value", "t", "input");
        let plan = ExecutionPlan::new(WorkflowGraph::from_definition(&definition).unwrap()).unwrap();
        let (recorder, mut log) = Recorder::channel(false);
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let shared = Arc::new(Shared::new(
            plan,
            NodeRegistry::with_builtins(),
            Arc::new(FakeServices::echo()),
            JsonValue::Null,
            1,
            cancellation,
            None,
            recorder,
        ));

        let outcome = ScopeRun::new(shared, None, Vec::new()).run(Vec::new()).await;

        assert!(outcome.fatal.is_none());
        for id in ["in", "t"] {
            assert_eq!(skip_reason(&outcome, id), Some(SkipReason::Aborted));
        }
        assert_eq!(log.drain().len(), 2);
    }

    #[test]
    fn second_promotion_violates_the_scheduler() {
        let definition = GraphDefinition::new().with_node(NodeDefinition::new("in", "data-input"));
        let plan = ExecutionPlan::new(WorkflowGraph::from_definition(&definition).unwrap()).unwrap();
        let (recorder, _log) = Recorder::channel(false);
        let shared = Arc::new(Shared::new(
            plan,
            NodeRegistry::with_builtins(),
            Arc::new(FakeServices::echo()),
            JsonValue::Null,
            1,
            CancellationToken::new(),
            None,
            recorder,
        ));
        let mut scope = ScopeRun::new(Arc::clone(&shared), None, Vec::new());
        let id = NodeId::from("in");

        scope.seed(Vec::new());
        assert!(scope.fatal.is_none());
        assert_eq!(scope.runs[&id].promotions, 1);

        if let Some(run) = scope.runs.get_mut(&id) {
            run.state = NodeRunState::Pending;
        }
        scope.try_promote(&id);

        assert!(scope.fatal.unwrap().contains("promoted 2 times"));
        assert!(shared.abort.is_cancelled());
    }

    #[tokio::test]
    async fn missing_executor_is_fatal() {
        let definition = GraphDefinition::new().with_node(NodeDefinition::new("in", "data-input"));
        let plan = ExecutionPlan::new(WorkflowGraph::from_definition(&definition).unwrap()).unwrap();
        let (recorder, _log) = Recorder::channel(false);
        let shared = Arc::new(Shared::new(
            plan,
            NodeRegistry::new(),
            Arc::new(FakeServices::echo()),
            JsonValue::Null,
            1,
            CancellationToken::new(),
            None,
            recorder,
        ));

        let outcome = ScopeRun::new(shared, None, Vec::new()).run(Vec::new()).await;

        assert!(outcome.fatal.as_ref().unwrap().contains("no executor"));
        assert_eq!(state(&outcome, "in"), NodeRunState::Cancelled);
    }
}

//! Engine façade.
//!
//! [`Engine::execute`] runs one graph definition against one input:
//! parse, validate, plan, schedule, then assemble an [`ExecutionResult`]
//! from the final node states and the recorded log.

use crate::definition::GraphDefinition;
use crate::error::{EngineError, ExecutionError, NodeError};
use crate::execution::{EngineSettings, ExecuteOptions, ExecutionResult, ExecutionStatus};
use crate::graph::WorkflowGraph;
use crate::node::{NodeId, OUTPUT_DATA_PORT};
use crate::plan::{ExecutionPlan, OutputTarget};
use crate::recorder::{LogEntry, Recorder};
use crate::registry::NodeRegistry;
use crate::run_state::{NodeRun, NodeRunState};
use crate::scheduler::{ScopeOutcome, ScopeRun, Shared};
use chrono::Utc;
use flowmill_core::ExecutionId;
use flowmill_services::Services;
use rootcause::prelude::Report;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// Runs workflow graphs.
#[derive(Debug, Clone)]
pub struct Engine {
    settings: EngineSettings,
    registry: NodeRegistry,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl Engine {
    /// Creates an engine with every built-in executor.
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            registry: NodeRegistry::with_builtins(),
        }
    }

    /// Replaces the executor registry.
    #[must_use]
    pub fn with_registry(mut self, registry: NodeRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Parses and validates a definition without running it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Graph`] when the definition is malformed,
    /// ill-typed, cyclic or uses node types without an executor.
    #[instrument(skip_all)]
    pub fn prepare(&self, definition: &str) -> Result<ExecutionPlan, Report<EngineError>> {
        let definition = GraphDefinition::from_json(definition).map_err(EngineError::from)?;
        let graph = WorkflowGraph::from_definition(&definition).map_err(EngineError::from)?;
        self.registry.check(&graph).map_err(EngineError::from)?;
        let plan = ExecutionPlan::new(graph).map_err(EngineError::from)?;
        debug!(
            nodes = plan.graph().node_count(),
            edges = plan.graph().edge_count(),
            "graph accepted"
        );
        Ok(plan)
    }

    /// Executes a definition against `input`.
    ///
    /// An empty input, or `null`, means no input. Node failures, timeouts
    /// and cancellation are reported in the result, not as errors.
    ///
    /// # Errors
    ///
    /// Returns an error when the graph is rejected or the input is not JSON.
    pub async fn execute(
        &self,
        definition: &str,
        input: &str,
        options: ExecuteOptions,
        services: Arc<dyn Services>,
    ) -> Result<ExecutionResult, Report<EngineError>> {
        self.run(ExecutionId::new(), definition, input, options, services)
            .await
    }

    #[instrument(name = "execute", skip_all, fields(execution_id = %execution_id))]
    async fn run(
        &self,
        execution_id: ExecutionId,
        definition: &str,
        input: &str,
        options: ExecuteOptions,
        services: Arc<dyn Services>,
    ) -> Result<ExecutionResult, Report<EngineError>> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let plan = self.prepare(definition)?;
        let input = parse_input(input)?;

        let concurrency = options
            .concurrency
            .unwrap_or(self.settings.default_concurrency);
        let deadline_ms = options.deadline_ms.or(self.settings.default_deadline_ms);
        let verbose = options.verbose.unwrap_or(self.settings.verbose);
        let cancellation = options.cancellation.unwrap_or_default();
        let deadline = deadline_ms.map(|ms| clock + Duration::from_millis(ms));

        let (recorder, mut log) = Recorder::channel(verbose);
        let shared = Arc::new(Shared::new(
            plan,
            self.registry.clone(),
            services,
            input,
            concurrency,
            cancellation,
            deadline,
            recorder,
        ));

        info!(concurrency, ?deadline_ms, "execution started");
        let outcome = ScopeRun::new(Arc::clone(&shared), None, Vec::new())
            .run(Vec::new())
            .await;
        let log = log.drain();
        let (status, output, error) = assess(&shared, &outcome, &log);
        let elapsed_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(?status, elapsed_ms, entries = log.len(), "execution finished");

        Ok(ExecutionResult {
            execution_id,
            status,
            output,
            error,
            log,
            elapsed_ms,
            started_at,
        })
    }
}

fn parse_input(input: &str) -> Result<JsonValue, EngineError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(JsonValue::Null);
    }
    serde_json::from_str(trimmed).map_err(|e| EngineError::MalformedInput {
        reason: e.to_string(),
    })
}

/// Derives the status, output and error of a finished execution.
fn assess(
    shared: &Shared,
    outcome: &ScopeOutcome,
    log: &[LogEntry],
) -> (ExecutionStatus, JsonValue, Option<ExecutionError>) {
    if let Some(reason) = &outcome.fatal {
        return (
            ExecutionStatus::Failed,
            JsonValue::Null,
            Some(ExecutionError::SchedulerInvariantViolated {
                reason: reason.clone(),
            }),
        );
    }

    let produced = match shared.plan.output() {
        OutputTarget::DataOutput(id) => outcome
            .runs
            .get(id)
            .filter(|run| run.state == NodeRunState::Succeeded)
            .map(|run| {
                run.input_values
                    .get(OUTPUT_DATA_PORT)
                    .cloned()
                    .unwrap_or(JsonValue::Null)
            }),
        OutputTarget::Sinks(ids) => sink_output(&shared.plan, ids, &outcome.runs),
    };
    if let Some(output) = produced {
        return (ExecutionStatus::Completed, output, None);
    }

    if shared.cancellation.is_cancelled() {
        return (
            ExecutionStatus::Cancelled,
            JsonValue::Null,
            Some(ExecutionError::Cancelled),
        );
    }
    // only the deadline aborts without a fatal error or cancellation
    if shared.abort.is_cancelled() {
        return (
            ExecutionStatus::TimedOut,
            JsonValue::Null,
            Some(ExecutionError::TimedOut),
        );
    }

    let error = match log.iter().find(|e| e.state == NodeRunState::Failed) {
        Some(entry) => ExecutionError::NodeFailed {
            node_id: entry.node_id.clone(),
            error: entry.error.clone().unwrap_or(NodeError::Failed {
                reason: "no error recorded".to_string(),
            }),
        },
        None => ExecutionError::OutputNotProduced {
            reason: not_produced_reason(shared.plan.output(), &outcome.runs),
        },
    };
    (ExecutionStatus::Failed, JsonValue::Null, Some(error))
}

/// A sink's value is its only output port, or an object of all its ports.
/// One sink yields its value; several yield an object keyed by node id.
fn sink_output(
    plan: &ExecutionPlan,
    ids: &[NodeId],
    runs: &BTreeMap<NodeId, NodeRun>,
) -> Option<JsonValue> {
    let mut outputs = Map::new();
    for id in ids {
        let run = runs.get(id)?;
        if run.state != NodeRunState::Succeeded {
            return None;
        }
        let values = run.output_values.clone().unwrap_or_default();
        let value = match plan.node(id).map(|n| n.outputs.as_slice()) {
            Some([port]) => values.get(&port.name).cloned().unwrap_or(JsonValue::Null),
            _ => JsonValue::Object(values.into_iter().collect()),
        };
        outputs.insert(id.to_string(), value);
    }
    match ids {
        [] => Some(JsonValue::Null),
        [only] => outputs.remove(only.as_str()),
        _ => Some(JsonValue::Object(outputs)),
    }
}

fn not_produced_reason(target: &OutputTarget, runs: &BTreeMap<NodeId, NodeRun>) -> String {
    let ids: Vec<&NodeId> = match target {
        OutputTarget::DataOutput(id) => vec![id],
        OutputTarget::Sinks(ids) => ids.iter().collect(),
    };
    let states: Vec<String> = ids
        .into_iter()
        .filter_map(|id| {
            let run = runs.get(id)?;
            let state = serde_json::to_value(run.state).ok()?;
            Some(format!("{id} {}", state.as_str().unwrap_or("unknown")))
        })
        .collect();
    format!("output nodes did not succeed ({})", states.join(", "))
}

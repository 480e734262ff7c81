//! Execution results and settings.
//!
//! An [`ExecutionResult`] is what [`crate::engine::Engine::execute`] returns;
//! an [`ExecutionRecord`] is the same result stamped with the workflow it
//! belongs to, ready to persist.

use crate::error::ExecutionError;
use crate::recorder::LogEntry;
use chrono::{DateTime, Utc};
use flowmill_core::{ExecutionId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

/// The overall outcome of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    /// The designated output was produced.
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl ExecutionStatus {
    /// Returns true if the execution produced its output.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// The result of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    /// The designated output; `null` unless completed.
    pub output: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    /// One entry per terminal node transition, in order.
    pub log: Vec<LogEntry>,
    pub elapsed_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Stamps the result with its workflow for persistence.
    #[must_use]
    pub fn into_record(self, workflow_id: WorkflowId) -> ExecutionRecord {
        ExecutionRecord {
            workflow_id,
            result: self,
        }
    }
}

/// The persisted form of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub workflow_id: WorkflowId,
    #[serde(flatten)]
    pub result: ExecutionResult,
}

/// Per-execution options. Unset values fall back to [`EngineSettings`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecuteOptions {
    /// Executors allowed in flight at once, across all loop iterations.
    pub concurrency: Option<usize>,
    pub deadline_ms: Option<u64>,
    /// Include port values in the log.
    pub verbose: Option<bool>,
    /// Cancels the execution when triggered.
    #[serde(skip)]
    pub cancellation: Option<CancellationToken>,
}

impl ExecuteOptions {
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    #[must_use]
    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }
}

/// Engine-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub default_concurrency: usize,
    /// No deadline when unset.
    pub default_deadline_ms: Option<u64>,
    pub verbose: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_concurrency: 8,
            default_deadline_ms: None,
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result() -> ExecutionResult {
        ExecutionResult {
            execution_id: ExecutionId::new(),
            status: ExecutionStatus::Completed,
            output: json!({"answer": 42}),
            error: None,
            log: Vec::new(),
            elapsed_ms: 5,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn record_flattens_result() {
        let workflow_id = WorkflowId::new();
        let result = result();
        let record = result.clone().into_record(workflow_id);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["workflowId"], json!(workflow_id));
        assert_eq!(value["status"], "completed");
        assert_eq!(value["output"]["answer"], 42);
        assert!(value["startedAt"].is_string());
        assert!(value.get("error").is_none());

        let back: ExecutionRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.result, result);
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_value(ExecutionStatus::TimedOut).unwrap(),
            json!("timedOut")
        );
        assert!(!ExecutionStatus::Cancelled.is_success());
    }

    #[test]
    fn options_parse_without_cancellation() {
        let options: ExecuteOptions =
            serde_json::from_value(json!({"concurrency": 2, "deadlineMs": 500})).unwrap();
        assert_eq!(options.concurrency, Some(2));
        assert_eq!(options.deadline_ms, Some(500));
        assert!(options.verbose.is_none());
        assert!(options.cancellation.is_none());
    }

    #[test]
    fn settings_default_when_missing() {
        let settings: EngineSettings = serde_json::from_value(json!({"verbose": true})).unwrap();
        assert_eq!(settings.default_concurrency, 8);
        assert!(settings.verbose);
    }
}

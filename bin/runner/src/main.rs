//! Executes one workflow graph against simulated services and prints the
//! execution record as JSON.
//!
//! ```text
//! flowmill-runner <graph.json> [input.json | -]
//! ```

mod config;

use crate::config::RunnerConfig;
use flowmill_core::WorkflowId;
use flowmill_services::SimulatedServices;
use flowmill_workflow::{Engine, ExecuteOptions};
use rootcause::prelude::Report;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug)]
enum RunnerError {
    Usage,
    Config { reason: String },
    Read { path: PathBuf, reason: String },
    Engine { reason: String },
    Output { reason: String },
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage => write!(f, "usage: flowmill-runner <graph.json> [input.json | -]"),
            Self::Config { reason } => write!(f, "failed to load configuration: {reason}"),
            Self::Read { path, reason } => {
                write!(f, "failed to read {}: {reason}", path.display())
            }
            Self::Engine { reason } => write!(f, "workflow rejected: {reason}"),
            Self::Output { reason } => write!(f, "failed to write record: {reason}"),
        }
    }
}

impl std::error::Error for RunnerError {}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(std::env::args().skip(1).collect()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(report) => {
            error!("{report}");
            ExitCode::from(2)
        }
    }
}

/// Runs the workflow named in `args`; returns whether it completed.
#[instrument(skip_all)]
async fn run(args: Vec<String>) -> Result<bool, Report<RunnerError>> {
    let (graph_path, input_path) = match args.as_slice() {
        [graph] => (PathBuf::from(graph), None),
        [graph, input] => (PathBuf::from(graph), Some(input.as_str())),
        _ => return Err(RunnerError::Usage.into()),
    };

    let config = RunnerConfig::from_env().map_err(|e| RunnerError::Config {
        reason: e.to_string(),
    })?;
    info!(engine = ?config.engine, "loaded configuration");

    let definition = read_file(&graph_path)?;
    let input = match input_path {
        None => String::new(),
        Some("-") => read_stdin()?,
        Some(path) => read_file(Path::new(path))?,
    };

    let cancellation = CancellationToken::new();
    let on_signal = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling execution");
            on_signal.cancel();
        }
    });

    let engine = Engine::new(config.engine.clone());
    let result = engine
        .execute(
            &definition,
            &input,
            ExecuteOptions::default().with_cancellation(cancellation),
            Arc::new(SimulatedServices::new()),
        )
        .await
        .map_err(|e| RunnerError::Engine {
            reason: e.to_string(),
        })?;

    let completed = result.status.is_success();
    let record = result.into_record(WorkflowId::new());
    let json = if config.pretty {
        serde_json::to_string_pretty(&record)
    } else {
        serde_json::to_string(&record)
    }
    .map_err(|e| RunnerError::Output {
        reason: e.to_string(),
    })?;
    println!("{json}");

    Ok(completed)
}

fn read_file(path: &Path) -> Result<String, Report<RunnerError>> {
    std::fs::read_to_string(path).map_err(|e| {
        RunnerError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn read_stdin() -> Result<String, Report<RunnerError>> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| RunnerError::Read {
            path: PathBuf::from("-"),
            reason: e.to_string(),
        })?;
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn wrong_arguments_are_a_usage_error() {
        let err = run(Vec::new()).await.unwrap_err();
        assert!(matches!(err.current_context(), RunnerError::Usage));
    }

    #[tokio::test]
    async fn missing_graph_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("graph.json");
        let err = run(vec![missing.display().to_string()]).await.unwrap_err();
        assert!(matches!(err.current_context(), RunnerError::Read { .. }));
    }

    #[tokio::test]
    async fn executes_a_graph_file() {
        let mut graph = tempfile::NamedTempFile::new().unwrap();
        write!(
            graph,
            r#"{{
                "nodes": [
                    {{"id": "in", "type": "data-input", "properties": {{"path": "$.text"}}}},
                    {{"id": "ai", "type": "ai-text"}},
                    {{"id": "out", "type": "data-output"}}
                ],
                "edges": [
                    {{"from": {{"node": "in", "port": "value"}}, "to": {{"node": "ai", "port": "prompt"}}}},
                    {{"from": {{"node": "ai", "port": "text"}}, "to": {{"node": "out", "port": "data"}}}}
                ]
            }}"#
        )
        .unwrap();
        let mut input = tempfile::NamedTempFile::new().unwrap();
        write!(input, r#"{{"text": "hi"}}"#).unwrap();

        let completed = run(vec![
            graph.path().display().to_string(),
            input.path().display().to_string(),
        ])
        .await
        .unwrap();
        assert!(completed);
    }

    #[tokio::test]
    async fn rejected_graphs_are_errors() {
        let mut graph = tempfile::NamedTempFile::new().unwrap();
        write!(graph, r#"{{"nodes": [{{"id": "x", "type": "no-such-type"}}]}}"#).unwrap();

        let err = run(vec![graph.path().display().to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err.current_context(), RunnerError::Engine { .. }));
    }
}

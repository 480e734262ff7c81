//! Runner configuration.
//!
//! Loaded via the `config` crate from an optional file named by
//! `FLOWMILL_CONFIG` (TOML, JSON or YAML by extension), then overridden by
//! `FLOWMILL__*` environment variables, e.g.
//! `FLOWMILL__ENGINE__DEFAULT_CONCURRENCY=4`.

use flowmill_workflow::EngineSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the optional configuration file.
pub const CONFIG_FILE_VAR: &str = "FLOWMILL_CONFIG";

/// Runner configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RunnerConfig {
    /// Engine defaults applied to every execution.
    #[serde(default)]
    pub engine: EngineSettings,

    /// Pretty-print the execution record.
    #[serde(default)]
    pub pretty: bool,
}

impl RunnerConfig {
    /// Loads configuration from `FLOWMILL_CONFIG` and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value is invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let file = std::env::var_os(CONFIG_FILE_VAR).map(PathBuf::from);
        Self::load(file.as_deref(), None)
    }

    /// Loads configuration from `file`, if any, overridden by environment
    /// variables. `env` replaces the process environment when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value is invalid.
    pub fn load(
        file: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix("FLOWMILL")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}

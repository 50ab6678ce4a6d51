//! Layered runner configuration.
//!
//! Sources, lowest precedence first: `config/default`, `config/local`, the
//! file passed with `--config`, then `LLM_RUNNER__*` environment variables
//! (`__` separates nested keys, e.g. `LLM_RUNNER__RETRY__MAX_ATTEMPTS=2`).
//! Command-line flags are applied on top by the caller.

use anyhow::{ensure, Context as _, Result};
use config::{Config as ConfigLoader, Environment, File};
use llm_runner_capture::CaptureConfig;
use llm_runner_resilience::{CircuitBreakerConfig, RetryConfig};
use llm_runner_stream::RunOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::logging::LogSettings;

const ENV_PREFIX: &str = "LLM_RUNNER";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub capture: CaptureConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub run: RunOptions,
    pub log: LogSettings,
}

impl RunnerSettings {
    /// Load from the default files, `path` and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, environment())
    }

    fn load_with(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = path {
            ensure!(path.exists(), "config file {} does not exist", path.display());
            builder = builder.add_source(File::from(path));
        }

        let settings = builder
            .add_source(env)
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        Ok(settings)
    }

    /// Reject settings the runner cannot operate with
    pub fn validate(&self) -> Result<()> {
        ensure!(self.capture.stdout_capacity > 0, "capture.stdout_capacity must be greater than 0");
        ensure!(self.capture.stderr_capacity > 0, "capture.stderr_capacity must be greater than 0");
        ensure!(
            self.capture.recovery.fallback_capacity > 0,
            "capture.recovery.fallback_capacity must be greater than 0"
        );
        ensure!(!self.capture.timeout.is_zero(), "capture.timeout must be greater than 0");

        ensure!(self.retry.max_attempts > 0, "retry.max_attempts must be at least 1");
        ensure!(
            self.retry.multiplier >= 1.0,
            "retry.multiplier must be at least 1.0, got {}",
            self.retry.multiplier
        );
        ensure!(
            self.retry.base_delay <= self.retry.max_delay,
            "retry.base_delay ({:?}) exceeds retry.max_delay ({:?})",
            self.retry.base_delay,
            self.retry.max_delay
        );

        ensure!(
            self.circuit_breaker.failure_threshold > 0,
            "circuit_breaker.failure_threshold must be greater than 0"
        );
        ensure!(self.run.channel_capacity > 0, "run.channel_capacity must be greater than 0");
        Ok(())
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

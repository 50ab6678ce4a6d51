//! Logging initialization

use anyhow::{Context as _, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Level for the runner's own crates
    pub level: String,
    /// Full filter directive; takes precedence over `level` and `RUST_LOG`
    pub filter: Option<String>,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            filter: None,
            format: LogFormat::Text,
        }
    }
}

impl LogSettings {
    /// Filter directive used when neither `filter` nor `RUST_LOG` is set
    pub fn default_directive(&self) -> String {
        format!("llm_runner={}", self.level)
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        if let Some(filter) = &self.filter {
            return EnvFilter::try_new(filter).with_context(|| format!("Invalid log filter {filter:?}"));
        }
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(self.default_directive())
                .with_context(|| format!("Invalid log level {:?}", self.level)),
        }
    }
}

/// Install the global subscriber; all output goes to stderr
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let filter = settings.env_filter()?;

    let layer = match settings.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    tracing::debug!(format = ?settings.format, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_targets_runner_crates() {
        let settings = LogSettings {
            level: "debug".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.default_directive(), "llm_runner=debug");
    }

    #[test]
    fn test_explicit_filter_wins() {
        let settings = LogSettings {
            filter: Some("llm_runner_stream=trace".to_string()),
            ..Default::default()
        };
        assert!(settings.env_filter().is_ok());

        let broken = LogSettings {
            filter: Some("llm_runner=loudest".to_string()),
            ..Default::default()
        };
        assert!(broken.env_filter().is_err());
    }
}

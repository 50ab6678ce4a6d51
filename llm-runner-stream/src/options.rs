use llm_runner_core::RunResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shape of a single-shot invocation's stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Per-run settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub format: OutputFormat,
    /// Deadline for one attempt; expiry is reported as a timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Messages the pipeline may queue ahead of the consumer
    pub channel_capacity: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            timeout: None,
            channel_capacity: 1,
        }
    }
}

impl RunOptions {
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

/// Result of a single-shot invocation
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutput {
    Text(String),
    Json(RunResult),
}

impl RunOutput {
    /// The textual result, whichever format produced it
    pub fn text(&self) -> &str {
        match self {
            RunOutput::Text(text) => text,
            RunOutput::Json(result) => &result.result,
        }
    }

    pub fn into_result(self) -> RunResult {
        match self {
            RunOutput::Text(text) => RunResult::from_text(text),
            RunOutput::Json(result) => result,
        }
    }
}

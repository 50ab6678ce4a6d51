use llm_runner_capture::{CaptureConfig, CaptureManager};
use llm_runner_core::RunnerError;
use llm_runner_resilience::{run_with_retry, CircuitBreaker, CircuitBreakerConfig, RetryConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::launcher::Launcher;
use crate::options::{RunOptions, RunOutput};
use crate::pipeline::{MessageStream, StreamingPipeline};
use crate::single::run_once;

/// Entry point tying an invocation to capture, retry and the circuit breaker.
///
/// The breaker and capture recorders are shared by every run started from
/// the same `Runner`; buffers are fresh per attempt.
#[derive(Clone)]
pub struct Runner {
    launcher: Arc<dyn Launcher>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
    capture: Arc<CaptureManager>,
}

impl Runner {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            breaker: Arc::new(CircuitBreaker::new(
                "invocation",
                CircuitBreakerConfig::default(),
            )),
            retry: RetryConfig::default(),
            capture: Arc::new(CaptureManager::default()),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_capture(mut self, config: CaptureConfig) -> Self {
        self.capture = Arc::new(CaptureManager::new(config));
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn capture(&self) -> &Arc<CaptureManager> {
        &self.capture
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// One attempt, gated by the circuit breaker. A cancelled attempt is
    /// not charged to the breaker.
    pub async fn run(
        &self,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunOutput, RunnerError> {
        self.breaker
            .call_with(
                || run_once(self.launcher.as_ref(), &self.capture, options, cancel),
                |err: &RunnerError| !err.is_cancelled(),
            )
            .await
            .map_err(RunnerError::from)
    }

    /// Attempts through the breaker, retried per the retry policy
    pub async fn run_with_retry(
        &self,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunOutput, RunnerError> {
        let output = run_with_retry(&self.retry, cancel, |attempt| async move {
            debug!(attempt, "starting invocation attempt");
            self.run(options, cancel).await
        })
        .await?;

        let health = self.capture.health();
        if !health.is_healthy {
            info!(issues = ?health.issues, "capture health degraded");
        }
        Ok(output)
    }

    /// Start a streaming invocation.
    ///
    /// Streaming runs once and bypasses the breaker; a caller wanting retries
    /// starts a new stream per attempt.
    pub fn stream(&self, options: &RunOptions, cancel: &CancellationToken) -> MessageStream {
        StreamingPipeline::new(self.capture.clone()).start(self.launcher.clone(), options, cancel)
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .field("capture", &self.capture)
            .finish_non_exhaustive()
    }
}

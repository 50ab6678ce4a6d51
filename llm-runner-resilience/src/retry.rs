//! Retry with capped exponential backoff.
//!
//! [`run_with_retry`] repeats an operation while it fails with retryable
//! [`RunnerError`]s. Sleeps between attempts race the caller's
//! [`CancellationToken`], and a rate-limit error carrying a retry-after hint
//! waits for that hint instead of the computed backoff.

use llm_runner_core::{ErrorKind, RunnerError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Jitter strategy for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Full jitter: random value between 0 and calculated delay
    Full,
    /// Equal jitter: half delay + random half
    Equal,
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound for any computed delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryConfig {
    /// A policy that runs the operation once
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.clone())
    }
}

/// Exponential backoff retry policy
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// `min(base * multiplier^(attempt - 1), max)` for `attempt >= 1`, else zero.
    ///
    /// Jitter is not applied; see [`next_delay`](Self::next_delay).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let scaled = self.config.base_delay.as_secs_f64() * self.config.multiplier.powi(exponent);
        let capped = scaled.min(self.config.max_delay.as_secs_f64());

        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.config.max_delay
        }
    }

    /// The delay to sleep after failed attempt number `attempt`, with jitter
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.apply_jitter(self.delay(attempt))
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        match self.config.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                let jitter = rand::random::<f64>();
                Duration::from_secs_f64(delay.as_secs_f64() * jitter)
            }
            JitterStrategy::Equal => {
                let jitter = rand::random::<f64>();
                let base = delay.as_secs_f64() / 2.0;
                Duration::from_secs_f64(base + (base * jitter))
            }
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent.
///
/// `op` receives the 1-based attempt number. After attempt `n` fails with a
/// retryable error the executor sleeps `delay(n)` (or the rate-limit hint)
/// before attempt `n + 1`. Cancellation during a sleep returns
/// [`RunnerError::Cancelled`]. Exhaustion returns
/// [`RunnerError::RetriesExhausted`] wrapping the last error.
pub async fn run_with_retry<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RunnerError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RunnerError>>,
{
    let policy = config.backoff();
    let max_attempts = policy.max_attempts().max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }

        debug!(attempt, max_attempts, "running attempt");

        let err = match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retrying");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            debug!(attempt, error = %err, "error is not retryable, giving up");
            return Err(err);
        }

        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %err, "max retry attempts reached");
            return Err(RunnerError::RetriesExhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        let delay = match rate_limit_hint(&err) {
            Some(hint) => {
                debug!(retry_after = ?hint, "honouring rate-limit hint");
                hint
            }
            None => policy.next_delay(attempt),
        };

        debug!(attempt, ?delay, error = %err, "retrying after backoff");
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(attempt, "retry sleep cancelled");
                return Err(RunnerError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

fn rate_limit_hint(err: &RunnerError) -> Option<Duration> {
    let classified = err.classified()?;
    if classified.kind() != ErrorKind::RateLimit {
        return None;
    }
    classified.retry_after().map(Duration::from_secs)
}

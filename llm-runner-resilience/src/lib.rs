//! Failure handling around invocation attempts.
//!
//! - **Circuit Breaker**: stops calling an operation that keeps failing and
//!   tries it again after a cooldown
//! - **Retry**: repeats retryable failures with capped exponential backoff,
//!   honouring rate-limit hints and cancellation
//!
//! # Example
//!
//! ```no_run
//! use llm_runner_core::{classify, RunnerError};
//! use llm_runner_resilience::{run_with_retry, CircuitBreaker, CircuitBreakerConfig, RetryConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), RunnerError> {
//! let breaker = CircuitBreaker::new("invocation", CircuitBreakerConfig::default());
//! let cancel = CancellationToken::new();
//!
//! let breaker = &breaker;
//!
//! let output = run_with_retry(&RetryConfig::default(), &cancel, |_attempt| async move {
//!     breaker
//!         .call(|| async { Err::<String, RunnerError>(classify("network unreachable", Some(1)).into()) })
//!         .await
//!         .map_err(RunnerError::from)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats, CircuitState,
};
pub use retry::{run_with_retry, ExponentialBackoff, JitterStrategy, RetryConfig};

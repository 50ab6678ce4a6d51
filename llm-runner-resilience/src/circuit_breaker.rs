//! Circuit Breaker for preventing cascading failures.
//!
//! A circuit breaker counts consecutive failures of the operations it wraps and,
//! once a threshold is reached, rejects calls outright until a cooldown has
//! passed since the last failure.
//!
//! # States
//!
//! - **Closed**: Normal operation, calls pass through
//! - **Open**: Threshold reached, calls are rejected without running
//! - **HalfOpen**: Cooldown elapsed; the next outcome decides between the two
//!
//! The Open to HalfOpen transition is evaluated lazily when a call arrives, so
//! [`CircuitBreaker::state`] can report `Open` after the cooldown has passed.
//!
//! While HalfOpen exactly one trial call runs at a time; concurrent callers
//! are rejected. A trial whose future is dropped, or whose error the caller
//! does not count as a failure, frees the slot without moving the state.

use llm_runner_core::RunnerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time since the last failure before a trial call is allowed
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was not run
    #[error("circuit breaker is open for {name}")]
    Open { name: String },

    /// The operation ran and failed
    #[error("execution failed: {0}")]
    ExecutionFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::ExecutionFailed(e) => Some(e),
            CircuitBreakerError::Open { .. } => None,
        }
    }
}

impl From<CircuitBreakerError<RunnerError>> for RunnerError {
    fn from(err: CircuitBreakerError<RunnerError>) -> Self {
        match err {
            CircuitBreakerError::Open { name } => RunnerError::CircuitOpen { name },
            CircuitBreakerError::ExecutionFailed(e) => e,
        }
    }
}

#[derive(Debug, Default)]
struct CircuitBreakerMetrics {
    failures: AtomicU64,
    successes: AtomicU64,
    opened_count: AtomicU64,
    closed_count: AtomicU64,
    rejected_count: AtomicU64,
}

impl CircuitBreakerMetrics {
    fn record(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    pub failures: u64,
    pub successes: u64,
    pub opened_count: u64,
    pub closed_count: u64,
    pub rejected_count: u64,
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_time: Option<Instant>,
    /// Ticket of the half-open trial currently running
    trial: Option<u64>,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_time: None,
            trial: None,
        }
    }
}

/// Admission for one call; frees the half-open trial slot when dropped
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        let Some(ticket) = self.trial else {
            return;
        };
        let mut state = self.breaker.lock();
        if state.trial == Some(ticket) {
            debug!(name = %self.breaker.name, "half-open trial released without an outcome");
            state.trial = None;
        }
    }
}

/// Three-state failure gate, shared by reference across attempts
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,
    metrics: CircuitBreakerMetrics,
    tickets: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        debug!(name = %name, "creating circuit breaker");

        Self {
            name,
            config,
            state: Mutex::new(CircuitBreakerState::new()),
            metrics: CircuitBreakerMetrics::default(),
            tickets: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            failures: self.metrics.failures.load(Ordering::Relaxed),
            successes: self.metrics.successes.load(Ordering::Relaxed),
            opened_count: self.metrics.opened_count.load(Ordering::Relaxed),
            closed_count: self.metrics.closed_count.load(Ordering::Relaxed),
            rejected_count: self.metrics.rejected_count.load(Ordering::Relaxed),
        }
    }

    /// Run a synchronous operation under the breaker
    pub fn execute<F, T, E>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let admission = self.before_call()?;
        self.settle(admission, op(), |_| true)
    }

    /// Run an asynchronous operation under the breaker
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with(f, |_| true).await
    }

    /// Like [`call`](Self::call), but only errors for which `is_failure`
    /// returns true are recorded. Other errors are passed through and leave
    /// the breaker as it was.
    pub async fn call_with<F, Fut, T, E, P>(
        &self,
        f: F,
        is_failure: P,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        let admission = self.before_call()?;
        let outcome = f().await;
        self.settle(admission, outcome, is_failure)
    }

    fn settle<T, E, P>(
        &self,
        _admission: Admission<'_>,
        outcome: Result<T, E>,
        is_failure: P,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        P: FnOnce(&E) -> bool,
    {
        match outcome {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                if is_failure(&e) {
                    self.on_error();
                } else {
                    debug!(name = %self.name, "error not counted against the circuit");
                }
                Err(CircuitBreakerError::ExecutionFailed(e))
            }
        }
    }

    fn before_call<E>(&self) -> Result<Admission<'_>, CircuitBreakerError<E>> {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => Ok(Admission {
                breaker: self,
                trial: None,
            }),
            CircuitState::Open => {
                let cooled = state
                    .last_failure_time
                    .map_or(true, |at| at.elapsed() >= self.config.reset_timeout);

                if cooled {
                    info!(name = %self.name, "circuit breaker transitioning to half-open");
                    state.state = CircuitState::HalfOpen;
                    Ok(self.admit_trial(&mut state))
                } else {
                    Err(self.reject())
                }
            }
            CircuitState::HalfOpen => {
                if state.trial.is_some() {
                    debug!(name = %self.name, "half-open trial already running");
                    Err(self.reject())
                } else {
                    Ok(self.admit_trial(&mut state))
                }
            }
        }
    }

    fn admit_trial(&self, state: &mut CircuitBreakerState) -> Admission<'_> {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        state.trial = Some(ticket);
        Admission {
            breaker: self,
            trial: Some(ticket),
        }
    }

    fn reject<E>(&self) -> CircuitBreakerError<E> {
        CircuitBreakerMetrics::record(&self.metrics.rejected_count);
        CircuitBreakerError::Open {
            name: self.name.clone(),
        }
    }

    fn on_success(&self) {
        let mut state = self.lock();
        CircuitBreakerMetrics::record(&self.metrics.successes);

        state.consecutive_failures = 0;
        state.trial = None;
        if state.state == CircuitState::HalfOpen {
            info!(name = %self.name, "circuit breaker closing after successful trial");
            state.state = CircuitState::Closed;
            CircuitBreakerMetrics::record(&self.metrics.closed_count);
        }
    }

    fn on_error(&self) {
        let mut state = self.lock();
        CircuitBreakerMetrics::record(&self.metrics.failures);

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        name = %self.name,
                        failures = state.consecutive_failures,
                        "circuit breaker opening"
                    );
                    state.state = CircuitState::Open;
                    CircuitBreakerMetrics::record(&self.metrics.opened_count);
                }
            }
            CircuitState::HalfOpen => {
                warn!(name = %self.name, "circuit breaker re-opening after failed trial");
                state.state = CircuitState::Open;
                state.trial = None;
                CircuitBreakerMetrics::record(&self.metrics.opened_count);
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker back to Closed
    pub fn reset(&self) {
        let mut state = self.lock();
        info!(name = %self.name, "manually resetting circuit breaker");
        *state = CircuitBreakerState::new();
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

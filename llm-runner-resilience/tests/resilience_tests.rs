use llm_runner_core::{classify, ErrorKind, RunnerError};
use llm_runner_resilience::*;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn retryable() -> RunnerError {
    classify("connection reset by peer", Some(1)).into()
}

fn fatal() -> RunnerError {
    classify("Error: Invalid API key provided", Some(1)).into()
}

// ===== Circuit Breaker State Machine =====

#[tokio::test(start_paused = true)]
async fn test_breaker_full_cycle() {
    let breaker = CircuitBreaker::new(
        "invocation",
        CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        },
    );
    let invoked = AtomicU32::new(0);

    for _ in 0..3 {
        let result = breaker.execute(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("down")
        });
        assert!(matches!(result, Err(CircuitBreakerError::ExecutionFailed("down"))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected = breaker.execute(|| {
        invoked.fetch_add(1, Ordering::SeqCst);
        Ok::<_, &str>(())
    });
    assert!(matches!(rejected, Err(CircuitBreakerError::Open { ref name }) if name == "invocation"));
    assert_eq!(invoked.load(Ordering::SeqCst), 3);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    let trial = breaker.execute(|| {
        invoked.fetch_add(1, Ordering::SeqCst);
        Ok::<_, &str>(7)
    });
    assert_eq!(trial.unwrap(), 7);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.consecutive_failures(), 0);

    let stats = breaker.stats();
    assert_eq!(stats.failures, 3);
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.opened_count, 1);
    assert_eq!(stats.closed_count, 1);
    assert_eq!(stats.rejected_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_shared_across_tasks() {
    let breaker = Arc::new(CircuitBreaker::new(
        "shared",
        CircuitBreakerConfig {
            failure_threshold: 4,
            reset_timeout: Duration::from_secs(10),
        },
    ));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let breaker = breaker.clone();
        handles.push(tokio::spawn(async move {
            breaker
                .call(|| async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Err::<(), _>("fail")
                })
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_err());
    }

    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(breaker.stats().failures, 4);
}

// ===== Retry Executor =====

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_after_transient_failures() {
    let calls = AtomicU32::new(0);
    let cancel = CancellationToken::new();
    let started = Instant::now();

    let result = run_with_retry(&RetryConfig::default(), &cancel, |attempt| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt < 3 {
                Err(retryable())
            } else {
                Ok(attempt)
            }
        }
    })
    .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_runs_once() {
    let calls = AtomicU32::new(0);
    let cancel = CancellationToken::new();
    let config = RetryConfig {
        max_attempts: 10,
        ..Default::default()
    };

    let result: Result<(), _> = run_with_retry(&config, &cancel, |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(fatal()) }
    })
    .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Authentication));
    assert!(!matches!(err, RunnerError::RetriesExhausted { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_wraps_last_error() {
    let calls = AtomicU32::new(0);
    let cancel = CancellationToken::new();
    let started = Instant::now();

    let result: Result<(), _> = run_with_retry(&RetryConfig::default(), &cancel, |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(retryable()) }
    })
    .await;

    match result {
        Err(RunnerError::RetriesExhausted { attempts, last }) => {
            assert_eq!(attempts, 4);
            assert_eq!(last.kind(), Some(ErrorKind::Network));
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    // 100ms + 200ms + 400ms between the four attempts, none after the last
    assert_eq!(started.elapsed(), Duration::from_millis(700));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_hint_replaces_backoff() {
    let cancel = CancellationToken::new();
    let started = Instant::now();

    let result = run_with_retry(&RetryConfig::default(), &cancel, |attempt| async move {
        if attempt == 1 {
            Err(classify("429 rate limit exceeded, retry after 3", Some(1)).into())
        } else {
            Ok("done")
        }
    })
    .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_without_hint_uses_backoff() {
    let cancel = CancellationToken::new();
    let started = Instant::now();

    let result = run_with_retry(&RetryConfig::default(), &cancel, |attempt| async move {
        if attempt == 1 {
            Err(classify("rate limit exceeded", Some(1)).into())
        } else {
            Ok(())
        }
    })
    .await;

    assert!(result.is_ok());
    assert_eq!(started.elapsed(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_aborts_backoff_sleep() {
    let cancel = CancellationToken::new();
    let calls = Arc::new(AtomicU32::new(0));
    let config = RetryConfig {
        base_delay: Duration::from_secs(60),
        max_delay: Duration::from_secs(60),
        ..Default::default()
    };

    let task = {
        let cancel = cancel.clone();
        let calls = calls.clone();
        tokio::spawn(async move {
            run_with_retry(&config, &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(retryable()) }
            })
            .await
        })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(RunnerError::Cancelled)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_already_cancelled_token_skips_operation() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = run_with_retry(&RetryConfig::default(), &cancel, |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    })
    .await;

    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_retry_policy_runs_once() {
    let cancel = CancellationToken::new();
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = run_with_retry(&RetryConfig::no_retry(), &cancel, |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(retryable()) }
    })
    .await;

    assert!(matches!(result, Err(RunnerError::RetriesExhausted { attempts: 1, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ===== Breaker Inside Retry =====

#[tokio::test(start_paused = true)]
async fn test_open_circuit_stops_retrying() {
    let breaker = CircuitBreaker::new(
        "invocation",
        CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(60),
        },
    );
    let cancel = CancellationToken::new();
    let calls = AtomicU32::new(0);
    let (breaker, calls_ref) = (&breaker, &calls);

    let result: Result<(), _> = run_with_retry(&RetryConfig::default(), &cancel, |_| async move {
        breaker
            .call(|| async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err::<(), RunnerError>(retryable())
            })
            .await
            .map_err(RunnerError::from)
    })
    .await;

    assert!(matches!(result, Err(RunnerError::CircuitOpen { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

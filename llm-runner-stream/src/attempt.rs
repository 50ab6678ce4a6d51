//! Plumbing shared by the streaming and single-shot paths.

use llm_runner_capture::{CaptureError, CaptureManager, CaptureSink};
use llm_runner_core::{ClassifiedError, RunnerError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::launcher::{Invocation, OutputStream};

/// Fires when the run is cancelled or its deadline passes.
///
/// The deadline is fixed when the interrupt is created, so every wait on it
/// shares the same budget.
#[derive(Debug, Clone)]
pub(crate) struct Interrupt {
    cancel: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl Interrupt {
    pub(crate) fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| (Instant::now() + t, t)),
        }
    }

    /// Resolves with the error describing why the run must stop.
    ///
    /// Cancellation wins over an expired deadline.
    pub(crate) async fn fired(&self) -> RunnerError {
        match self.deadline {
            Some((at, timeout)) => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => RunnerError::Cancelled,
                    _ = tokio::time::sleep_until(at) => {
                        debug!(?timeout, "invocation deadline expired");
                        ClassifiedError::deadline_exceeded(timeout).into()
                    }
                }
            }
            None => {
                self.cancel.cancelled().await;
                RunnerError::Cancelled
            }
        }
    }
}

/// Drain `reader` into `sink` on its own task
pub(crate) fn spawn_drain<S>(
    capture: &Arc<CaptureManager>,
    reader: OutputStream,
    sink: Arc<S>,
) -> JoinHandle<Result<u64, CaptureError>>
where
    S: CaptureSink + 'static,
{
    let capture = capture.clone();
    tokio::spawn(async move { capture.drain(reader, &*sink).await })
}

/// Wait out a drain after exit; a failed drain keeps whatever it captured
pub(crate) async fn settle_drain<S>(
    capture: &CaptureManager,
    drain: JoinHandle<Result<u64, CaptureError>>,
    sink: &S,
    stream: &'static str,
) where
    S: CaptureSink + ?Sized,
{
    match capture.join_drain(drain, sink.metrics()).await {
        Ok(bytes) => debug!(stream, bytes, "capture drained"),
        Err(err) => warn!(stream, error = %err, "capture incomplete"),
    }
}

pub(crate) async fn terminate(process: &mut dyn Invocation) {
    if let Err(err) = process.kill().await {
        warn!(error = %err, "failed to kill invocation");
    }
}

//! Single-shot invocation: run to completion, then read captured output.

use llm_runner_capture::{CaptureManager, CaptureSink};
use llm_runner_core::{classify, ClassifiedError, RunResult, RunnerError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::attempt::{settle_drain, spawn_drain, terminate, Interrupt};
use crate::launcher::{Launched, Launcher};
use crate::options::{OutputFormat, RunOptions, RunOutput};

/// Run one invocation to completion.
///
/// stdout is captured into a bounded buffer and stderr into a resilient
/// one. A non-zero or missing exit code is classified from the captured
/// stderr. Cancellation and the options' deadline kill the invocation.
pub async fn run_once(
    launcher: &dyn Launcher,
    capture: &Arc<CaptureManager>,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<RunOutput, RunnerError> {
    let interrupt = Interrupt::new(cancel.clone(), options.timeout);

    let Launched {
        stdout,
        stderr,
        mut process,
    } = launcher.launch().await.map_err(RunnerError::Launch)?;

    let output = Arc::new(capture.stdout_buffer());
    let diagnostics = Arc::new(capture.stderr_buffer());
    let stdout_drain = spawn_drain(capture, stdout, output.clone());
    let stderr_drain = spawn_drain(capture, stderr, diagnostics.clone());

    let exited = tokio::select! {
        biased;
        err = interrupt.fired() => Err(err),
        status = process.wait() => status.map_err(RunnerError::Io),
    };

    let code = match exited {
        Ok(code) => code,
        Err(err) => {
            terminate(process.as_mut()).await;
            stdout_drain.abort();
            stderr_drain.abort();
            return Err(err);
        }
    };

    settle_drain(capture, stdout_drain, &*output, "stdout").await;
    settle_drain(capture, stderr_drain, &*diagnostics, "stderr").await;
    debug!(?code, stdout_bytes = output.len(), "invocation exited");

    if code != Some(0) {
        return Err(classify(&diagnostics.snapshot_string(), code).into());
    }

    if output.is_truncated() {
        warn!(capacity = output.capacity(), "stdout truncated");
    }

    let text = output.snapshot_string();
    match options.format {
        OutputFormat::Text => Ok(RunOutput::Text(text)),
        OutputFormat::Json => parse_result(&text).map(RunOutput::Json),
    }
}

fn parse_result(text: &str) -> Result<RunResult, RunnerError> {
    serde_json::from_str(text).map_err(|e| {
        ClassifiedError::validation(
            format!("failed to parse JSON response: {e}"),
            "stdout",
            text.chars().take(200).collect::<String>(),
        )
        .with_detail(
            "suggestion",
            "Check that the invocation was asked for JSON output",
        )
        .with_source(e)
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_runner_core::ErrorKind;

    #[test]
    fn test_parse_result_accepts_trailing_newline() {
        let result = parse_result("{\"type\":\"result\",\"result\":\"ok\",\"num_turns\":1}\n").unwrap();
        assert_eq!(result.kind, "result");
        assert_eq!(result.result, "ok");
        assert_eq!(result.num_turns, 1);
    }

    #[test]
    fn test_parse_result_failure_is_validation() {
        let err = parse_result("not json").unwrap_err();
        let classified = err.classified().unwrap();

        assert_eq!(classified.kind(), ErrorKind::Validation);
        assert!(classified.message().starts_with("failed to parse JSON response"));
        assert!(classified.suggestion().is_some());
        assert!(!err.is_retryable());
    }
}

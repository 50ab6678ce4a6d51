//! Streaming pipeline.
//!
//! One invocation per [`StreamingPipeline::start`]: stdout is scanned line by
//! line, each line bounded by the stdout capture capacity, and every
//! non-blank line is decoded into a [`StreamedMessage`] and
//! published, in order, on the message channel. stderr is drained into a
//! resilient buffer on its own task. When the invocation ends the terminal
//! outcome goes on a separate error channel:
//!
//! - clean exit: the message channel closes and no error is sent
//! - decode failure, overlong line, abnormal exit, cancellation or deadline: the message
//!   channel closes first, then exactly one error is sent
//!
//! The invocation is killed whenever the pipeline stops before it exits.

use futures::{Stream, StreamExt};
use llm_runner_capture::{CaptureManager, CaptureSink};
use llm_runner_core::{classify, RunnerError, StreamedMessage};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::attempt::{settle_drain, spawn_drain, terminate, Interrupt};
use crate::launcher::{Launched, Launcher, OutputStream};
use crate::options::RunOptions;

/// Runs invocations and publishes their streamed records
#[derive(Debug, Clone)]
pub struct StreamingPipeline {
    capture: Arc<CaptureManager>,
}

impl StreamingPipeline {
    pub fn new(capture: Arc<CaptureManager>) -> Self {
        Self { capture }
    }

    pub fn capture(&self) -> &Arc<CaptureManager> {
        &self.capture
    }

    /// Launch one invocation and return the consumer's end of its channels.
    ///
    /// Must be called within a Tokio runtime. The returned stream owns a
    /// child of `cancel`; cancelling either stops the invocation.
    pub fn start(
        &self,
        launcher: Arc<dyn Launcher>,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> MessageStream {
        let id = Uuid::new_v4();
        let cancel = cancel.child_token();
        let (msg_tx, messages) = mpsc::channel(options.channel_capacity.max(1));
        let (err_tx, errors) = mpsc::channel(1);

        let driver = Driver {
            capture: self.capture.clone(),
            interrupt: Interrupt::new(cancel.clone(), options.timeout),
        };

        tokio::spawn(
            async move {
                match driver.run(launcher, msg_tx).await {
                    Ok(()) => info!("invocation completed"),
                    Err(err) => {
                        warn!(error = %err, "invocation failed");
                        // Consumer may already be gone
                        let _ = err_tx.send(err).await;
                    }
                }
            }
            .instrument(info_span!("invocation", id = %id)),
        );

        MessageStream {
            id,
            messages,
            errors,
            cancel,
        }
    }
}

struct Driver {
    capture: Arc<CaptureManager>,
    interrupt: Interrupt,
}

impl Driver {
    /// Drive the invocation to its end. `msg_tx` is dropped on return, so the
    /// message channel is closed before any error is published.
    async fn run(
        self,
        launcher: Arc<dyn Launcher>,
        msg_tx: mpsc::Sender<StreamedMessage>,
    ) -> Result<(), RunnerError> {
        let Launched {
            stdout,
            stderr,
            mut process,
        } = launcher.launch().await.map_err(RunnerError::Launch)?;
        debug!("invocation started");

        let diagnostics = Arc::new(self.capture.stderr_buffer());
        let stderr_drain = spawn_drain(&self.capture, stderr, diagnostics.clone());

        let forwarded = self.forward(stdout, msg_tx).await;
        let exited = match forwarded {
            Ok(count) => {
                debug!(messages = count, "stdout closed, waiting for exit");
                tokio::select! {
                    biased;
                    err = self.interrupt.fired() => Err(err),
                    status = process.wait() => status.map_err(RunnerError::Io),
                }
            }
            Err(err) => Err(err),
        };

        let code = match exited {
            Ok(code) => code,
            Err(err) => {
                terminate(process.as_mut()).await;
                stderr_drain.abort();
                return Err(err);
            }
        };

        settle_drain(&self.capture, stderr_drain, &*diagnostics, "stderr").await;

        if code == Some(0) {
            return Ok(());
        }

        if diagnostics.is_using_fallback() {
            warn!("stderr capture degraded to fallback buffer");
        }
        Err(classify(&diagnostics.snapshot_string(), code).into())
    }

    /// Publish every record on stdout, returning how many were sent
    async fn forward(
        &self,
        stdout: OutputStream,
        msg_tx: mpsc::Sender<StreamedMessage>,
    ) -> Result<usize, RunnerError> {
        let limit = self.capture.config().stdout_capacity;
        let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(limit));
        let mut line_no = 0;
        let mut sent = 0;

        loop {
            let line = tokio::select! {
                biased;
                err = self.interrupt.fired() => return Err(err),
                line = lines.next() => line,
            };
            let line = match line {
                None => return Ok(sent),
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(line = line_no + 1, limit, "stdout line exceeds capture capacity");
                    return Err(RunnerError::LineTooLong {
                        line: line_no + 1,
                        limit,
                    });
                }
                Some(Err(LinesCodecError::Io(err))) => return Err(err.into()),
            };
            line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            let message = StreamedMessage::from_line(&line).map_err(|source| RunnerError::Decode {
                line: line_no,
                source,
            })?;

            tokio::select! {
                biased;
                err = self.interrupt.fired() => return Err(err),
                delivered = msg_tx.send(message) => {
                    if delivered.is_err() {
                        debug!("consumer dropped the message stream");
                        return Err(RunnerError::Cancelled);
                    }
                }
            }
            sent += 1;
        }
    }
}

/// Consumer end of a streaming invocation.
///
/// Read messages until [`next_message`](Self::next_message) returns `None`,
/// then [`terminal_error`](Self::terminal_error) yields the single terminal
/// error, if any. Once cancelled no further messages are handed out.
/// Dropping the stream cancels the invocation.
#[derive(Debug)]
pub struct MessageStream {
    id: Uuid,
    messages: mpsc::Receiver<StreamedMessage>,
    errors: mpsc::Receiver<RunnerError>,
    cancel: CancellationToken,
}

impl MessageStream {
    /// Identifier of this invocation, as recorded in its tracing span
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn next_message(&mut self) -> Option<StreamedMessage> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            message = self.messages.recv() => message,
        }
    }

    /// Wait for the invocation to end; `None` means it completed cleanly
    pub async fn terminal_error(&mut self) -> Option<RunnerError> {
        self.errors.recv().await
    }

    /// Stop the invocation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Read everything, returning the delivered messages and the outcome
    pub async fn collect(mut self) -> (Vec<StreamedMessage>, Option<RunnerError>) {
        let mut delivered = Vec::new();
        while let Some(message) = self.next_message().await {
            delivered.push(message);
        }
        let error = self.terminal_error().await;
        (delivered, error)
    }
}

impl Stream for MessageStream {
    type Item = StreamedMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.messages.poll_recv(cx)
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

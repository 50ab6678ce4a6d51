//! Buffer factory and timed copies.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::buffer::{BoundedBuffer, CaptureError, CaptureSink, DEFAULT_TRUNCATION_MARKER};
use crate::metrics::{CaptureMetrics, CaptureStats, HealthChecker, HealthStatus};
use crate::resilient::{RecoveryConfig, ResilientBuffer};

const COPY_CHUNK_SIZE: usize = 8 * 1024;

/// Capture limits for one invocation's output streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Bytes retained from stdout before truncation
    pub stdout_capacity: usize,
    /// Bytes retained from stderr before truncation
    pub stderr_capacity: usize,
    /// Longest a timed copy may run
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Append the marker on truncation instead of dropping silently
    pub truncation_enabled: bool,
    pub truncation_marker: String,
    pub recovery: RecoveryConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            stdout_capacity: 10 * 1024 * 1024,
            stderr_capacity: 1024 * 1024,
            timeout: Duration::from_secs(30),
            truncation_enabled: true,
            truncation_marker: DEFAULT_TRUNCATION_MARKER.to_string(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl CaptureConfig {
    /// Marker handed to new buffers; empty when truncation is silent
    pub fn effective_marker(&self) -> &str {
        if self.truncation_enabled {
            &self.truncation_marker
        } else {
            ""
        }
    }
}

/// Builds capture buffers for invocation attempts and tracks their health.
///
/// Every buffer it hands out is fresh; only the recorders are shared.
#[derive(Debug)]
pub struct CaptureManager {
    config: CaptureConfig,
    stdout_metrics: Arc<CaptureMetrics>,
    stderr_metrics: Arc<CaptureMetrics>,
    health: HealthChecker,
}

impl CaptureManager {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            stdout_metrics: Arc::new(CaptureMetrics::new("stdout")),
            stderr_metrics: Arc::new(CaptureMetrics::new("stderr")),
            health: HealthChecker::new(),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn stdout_buffer(&self) -> BoundedBuffer {
        BoundedBuffer::new(self.config.stdout_capacity, self.config.effective_marker())
            .with_metrics(self.stdout_metrics.clone())
    }

    pub fn stderr_buffer(&self) -> ResilientBuffer {
        ResilientBuffer::new(
            self.config.stderr_capacity,
            self.config.effective_marker(),
            self.config.recovery.clone(),
        )
        .with_metrics(self.stderr_metrics.clone())
    }

    pub fn stdout_stats(&self) -> CaptureStats {
        self.stdout_metrics.stats()
    }

    pub fn stderr_stats(&self) -> CaptureStats {
        self.stderr_metrics.stats()
    }

    /// Evaluate health across both streams
    pub fn health(&self) -> HealthStatus {
        let combined = self.stdout_stats().combine(&self.stderr_stats());
        self.health.check(&combined)
    }

    /// [`drain`](Self::drain) bounded by the capture timeout.
    ///
    /// On timeout the copy fails with [`CaptureError::Timeout`], which is
    /// also recorded against the sink's metrics.
    pub async fn copy_with_timeout<R, S>(&self, reader: R, sink: &S) -> Result<u64, CaptureError>
    where
        R: AsyncRead + Unpin,
        S: CaptureSink + ?Sized,
    {
        let limit = self.config.timeout;
        match tokio::time::timeout(limit, self.drain(reader, sink)).await {
            Ok(result) => result,
            Err(_) => {
                if let Some(metrics) = sink.metrics() {
                    metrics.record_timeout();
                }
                warn!(timeout = ?limit, "capture copy timed out");
                Err(CaptureError::Timeout(limit))
            }
        }
    }

    /// Wait for a spawned [`drain`](Self::drain) to finish, for at most the
    /// capture timeout.
    ///
    /// Call once the producing process has exited. On timeout the drain is
    /// aborted and the timeout is charged to `metrics`. The sink keeps
    /// whatever it retained.
    pub async fn join_drain(
        &self,
        drain: JoinHandle<Result<u64, CaptureError>>,
        metrics: Option<&CaptureMetrics>,
    ) -> Result<u64, CaptureError> {
        let limit = self.config.timeout;
        let abort = drain.abort_handle();

        match tokio::time::timeout(limit, drain).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(CaptureError::Fault(format!("drain task failed: {join_err}"))),
            Err(_) => {
                abort.abort();
                if let Some(metrics) = metrics {
                    metrics.record_timeout();
                }
                warn!(timeout = ?limit, "capture drain did not finish after exit");
                Err(CaptureError::Timeout(limit))
            }
        }
    }

    /// Drain `reader` into `sink` until EOF, with no time limit.
    ///
    /// A sink fault is retried on the same chunk up to the recovery
    /// `max_retries`, which lets a [`ResilientBuffer`] reach its fallback
    /// without losing the chunk. Returns the number of bytes read.
    pub async fn drain<R, S>(&self, mut reader: R, sink: &S) -> Result<u64, CaptureError>
    where
        R: AsyncRead + Unpin,
        S: CaptureSink + ?Sized,
    {
        let mut chunk = vec![0u8; COPY_CHUNK_SIZE];
        let mut total = 0u64;

        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(total);
            }
            total += n as u64;

            let mut faults = 0;
            loop {
                match sink.write_bytes(&chunk[..n]) {
                    Ok(_) => break,
                    Err(CaptureError::Fault(_)) if faults < self.config.recovery.max_retries => {
                        faults += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }
}

impl Default for CaptureManager {
    fn default() -> Self {
        Self::new(CaptureConfig::default())
    }
}

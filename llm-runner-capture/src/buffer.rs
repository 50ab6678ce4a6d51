//! Capacity-limited byte sink.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::metrics::CaptureMetrics;

/// Suffix appended to a snapshot once a buffer has dropped bytes
pub const DEFAULT_TRUNCATION_MARKER: &str = "\n[... output truncated due to size limit ...]";

/// Errors raised by capture sinks and copies
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The sink failed internally while accepting a write
    #[error("capture buffer fault: {0}")]
    Fault(String),

    /// A timed copy ran past its deadline
    #[error("buffer copy timeout after {0:?}")]
    Timeout(Duration),

    #[error("I/O error during capture: {0}")]
    Io(#[from] std::io::Error),
}

/// A byte sink that invocation output is drained into.
///
/// Implementations must tolerate one writer running concurrently with one
/// reader.
pub trait CaptureSink: Send + Sync {
    /// Offer bytes to the sink, returning how many were retained
    fn write_bytes(&self, data: &[u8]) -> Result<usize, CaptureError>;

    /// Retained bytes, followed by the truncation marker if bytes were dropped
    fn snapshot(&self) -> Vec<u8>;

    /// Retained bytes only, never the marker
    fn contents(&self) -> Vec<u8>;

    fn is_truncated(&self) -> bool;

    /// Number of retained bytes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reset(&self);

    /// Recorder that timeouts against this sink should be charged to
    fn metrics(&self) -> Option<&CaptureMetrics> {
        None
    }

    fn snapshot_string(&self) -> String {
        String::from_utf8_lossy(&self.snapshot()).into_owned()
    }
}

#[derive(Debug, Default)]
struct BufferState {
    data: Vec<u8>,
    truncated: bool,
}

/// Byte buffer with a hard ceiling.
///
/// Writes never fail. A write that straddles the remaining capacity keeps the
/// bytes that fit, and everything past the ceiling is dropped. Once bytes have
/// been dropped the buffer stays truncated until [`reset`](CaptureSink::reset).
#[derive(Debug)]
pub struct BoundedBuffer {
    capacity: usize,
    marker: Option<String>,
    state: RwLock<BufferState>,
    metrics: Option<Arc<CaptureMetrics>>,
}

impl BoundedBuffer {
    /// Create a buffer that appends `marker` to snapshots after truncation.
    ///
    /// An empty marker disables the suffix.
    pub fn new(capacity: usize, marker: impl Into<String>) -> Self {
        let marker = marker.into();
        Self {
            capacity,
            marker: (!marker.is_empty()).then_some(marker),
            state: RwLock::new(BufferState::default()),
            metrics: None,
        }
    }

    /// Create a buffer that drops excess bytes silently
    pub fn without_marker(capacity: usize) -> Self {
        Self::new(capacity, "")
    }

    /// Record writes and truncations into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<CaptureMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.read().data.len())
    }

    /// Retain as much of `data` as fits, returning the number of bytes kept
    pub fn write(&self, data: &[u8]) -> usize {
        let (accepted, newly_truncated) = {
            let mut state = self.write_state();
            let room = self.capacity.saturating_sub(state.data.len());
            let accepted = data.len().min(room);
            state.data.extend_from_slice(&data[..accepted]);

            let dropped = accepted < data.len();
            let newly_truncated = dropped && !state.truncated;
            if dropped {
                state.truncated = true;
            }
            (accepted, newly_truncated)
        };

        if newly_truncated {
            debug!(capacity = self.capacity, "capture buffer reached capacity");
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_write(data.len());
            if newly_truncated {
                metrics.record_truncation();
            }
        }

        accepted
    }

    /// Latch truncation without writing, for contents carried over from a
    /// buffer that had already dropped bytes
    pub fn mark_truncated(&self) {
        self.write_state().truncated = true;
    }

    fn read(&self) -> RwLockReadGuard<'_, BufferState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, BufferState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CaptureSink for BoundedBuffer {
    fn write_bytes(&self, data: &[u8]) -> Result<usize, CaptureError> {
        Ok(self.write(data))
    }

    fn snapshot(&self) -> Vec<u8> {
        let state = self.read();
        let mut out = state.data.clone();
        if state.truncated {
            if let Some(marker) = &self.marker {
                out.extend_from_slice(marker.as_bytes());
            }
        }
        out
    }

    fn contents(&self) -> Vec<u8> {
        self.read().data.clone()
    }

    fn is_truncated(&self) -> bool {
        self.read().truncated
    }

    fn len(&self) -> usize {
        self.read().data.len()
    }

    fn reset(&self) {
        let mut state = self.write_state();
        state.data.clear();
        state.truncated = false;
    }

    fn metrics(&self) -> Option<&CaptureMetrics> {
        self.metrics.as_deref()
    }
}

//! Buffer with automatic fallback after repeated write faults.
//!
//! Writes go to a primary sink until it has faulted `max_retries` times in a
//! row. The buffer then copies whatever the primary retained into a smaller
//! fallback [`BoundedBuffer`] and sends every later write there. The switch is
//! one-way until [`reset`](CaptureSink::reset).

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::buffer::{BoundedBuffer, CaptureError, CaptureSink};
use crate::metrics::CaptureMetrics;

/// Appended to the primary marker to form the fallback buffer's marker
pub const FALLBACK_MARKER_SUFFIX: &str = " [FALLBACK]";

/// Fallback behaviour of a [`ResilientBuffer`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Consecutive primary faults tolerated before switching to the fallback
    pub max_retries: u32,
    /// Capacity of the fallback buffer in bytes
    pub fallback_capacity: usize,
    /// Whether the fallback may be used at all
    pub graceful_degradation: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            fallback_capacity: 1024 * 1024,
            graceful_degradation: true,
        }
    }
}

#[derive(Debug, Default)]
struct RecoveryState {
    retry_count: u32,
    using_fallback: bool,
    last_error: Option<String>,
}

/// A [`CaptureSink`] that survives a faulty primary sink
pub struct ResilientBuffer<P: CaptureSink = BoundedBuffer> {
    primary: P,
    fallback: BoundedBuffer,
    config: RecoveryConfig,
    metrics: Arc<CaptureMetrics>,
    state: Mutex<RecoveryState>,
}

impl ResilientBuffer<BoundedBuffer> {
    /// Create a buffer whose primary holds `capacity` bytes.
    ///
    /// The fallback uses `marker` followed by [`FALLBACK_MARKER_SUFFIX`].
    pub fn new(capacity: usize, marker: impl Into<String>, config: RecoveryConfig) -> Self {
        let marker = marker.into();
        let primary = BoundedBuffer::new(capacity, marker.clone());
        Self::assemble(primary, &marker, config, Arc::new(CaptureMetrics::new("resilient")))
    }
}

impl<P: CaptureSink> ResilientBuffer<P> {
    /// Wrap an arbitrary primary sink
    pub fn with_primary(primary: P, marker: &str, config: RecoveryConfig) -> Self {
        Self::assemble(primary, marker, config, Arc::new(CaptureMetrics::new("resilient")))
    }

    /// Record activity into a shared recorder instead of a private one
    pub fn with_metrics(mut self, metrics: Arc<CaptureMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    fn assemble(
        primary: P,
        marker: &str,
        config: RecoveryConfig,
        metrics: Arc<CaptureMetrics>,
    ) -> Self {
        let fallback_marker = if marker.is_empty() {
            String::new()
        } else {
            format!("{marker}{FALLBACK_MARKER_SUFFIX}")
        };

        Self {
            fallback: BoundedBuffer::new(config.fallback_capacity, fallback_marker),
            primary,
            config,
            metrics,
            state: Mutex::new(RecoveryState::default()),
        }
    }

    pub fn is_using_fallback(&self) -> bool {
        self.lock().using_fallback
    }

    /// Description of the most recent fault, if any
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Consecutive primary faults since the last successful primary write
    pub fn retry_count(&self) -> u32 {
        self.lock().retry_count
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn stats(&self) -> crate::metrics::CaptureStats {
        self.metrics.stats()
    }

    fn active(&self, state: &RecoveryState) -> &dyn CaptureSink {
        if state.using_fallback {
            &self.fallback
        } else {
            &self.primary
        }
    }

    fn switch_to_fallback(&self, state: &mut RecoveryState) {
        state.using_fallback = true;

        let carried = self.primary.contents();
        let kept = self.fallback.write(&carried);
        let primary_truncated = self.primary.is_truncated();
        if primary_truncated {
            self.fallback.mark_truncated();
        }
        warn!(
            faults = state.retry_count,
            carried = carried.len(),
            kept,
            primary_truncated,
            "capture switching to fallback buffer"
        );
    }

    fn write_fallback(&self, data: &[u8]) -> usize {
        let was_truncated = self.fallback.is_truncated();
        let accepted = self.fallback.write(data);
        self.metrics.record_write(data.len());
        if !was_truncated && self.fallback.is_truncated() {
            self.metrics.record_truncation();
        }
        accepted
    }

    fn lock(&self) -> MutexGuard<'_, RecoveryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: CaptureSink> CaptureSink for ResilientBuffer<P> {
    fn write_bytes(&self, data: &[u8]) -> Result<usize, CaptureError> {
        let mut state = self.lock();

        if state.using_fallback {
            return Ok(self.write_fallback(data));
        }

        let was_truncated = self.primary.is_truncated();
        match self.primary.write_bytes(data) {
            Ok(accepted) => {
                state.retry_count = 0;
                self.metrics.record_write(data.len());
                if !was_truncated && self.primary.is_truncated() {
                    self.metrics.record_truncation();
                }
                Ok(accepted)
            }
            Err(err) => {
                self.metrics.record_error();
                state.last_error = Some(err.to_string());

                if !self.config.graceful_degradation {
                    return Err(err);
                }

                state.retry_count += 1;
                debug!(
                    faults = state.retry_count,
                    max_retries = self.config.max_retries,
                    error = %err,
                    "primary capture write failed"
                );

                if state.retry_count < self.config.max_retries {
                    return Err(err);
                }

                self.switch_to_fallback(&mut state);
                Ok(self.write_fallback(data))
            }
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        let state = self.lock();
        self.active(&state).snapshot()
    }

    fn contents(&self) -> Vec<u8> {
        let state = self.lock();
        self.active(&state).contents()
    }

    fn is_truncated(&self) -> bool {
        let state = self.lock();
        self.active(&state).is_truncated()
    }

    fn len(&self) -> usize {
        let state = self.lock();
        self.active(&state).len()
    }

    fn reset(&self) {
        let mut state = self.lock();
        self.primary.reset();
        self.fallback.reset();
        *state = RecoveryState::default();
    }

    fn metrics(&self) -> Option<&CaptureMetrics> {
        Some(&self.metrics)
    }
}

impl<P: CaptureSink + std::fmt::Debug> std::fmt::Debug for ResilientBuffer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientBuffer")
            .field("primary", &self.primary)
            .field("fallback", &self.fallback)
            .field("config", &self.config)
            .field("state", &*self.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DEFAULT_TRUNCATION_MARKER;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Delegates to a bounded buffer until told to fault
    struct FlakySink {
        inner: BoundedBuffer,
        failing: AtomicBool,
    }

    impl FlakySink {
        fn new(capacity: usize) -> Self {
            Self {
                inner: BoundedBuffer::new(capacity, "!"),
                failing: AtomicBool::new(false),
            }
        }
    }

    impl CaptureSink for FlakySink {
        fn write_bytes(&self, data: &[u8]) -> Result<usize, CaptureError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(CaptureError::Fault("disk on fire".to_string()));
            }
            self.inner.write_bytes(data)
        }
        fn snapshot(&self) -> Vec<u8> {
            self.inner.snapshot()
        }
        fn contents(&self) -> Vec<u8> {
            self.inner.contents()
        }
        fn is_truncated(&self) -> bool {
            self.inner.is_truncated()
        }
        fn len(&self) -> usize {
            self.inner.len()
        }
        fn reset(&self) {
            self.inner.reset();
            self.failing.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_healthy_primary_is_used() {
        let buffer = ResilientBuffer::new(64, DEFAULT_TRUNCATION_MARKER, RecoveryConfig::default());
        buffer.write_bytes(b"stderr line\n").unwrap();

        assert!(!buffer.is_using_fallback());
        assert_eq!(buffer.snapshot(), b"stderr line\n");
        assert_eq!(buffer.last_error(), None);
        assert_eq!(buffer.stats().operation_count, 1);
    }

    #[test]
    fn test_switches_after_max_retries_and_keeps_prefix() {
        let buffer = ResilientBuffer::with_primary(FlakySink::new(64), "!", RecoveryConfig::default());
        buffer.write_bytes(b"one ").unwrap();
        buffer.write_bytes(b"two ").unwrap();

        buffer.primary.failing.store(true, Ordering::SeqCst);
        assert!(buffer.write_bytes(b"x").is_err());
        assert!(buffer.write_bytes(b"y").is_err());
        assert!(!buffer.is_using_fallback());

        assert_eq!(buffer.write_bytes(b"three").unwrap(), 5);
        assert!(buffer.is_using_fallback());
        assert_eq!(buffer.snapshot(), b"one two three");
        assert_eq!(buffer.last_error().as_deref(), Some("capture buffer fault: disk on fire"));
        assert_eq!(buffer.stats().error_count, 3);
    }

    #[test]
    fn test_success_resets_fault_count() {
        let buffer = ResilientBuffer::with_primary(FlakySink::new(64), "!", RecoveryConfig::default());

        buffer.primary.failing.store(true, Ordering::SeqCst);
        let _ = buffer.write_bytes(b"a");
        let _ = buffer.write_bytes(b"b");
        assert_eq!(buffer.retry_count(), 2);

        buffer.primary.failing.store(false, Ordering::SeqCst);
        buffer.write_bytes(b"c").unwrap();
        assert_eq!(buffer.retry_count(), 0);
        assert!(!buffer.is_using_fallback());
    }

    #[test]
    fn test_fallback_stays_active_after_primary_recovers() {
        let config = RecoveryConfig {
            max_retries: 1,
            ..Default::default()
        };
        let buffer = ResilientBuffer::with_primary(FlakySink::new(64), "!", config);

        buffer.primary.failing.store(true, Ordering::SeqCst);
        buffer.write_bytes(b"a").unwrap();
        buffer.primary.failing.store(false, Ordering::SeqCst);
        buffer.write_bytes(b"b").unwrap();

        assert!(buffer.is_using_fallback());
        assert_eq!(buffer.snapshot(), b"ab");
        assert!(buffer.primary.is_empty());
    }

    #[test]
    fn test_without_degradation_faults_propagate() {
        let config = RecoveryConfig {
            graceful_degradation: false,
            ..Default::default()
        };
        let buffer = ResilientBuffer::with_primary(FlakySink::new(64), "!", config);
        buffer.primary.failing.store(true, Ordering::SeqCst);

        for _ in 0..10 {
            assert!(matches!(buffer.write_bytes(b"z"), Err(CaptureError::Fault(_))));
        }
        assert!(!buffer.is_using_fallback());
    }

    #[test]
    fn test_fallback_marker_is_distinct() {
        let config = RecoveryConfig {
            max_retries: 1,
            fallback_capacity: 4,
            ..Default::default()
        };
        let buffer = ResilientBuffer::with_primary(FlakySink::new(64), "[cut]", config);
        buffer.primary.failing.store(true, Ordering::SeqCst);
        buffer.write_bytes(b"abcdefgh").unwrap();

        assert!(buffer.is_truncated());
        assert_eq!(buffer.snapshot_string(), "abcd[cut] [FALLBACK]");
    }

    #[test]
    fn test_switch_keeps_primary_truncation() {
        let config = RecoveryConfig {
            max_retries: 1,
            ..Default::default()
        };
        let buffer = ResilientBuffer::with_primary(FlakySink::new(4), "[cut]", config);
        buffer.write_bytes(b"abcdef").unwrap();
        assert!(buffer.is_truncated());

        buffer.primary.failing.store(true, Ordering::SeqCst);
        buffer.write_bytes(b"gh").unwrap();

        assert!(buffer.is_using_fallback());
        assert!(buffer.is_truncated());
        assert_eq!(buffer.snapshot_string(), "abcdgh[cut] [FALLBACK]");
    }

    #[test]
    fn test_reset_returns_to_primary() {
        let config = RecoveryConfig {
            max_retries: 1,
            ..Default::default()
        };
        let buffer = ResilientBuffer::with_primary(FlakySink::new(64), "!", config);
        buffer.primary.failing.store(true, Ordering::SeqCst);
        buffer.write_bytes(b"a").unwrap();

        buffer.reset();

        assert!(!buffer.is_using_fallback());
        assert_eq!(buffer.last_error(), None);
        assert!(buffer.is_empty());
        buffer.write_bytes(b"fresh").unwrap();
        assert_eq!(buffer.primary.contents(), b"fresh");
    }

    #[test]
    fn test_primary_truncation_is_not_a_fault() {
        let buffer = ResilientBuffer::new(4, "!", RecoveryConfig::default());
        for _ in 0..10 {
            buffer.write_bytes(b"abc").unwrap();
        }

        assert!(!buffer.is_using_fallback());
        assert!(buffer.is_truncated());
        assert_eq!(buffer.snapshot(), b"abca!");
        assert_eq!(buffer.stats().total_truncations, 1);
    }
}

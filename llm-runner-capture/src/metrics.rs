//! Capture statistics and health evaluation.
//!
//! [`CaptureMetrics`] keeps an in-process tally that can be snapshotted with
//! [`CaptureMetrics::stats`], and forwards every record to the `metrics`
//! facade under a `buffer` label. With no recorder installed the facade calls
//! are no-ops.

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Error rate above which capture is reported unhealthy
const ERROR_RATE_THRESHOLD: f64 = 0.1;

/// Truncation rate above which an issue is reported
const TRUNCATION_RATE_THRESHOLD: f64 = 0.2;

/// Registers descriptions for the capture metrics.
///
/// Call once after installing a recorder.
pub fn describe_capture_metrics() {
    describe_counter!(
        "capture_bytes_written_total",
        Unit::Bytes,
        "Bytes offered to capture buffers"
    );
    describe_counter!(
        "capture_writes_total",
        Unit::Count,
        "Write operations against capture buffers"
    );
    describe_counter!(
        "capture_truncations_total",
        Unit::Count,
        "Capture buffers that reached their capacity"
    );
    describe_counter!(
        "capture_timeouts_total",
        Unit::Count,
        "Capture copies that exceeded their deadline"
    );
    describe_counter!(
        "capture_errors_total",
        Unit::Count,
        "Faults raised while writing to capture buffers"
    );
    describe_gauge!(
        "capture_max_write_bytes",
        Unit::Bytes,
        "Largest single write seen by a capture buffer"
    );
}

/// Point-in-time view of a [`CaptureMetrics`] recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureStats {
    pub total_bytes_written: u64,
    pub total_truncations: u64,
    pub total_timeouts: u64,
    pub max_write_size: u64,
    pub average_write_size: f64,
    pub last_operation_time: DateTime<Utc>,
    pub operation_count: u64,
    pub error_count: u64,
}

impl CaptureStats {
    fn empty() -> Self {
        Self {
            total_bytes_written: 0,
            total_truncations: 0,
            total_timeouts: 0,
            max_write_size: 0,
            average_write_size: 0.0,
            last_operation_time: Utc::now(),
            operation_count: 0,
            error_count: 0,
        }
    }

    /// Aggregate two snapshots, e.g. stdout and stderr of one manager
    pub fn combine(&self, other: &CaptureStats) -> CaptureStats {
        let total_bytes_written = self.total_bytes_written + other.total_bytes_written;
        let operation_count = self.operation_count + other.operation_count;
        let average_write_size = if operation_count > 0 {
            total_bytes_written as f64 / operation_count as f64
        } else {
            0.0
        };

        CaptureStats {
            total_bytes_written,
            total_truncations: self.total_truncations + other.total_truncations,
            total_timeouts: self.total_timeouts + other.total_timeouts,
            max_write_size: self.max_write_size.max(other.max_write_size),
            average_write_size,
            last_operation_time: self.last_operation_time.max(other.last_operation_time),
            operation_count,
            error_count: self.error_count + other.error_count,
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.operation_count == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.operation_count as f64
    }

    pub fn truncation_rate(&self) -> f64 {
        if self.operation_count == 0 {
            return 0.0;
        }
        self.total_truncations as f64 / self.operation_count as f64
    }
}

/// Thread-safe recorder for capture activity
#[derive(Debug)]
pub struct CaptureMetrics {
    label: String,
    inner: Mutex<CaptureStats>,
}

impl CaptureMetrics {
    /// Create a recorder whose facade metrics carry `buffer = label`
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            inner: Mutex::new(CaptureStats::empty()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn record_write(&self, bytes: usize) {
        let bytes = bytes as u64;
        let max = {
            let mut stats = self.lock();
            stats.total_bytes_written += bytes;
            stats.operation_count += 1;
            stats.last_operation_time = Utc::now();
            stats.average_write_size =
                stats.total_bytes_written as f64 / stats.operation_count as f64;
            stats.max_write_size = stats.max_write_size.max(bytes);
            stats.max_write_size
        };

        counter!("capture_bytes_written_total", "buffer" => self.label.clone()).increment(bytes);
        counter!("capture_writes_total", "buffer" => self.label.clone()).increment(1);
        gauge!("capture_max_write_bytes", "buffer" => self.label.clone()).set(max as f64);
    }

    pub fn record_truncation(&self) {
        self.lock().total_truncations += 1;
        counter!("capture_truncations_total", "buffer" => self.label.clone()).increment(1);
    }

    pub fn record_timeout(&self) {
        self.lock().total_timeouts += 1;
        counter!("capture_timeouts_total", "buffer" => self.label.clone()).increment(1);
    }

    pub fn record_error(&self) {
        self.lock().error_count += 1;
        counter!("capture_errors_total", "buffer" => self.label.clone()).increment(1);
    }

    pub fn stats(&self) -> CaptureStats {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CaptureStats> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CaptureMetrics {
    fn default() -> Self {
        Self::new("capture")
    }
}

/// Result of a [`HealthChecker::check`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub last_check: DateTime<Utc>,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

#[derive(Debug)]
struct HealthState {
    last_check: DateTime<Utc>,
    is_healthy: bool,
}

/// Evaluates capture statistics against fixed health thresholds.
///
/// Only the error rate affects `is_healthy`; truncations and timeouts are
/// reported as issues without failing the check.
#[derive(Debug)]
pub struct HealthChecker {
    state: Mutex<HealthState>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HealthState {
                last_check: Utc::now(),
                is_healthy: true,
            }),
        }
    }

    pub fn check(&self, stats: &CaptureStats) -> HealthStatus {
        let mut status = HealthStatus {
            is_healthy: true,
            last_check: Utc::now(),
            issues: Vec::new(),
            suggestions: Vec::new(),
        };

        if stats.error_rate() > ERROR_RATE_THRESHOLD {
            status.is_healthy = false;
            status.issues.push("High error rate detected".to_string());
            status
                .suggestions
                .push("Consider increasing buffer sizes or timeout values".to_string());
        }

        if stats.truncation_rate() > TRUNCATION_RATE_THRESHOLD {
            status.issues.push("High truncation rate detected".to_string());
            status
                .suggestions
                .push("Consider increasing buffer limits or using streaming".to_string());
        }

        if stats.total_timeouts > 0 {
            status.issues.push("Timeouts detected".to_string());
            status
                .suggestions
                .push("Consider increasing timeout duration".to_string());
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_check = status.last_check;
        state.is_healthy = status.is_healthy;

        status
    }

    /// Verdict of the most recent check; healthy before any check ran
    pub fn is_healthy(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_healthy
    }

    pub fn last_check(&self) -> DateTime<Utc> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_check
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

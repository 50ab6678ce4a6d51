//! Memory-bounded capture of invocation output.
//!
//! [`BoundedBuffer`] is a byte sink with a hard ceiling that truncates instead
//! of growing. [`ResilientBuffer`] layers a smaller fallback buffer over a
//! primary sink and migrates to it after repeated write faults.
//! [`CaptureManager`] builds both from a [`CaptureConfig`] and drains async
//! readers into them under a timeout, recording [`CaptureMetrics`] as it goes.

pub mod buffer;
pub mod manager;
pub mod metrics;
pub mod resilient;

pub use buffer::{BoundedBuffer, CaptureError, CaptureSink, DEFAULT_TRUNCATION_MARKER};
pub use manager::{CaptureConfig, CaptureManager};
pub use metrics::{describe_capture_metrics, CaptureMetrics, CaptureStats, HealthChecker, HealthStatus};
pub use resilient::{RecoveryConfig, ResilientBuffer, FALLBACK_MARKER_SUFFIX};

use thiserror::Error;

use crate::classify::{ClassifiedError, ErrorKind};

/// Errors surfaced by the runner layers.
///
/// Classification happens once, where the diagnostic text and exit code are
/// available; everything above that boundary only sees [`RunnerError`].
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Classified(#[from] ClassifiedError),

    #[error("circuit breaker is open for {name}")]
    CircuitOpen { name: String },

    #[error("max retries ({attempts}) exceeded, last error: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<RunnerError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to parse JSON message on line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("line {line} exceeds the {limit} byte line limit")]
    LineTooLong { line: usize, limit: usize },

    #[error("failed to launch invocation: {0}")]
    Launch(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

impl RunnerError {
    /// Only classified errors can be retryable; everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            RunnerError::Classified(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// The classified kind, looking through a retries-exhausted wrapper
    pub fn kind(&self) -> Option<ErrorKind> {
        self.classified().map(ClassifiedError::kind)
    }

    /// The classified error, looking through a retries-exhausted wrapper
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            RunnerError::Classified(e) => Some(e),
            RunnerError::RetriesExhausted { last, .. } => last.classified(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunnerError::Cancelled)
    }
}

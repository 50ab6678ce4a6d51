//! Failure classification for external invocations.
//!
//! A failed invocation leaves behind two facts: whatever it wrote to its
//! diagnostic stream and its exit code. [`classify`] turns those into a
//! [`ClassifiedError`] with a closed [`ErrorKind`], a human message, a
//! suggestion intended for direct display and, for rate limits, the retry
//! delay the remote side asked for.
//!
//! Matching is case-insensitive and evaluated in a fixed order. The order
//! matters because keyword sets overlap: tool-server (MCP) failures often
//! mention "connection" and must be checked before generic network failures,
//! and "timeout" belongs to both the network and the timeout categories.
//!
//! # Example
//!
//! ```
//! use llm_runner_core::{classify, ErrorKind};
//!
//! let error = classify("Error: Invalid API key provided", Some(401));
//! assert_eq!(error.kind(), ErrorKind::Authentication);
//! assert!(!error.is_retryable());
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

/// Detail key holding the display suggestion
pub const DETAIL_SUGGESTION: &str = "suggestion";
/// Detail key holding the raw diagnostic text
pub const DETAIL_STDERR: &str = "stderr";
/// Detail key holding the extracted retry-after hint in seconds
pub const DETAIL_RETRY_AFTER: &str = "retry_after";

const GENERIC_FAILURE_MESSAGE: &str = "Command execution failed";
const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(60);
const NETWORK_RETRY_DELAY: Duration = Duration::from_secs(5);
const MCP_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Category of a classified failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Could not be attributed to any category
    Unknown,
    /// API key or credential problems
    Authentication,
    /// The remote side is throttling requests
    RateLimit,
    /// A tool or action was not permitted
    Permission,
    /// The invocation failed for an unrecognised reason
    Command,
    /// Connectivity problems
    Network,
    /// Model Context Protocol (tool server) failures
    Mcp,
    /// Malformed input, arguments or responses
    Validation,
    /// The operation ran out of time
    Timeout,
    /// Conversation/session bookkeeping failures
    Session,
}

impl ErrorKind {
    /// Stable lowercase tag for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unknown => "unknown",
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Permission => "permission",
            ErrorKind::Command => "command",
            ErrorKind::Network => "network",
            ErrorKind::Mcp => "mcp",
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Session => "session",
        }
    }

    /// Whether failures of this kind are worth retrying in general.
    ///
    /// MCP failures are refined per error, see [`ClassifiedError::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Mcp
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure mapped onto the [`ErrorKind`] taxonomy.
///
/// The kind is fixed at construction; there is no way to change it afterwards.
#[derive(Debug, Serialize)]
pub struct ClassifiedError {
    #[serde(rename = "type")]
    kind: ErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<i32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    details: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(skip)]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ClassifiedError {
    /// Create an error of the given kind with no details
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            details: BTreeMap::new(),
            retry_after: None,
            source: None,
        }
    }

    /// Create a validation error naming the offending field and value
    pub fn validation(
        message: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self::new(ErrorKind::Validation, message)
            .with_detail("field", field.into())
            .with_detail("value", value)
    }

    /// Timeout raised when a per-attempt deadline expires
    pub fn deadline_exceeded(after: Duration) -> Self {
        Self::new(ErrorKind::Timeout, "Operation timed out")
            .with_detail(
                DETAIL_SUGGESTION,
                "Increase timeout or try a simpler operation",
            )
            .with_detail("deadline_ms", after.as_millis() as u64)
    }

    /// Attach the external exit code
    pub fn with_code(mut self, code: Option<i32>) -> Self {
        self.code = code;
        self
    }

    /// Attach a structured detail
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self.with_detail(DETAIL_RETRY_AFTER, seconds)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Exit code of the external invocation, when one was observed
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn details(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.details
    }

    /// Retry delay requested by the remote side, in seconds
    pub fn retry_after(&self) -> Option<u64> {
        self.retry_after
    }

    /// Suggestion intended for direct display
    pub fn suggestion(&self) -> Option<&str> {
        self.details.get(DETAIL_SUGGESTION).and_then(|v| v.as_str())
    }

    /// The raw diagnostic text this error was classified from
    pub fn diagnostic(&self) -> Option<&str> {
        self.details.get(DETAIL_STDERR).and_then(|v| v.as_str())
    }

    /// Whether retrying the failed operation may succeed.
    ///
    /// MCP failures are split by their diagnostic text: connection problems
    /// are retryable, configuration problems are not, and anything else
    /// defaults to retryable.
    pub fn is_retryable(&self) -> bool {
        if !self.kind.is_retryable() {
            return false;
        }

        if self.kind == ErrorKind::Mcp {
            return self.is_mcp_connection_error();
        }

        true
    }

    /// Recommended wait before retrying, zero when a retry is not advised
    pub fn suggested_delay(&self) -> Duration {
        match self.kind {
            ErrorKind::RateLimit => self
                .retry_after
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RATE_LIMIT_DELAY),
            ErrorKind::Network | ErrorKind::Timeout => NETWORK_RETRY_DELAY,
            ErrorKind::Mcp if self.is_mcp_connection_error() => MCP_RETRY_DELAY,
            _ => Duration::ZERO,
        }
    }

    fn is_mcp_connection_error(&self) -> bool {
        let text = self
            .diagnostic()
            .filter(|d| !d.is_empty())
            .unwrap_or(self.message.as_str())
            .to_lowercase();

        if contains_any(&text, MCP_CONNECTION_KEYWORDS) {
            return true;
        }
        if contains_any(&text, MCP_CONFIGURATION_KEYWORDS) {
            return false;
        }
        true
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) if code != 0 => write!(
                f,
                "runner error ({}, code={}): {}",
                self.kind, code, self.message
            ),
            _ => write!(f, "runner error ({}): {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ClassifiedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// One entry of the ordered classification table
struct Rule {
    kind: ErrorKind,
    keywords: &'static [&'static str],
    message: &'static str,
    suggestion: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        kind: ErrorKind::Authentication,
        keywords: &[
            "authentication",
            "api key",
            "unauthorized",
            "401",
            "forbidden",
            "403",
            "invalid api key",
            "missing api key",
            "anthropic_api_key",
        ],
        message: "Authentication failed - check ANTHROPIC_API_KEY environment variable",
        suggestion: "Verify your API key is valid and has necessary permissions",
    },
    Rule {
        kind: ErrorKind::RateLimit,
        keywords: &[
            "rate limit",
            "too many requests",
            "429",
            "quota exceeded",
            "request limit",
            "usage limit",
        ],
        message: "Rate limit exceeded - please wait before retrying",
        suggestion: "Wait before retrying or reduce request frequency",
    },
    Rule {
        kind: ErrorKind::Permission,
        keywords: &[
            "permission denied",
            "not allowed",
            "tool not permitted",
            "access denied",
            "insufficient permissions",
            "unauthorized tool",
        ],
        message: "Tool usage not permitted - check allowed/disallowed tools configuration",
        suggestion: "Update --allowedTools or permissions settings",
    },
    Rule {
        kind: ErrorKind::Mcp,
        keywords: &[
            "mcp",
            "model context protocol",
            "mcp server",
            "mcp tool",
            "mcp config",
            "server error",
            "protocol error",
        ],
        message: "MCP server error",
        suggestion: "Check MCP server configuration and ensure servers are running",
    },
    Rule {
        kind: ErrorKind::Network,
        keywords: &[
            "network",
            "connection",
            "timeout",
            "dns",
            "unreachable",
            "connection refused",
            "connection reset",
            "socket",
            "no internet",
        ],
        message: "Network connectivity issue",
        suggestion: "Check internet connection and try again",
    },
    Rule {
        kind: ErrorKind::Timeout,
        keywords: &["timeout", "timed out", "deadline exceeded", "context deadline"],
        message: "Operation timed out",
        suggestion: "Increase timeout or try a simpler operation",
    },
    Rule {
        kind: ErrorKind::Session,
        keywords: &[
            "session",
            "session not found",
            "invalid session",
            "session expired",
            "resume",
            "conversation not found",
        ],
        message: "Session management error",
        suggestion: "Check session ID or start a new conversation",
    },
    Rule {
        kind: ErrorKind::Validation,
        keywords: &[
            "invalid",
            "validation",
            "malformed",
            "bad request",
            "400",
            "invalid argument",
            "invalid option",
            "invalid flag",
        ],
        message: "Input validation failed",
        suggestion: "Check command arguments and options",
    },
];

const MCP_CONNECTION_KEYWORDS: &[&str] = &[
    "connection",
    "connect",
    "timeout",
    "refused",
    "unreachable",
    "network",
    "socket",
    "pipe",
    "broken pipe",
];

const MCP_CONFIGURATION_KEYWORDS: &[&str] = &[
    "configuration",
    "config",
    "invalid",
    "not found",
    "permission",
    "authentication",
    "unauthorized",
    "forbidden",
];

/// Classify a failed invocation from its diagnostic output and exit code.
///
/// Pure and deterministic: the same input always yields the same kind,
/// message and details.
pub fn classify(diagnostic: &str, exit_code: Option<i32>) -> ClassifiedError {
    let diagnostic = diagnostic.trim();
    let lowered = diagnostic.to_lowercase();

    let Some(rule) = RULES
        .iter()
        .find(|rule| contains_any(&lowered, rule.keywords))
    else {
        return command_failure(diagnostic, exit_code);
    };

    let suggestion = match rule.kind {
        ErrorKind::Mcp => mcp_suggestion(&lowered),
        _ => rule.suggestion,
    };

    let error = ClassifiedError::new(rule.kind, rule.message)
        .with_code(exit_code)
        .with_detail(DETAIL_SUGGESTION, suggestion)
        .with_detail(DETAIL_STDERR, diagnostic);

    match rule.kind {
        ErrorKind::RateLimit => match extract_retry_after(diagnostic) {
            Some(seconds) => error.with_retry_after(seconds),
            None => error,
        },
        _ => error,
    }
}

fn command_failure(diagnostic: &str, exit_code: Option<i32>) -> ClassifiedError {
    let message = diagnostic
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or(GENERIC_FAILURE_MESSAGE);

    ClassifiedError::new(ErrorKind::Command, message)
        .with_code(exit_code)
        .with_detail(
            DETAIL_SUGGESTION,
            "Inspect the diagnostic output of the invocation for details",
        )
        .with_detail(DETAIL_STDERR, diagnostic)
}

fn mcp_suggestion(lowered: &str) -> &'static str {
    if contains_any(
        lowered,
        &["connection", "connect", "unreachable", "timeout", "refused"],
    ) {
        "MCP server connection failed - ensure server is running and accessible"
    } else if contains_any(
        lowered,
        &["config", "configuration", "invalid", "not found", "parse"],
    ) {
        "MCP configuration error - check your MCP config file"
    } else {
        "Check MCP server configuration and ensure servers are running"
    }
}

fn retry_after_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)retry after (\d+)",
            r"(?i)retry-after:?\s*(\d+)",
            r"(?i)wait (\d+) seconds",
            r"(?i)try again in (\d+)",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

/// Extract a retry-after hint, in seconds, from free-form diagnostic text.
///
/// Recognises "retry after N", "retry-after: N", "wait N seconds" and
/// "try again in N"; the first pattern that matches wins.
pub fn extract_retry_after(diagnostic: &str) -> Option<u64> {
    retry_after_patterns().iter().find_map(|re| {
        re.captures(diagnostic)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

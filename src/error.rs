use std::time::Duration;

/// Crate-wide error type.
///
/// Structural variants (`NoTargets`, `EmptyTarget`, `InvalidTarget`) abort
/// the call that observed them; network variants are retried and end up
/// recorded inside a failed probe result; `CircuitOpen` is the breaker's
/// deliberate fast-fail; `Cancelled` always propagates to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ConnectivityError {
    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("operation cancelled")]
    Cancelled,

    #[error("test deadline exceeded")]
    DeadlineExceeded,

    #[error("no probe targets configured")]
    NoTargets,

    #[error("empty probe target at index {0}")]
    EmptyTarget(usize),

    #[error("invalid probe target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("{operation} to {target} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        target: String,
        timeout_ms: u64,
    },

    #[error("connection to {target} failed: {reason}")]
    Connection { target: String, reason: String },

    #[error("DNS resolution via {server}: only {resolved}/{total} test domains resolved")]
    DnsResolution {
        server: String,
        resolved: usize,
        total: usize,
    },

    #[error("HTTP request to {target} failed: {reason}")]
    Http { target: String, reason: String },

    #[error("HTTP request to {target} returned status {status}")]
    HttpStatus { target: String, status: u16 },
}

impl ConnectivityError {
    /// Coarse classification recorded under the `error_type` detail key.
    /// Diagnostics collaborators parse these values; keep them stable.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Timeout { .. } | Self::DeadlineExceeded => "timeout",
            Self::Connection { .. } => "connection",
            _ => "other",
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn timeout(operation: &'static str, target: &str, timeout: Duration) -> Self {
        Self::Timeout {
            operation,
            target: target.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

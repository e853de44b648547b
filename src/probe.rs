//! Probe result types shared by every test suite.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    TcpHandshake,
    DnsResolution,
    HttpConnectivity,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TcpHandshake => "tcp_handshake",
            Self::DnsResolution => "dns_resolution",
            Self::HttpConnectivity => "http_connectivity",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic detail value. A closed set of variants rather than an open
/// dynamic type; diagnostics collaborators parse these.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DetailValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Float(f64),
}

impl From<&str> for DetailValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for DetailValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<bool> for DetailValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for DetailValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for DetailValue {
    fn from(v: u64) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u32> for DetailValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u16> for DetailValue {
    fn from(v: u16) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<usize> for DetailValue {
    fn from(v: usize) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for DetailValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// Diagnostic payload attached to each probe. Keys like `server`,
/// `timeout_ms`, `error`, `status_code` and `error_type` are a semi-stable
/// contract parsed by outage/diagnostics collaborators.
pub type Details = BTreeMap<String, DetailValue>;

/// Outcome of a single probe attempt. Immutable once built.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub kind: ProbeKind,
    pub target: String,
    pub success: bool,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    /// Retries consumed by the retry executor (0 = first attempt worked).
    pub retry_count: u32,
    /// True when the circuit breaker rejected the probe without touching
    /// the network.
    pub circuit_open: bool,
    pub error: Option<String>,
    pub details: Details,
}

impl ProbeResult {
    pub fn new(
        kind: ProbeKind,
        target: impl Into<String>,
        timestamp: DateTime<Utc>,
        duration: Duration,
        success: bool,
        error: Option<String>,
        details: Details,
    ) -> Self {
        Self {
            kind,
            target: target.into(),
            success,
            duration,
            timestamp,
            retry_count: 0,
            circuit_open: false,
            error,
            details,
        }
    }
}

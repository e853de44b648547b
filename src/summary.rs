//! Serializable projection of tiered results for logging and telemetry.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::tester::{ComprehensiveTestResult, LightweightTestResult, TestStrategy, TieredTestResult};

#[derive(Debug, Clone, Serialize)]
pub struct TestSummary {
    pub strategy: TestStrategy,
    pub overall_success: bool,
    pub short_circuited: bool,
    pub total_duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub lightweight: LightweightSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comprehensive: Option<ComprehensiveSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LightweightSummary {
    pub success: bool,
    pub success_count: usize,
    pub failure_count: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComprehensiveSummary {
    pub success: bool,
    pub success_count: usize,
    pub failure_count: usize,
    pub dns_tests: usize,
    pub http_tests: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalated_from: Option<String>,
}

impl From<&LightweightTestResult> for LightweightSummary {
    fn from(result: &LightweightTestResult) -> Self {
        Self {
            success: result.overall_success,
            success_count: result.success_count,
            failure_count: result.failure_count,
            duration_ms: result.duration.as_millis() as u64,
        }
    }
}

impl From<&ComprehensiveTestResult> for ComprehensiveSummary {
    fn from(result: &ComprehensiveTestResult) -> Self {
        Self {
            success: result.overall_success,
            success_count: result.success_count,
            failure_count: result.failure_count,
            dns_tests: result.dns_results.len(),
            http_tests: result.http_results.len(),
            duration_ms: result.duration.as_millis() as u64,
            escalated_from: result.escalated_from.clone(),
        }
    }
}

impl TieredTestResult {
    /// Compact view of this result for structured logs and monitoring.
    pub fn summary(&self) -> TestSummary {
        TestSummary {
            strategy: self.strategy,
            overall_success: self.overall_success,
            short_circuited: self.short_circuited,
            total_duration_ms: self.total_duration.as_millis() as u64,
            timestamp: self.timestamp,
            lightweight: LightweightSummary::from(&self.lightweight),
            comprehensive: self.comprehensive.as_ref().map(ComprehensiveSummary::from),
        }
    }
}

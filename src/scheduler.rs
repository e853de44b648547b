//! Failure-history-aware test scheduling.

use tokio::sync::watch;
use tracing::debug;

use crate::config::{FORCE_COMPREHENSIVE_FAILURE_THRESHOLD, PERIODIC_VALIDATION_INTERVAL};
use crate::error::ConnectivityError;
use crate::tester::{TestStrategy, Tester, TieredTestResult};

impl Tester {
    /// Run one tiered cycle, forcing comprehensive testing when the
    /// failure history warrants deep diagnosis: repeated consecutive
    /// failures, a previous escalated run that still failed, or the
    /// periodic validation cadence. `consecutive_failures` is the
    /// orchestrator's counter, not ours.
    pub async fn schedule_tests(
        &self,
        stop_rx: &watch::Receiver<bool>,
        last_result: Option<&TieredTestResult>,
        consecutive_failures: u32,
    ) -> Result<TieredTestResult, ConnectivityError> {
        let mut force_comprehensive = false;

        if consecutive_failures >= FORCE_COMPREHENSIVE_FAILURE_THRESHOLD {
            debug!(
                consecutive_failures,
                "forcing comprehensive tests due to consecutive failures"
            );
            force_comprehensive = true;
        }

        if let Some(last) = last_result {
            if last.strategy == TestStrategy::EscalatedToComprehensive && !last.overall_success {
                debug!("forcing comprehensive tests due to previous escalated failure");
                force_comprehensive = true;
            }

            if consecutive_failures % PERIODIC_VALIDATION_INTERVAL == 0 {
                debug!("forcing comprehensive tests for periodic validation");
                force_comprehensive = true;
            }
        }

        self.run_tiered_tests_with_force(stop_rx, force_comprehensive).await
    }
}

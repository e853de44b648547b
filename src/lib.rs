//! connwatch — connectivity-resilience engine for autonomous network
//! monitors.
//!
//! Decides cheaply whether a network path is usable, escalates to deeper
//! diagnosis only when needed, and protects itself from hammering failing
//! targets:
//!
//! ```text
//! Tester::schedule_tests
//!   └── run_tiered_tests_with_force
//!       ├── lightweight tier: TCP handshakes, 50% rule (short-circuits)
//!       └── comprehensive tier: DNS resolution + HTTP HEAD, 60% rule
//!           (each probe: CircuitBreaker ∘ retry-with-backoff ∘ raw op)
//! ```
//!
//! The crate is a library consumed by a monitoring orchestrator; it has no
//! CLI or server of its own. Cancellation is a `tokio::sync::watch` stop
//! signal threaded through every entry point.

pub mod breaker;
pub mod config;
pub mod error;
pub mod probe;
pub mod retry;
pub mod scheduler;
pub mod summary;
pub mod tester;

pub use breaker::{BreakerState, CircuitBreaker};
pub use config::ConnectivityConfig;
pub use error::ConnectivityError;
pub use probe::{DetailValue, Details, ProbeKind, ProbeResult};
pub use retry::{execute_with_retry, RetryConfig};
pub use summary::{ComprehensiveSummary, LightweightSummary, TestSummary};
pub use tester::{
    ComprehensiveTestResult, LightweightTestResult, TestStrategy, Tester, TieredTestResult,
};

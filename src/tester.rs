//! Tiered connectivity testing.
//!
//! The `Tester` owns one circuit breaker per probe class (TCP handshakes
//! and DNS resolution share one, HTTP reachability owns the other), a
//! shared HTTP client and the retry configuration. Lightweight tests fan
//! out TCP handshakes to the configured DNS servers; comprehensive tests
//! add DNS resolution and HTTP HEAD probes. Tiered runs escalate from
//! lightweight to comprehensive only when the cheap tier fails or the
//! caller forces it.

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::config::{
    ConnectivityConfig, COMPREHENSIVE_DEADLINE_FACTOR, LIGHTWEIGHT_DEADLINE_FACTOR, USER_AGENT,
};
use crate::error::ConnectivityError;
use crate::probe::{Details, ProbeKind, ProbeResult};
use crate::retry::{execute_with_retry, RetryConfig};

/// Results from the lightweight tier: one TCP handshake per DNS server.
#[derive(Debug, Clone)]
pub struct LightweightTestResult {
    pub overall_success: bool,
    pub results: Vec<ProbeResult>,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    pub success_count: usize,
    pub failure_count: usize,
}

/// Results from the comprehensive tier: DNS resolution plus HTTP probes.
#[derive(Debug, Clone)]
pub struct ComprehensiveTestResult {
    pub overall_success: bool,
    pub dns_results: Vec<ProbeResult>,
    pub http_results: Vec<ProbeResult>,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    pub success_count: usize,
    pub failure_count: usize,
    /// Set to "lightweight" when this run was an escalation.
    pub escalated_from: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStrategy {
    LightweightOnly,
    EscalatedToComprehensive,
    LightweightFallback,
}

impl TestStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LightweightOnly => "lightweight_only",
            Self::EscalatedToComprehensive => "escalated_to_comprehensive",
            Self::LightweightFallback => "lightweight_fallback",
        }
    }
}

impl std::fmt::Display for TestStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one tiered testing cycle.
#[derive(Debug, Clone)]
pub struct TieredTestResult {
    pub strategy: TestStrategy,
    pub lightweight: LightweightTestResult,
    /// Present unless the run short-circuited or fell back.
    pub comprehensive: Option<ComprehensiveTestResult>,
    pub overall_success: bool,
    pub short_circuited: bool,
    pub total_duration: Duration,
    pub timestamp: DateTime<Utc>,
}

pub struct Tester {
    connection_timeout: Duration,
    http_timeout: Duration,
    dns_servers: Vec<String>,
    http_hosts: Vec<String>,
    dns_test_domains: Vec<String>,
    http_client: reqwest::Client,
    dns_breaker: CircuitBreaker,
    http_breaker: CircuitBreaker,
    retry: RetryConfig,
}

impl Default for Tester {
    fn default() -> Self {
        Self::new()
    }
}

impl Tester {
    /// Tester with production defaults.
    pub fn new() -> Self {
        Self::with_config(ConnectivityConfig::default())
    }

    pub fn with_config(config: ConnectivityConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connection_timeout)
            .timeout(config.http_timeout)
            .build()
            .expect("failed to build HTTP client");

        Self {
            connection_timeout: config.connection_timeout,
            http_timeout: config.http_timeout,
            dns_servers: config.normalized_dns_servers(),
            http_hosts: config.http_hosts,
            dns_test_domains: config.dns_test_domains,
            http_client,
            dns_breaker: CircuitBreaker::new(
                config.breaker_failure_threshold,
                config.breaker_reset_timeout,
            ),
            http_breaker: CircuitBreaker::new(
                config.breaker_failure_threshold,
                config.breaker_reset_timeout,
            ),
            retry: config.retry,
        }
    }

    /// Breaker guarding TCP handshake and DNS resolution probes.
    pub fn dns_breaker(&self) -> &CircuitBreaker {
        &self.dns_breaker
    }

    /// Breaker guarding HTTP reachability probes.
    pub fn http_breaker(&self) -> &CircuitBreaker {
        &self.http_breaker
    }

    // --- Lightweight tier ---

    /// Quick connectivity check: concurrent TCP handshakes against every
    /// configured DNS server, aggregated with the 50% rule.
    ///
    /// Fails only on structural misconfiguration (no targets) or
    /// cancellation; individual probe failures are recorded in the result.
    pub async fn run_lightweight_tests(
        &self,
        stop_rx: &watch::Receiver<bool>,
    ) -> Result<LightweightTestResult, ConnectivityError> {
        if self.dns_servers.is_empty() {
            return Err(ConnectivityError::NoTargets);
        }

        let started = Instant::now();
        let timestamp = Utc::now();
        debug!("starting lightweight connectivity tests");

        let deadline = started + self.connection_timeout * LIGHTWEIGHT_DEADLINE_FACTOR;

        let probes = self.dns_servers.iter().enumerate().map(|(index, server)| {
            async move {
                if server.is_empty() {
                    return Ok(empty_target_result(ProbeKind::TcpHandshake, index));
                }
                self.probe_tcp_handshake(stop_rx, deadline, server).await
            }
        });

        let mut results = Vec::with_capacity(self.dns_servers.len());
        for outcome in join_all(probes).await {
            results.push(outcome?);
        }

        let success_count = results.iter().filter(|r| r.success).count();
        let failure_count = results.len() - success_count;
        let overall_success =
            success_count > 0 && success_count as f64 / results.len() as f64 >= 0.5;
        let duration = started.elapsed();

        debug!(
            overall_success,
            success_count,
            failure_count,
            duration_ms = duration.as_millis() as u64,
            test_type = "lightweight",
            "lightweight connectivity tests completed"
        );

        Ok(LightweightTestResult {
            overall_success,
            results,
            duration,
            timestamp,
            success_count,
            failure_count,
        })
    }

    // --- Comprehensive tier ---

    /// Full connectivity analysis: DNS resolution against each configured
    /// server and HTTP HEAD probes against each configured URL, run
    /// concurrently and aggregated with the 60% rule.
    pub async fn run_comprehensive_tests(
        &self,
        stop_rx: &watch::Receiver<bool>,
    ) -> Result<ComprehensiveTestResult, ConnectivityError> {
        self.run_comprehensive_inner(stop_rx, None).await
    }

    /// Comprehensive tests invoked as an escalation after a lightweight
    /// failure; the result is tagged accordingly.
    pub async fn run_comprehensive_tests_escalated(
        &self,
        stop_rx: &watch::Receiver<bool>,
    ) -> Result<ComprehensiveTestResult, ConnectivityError> {
        self.run_comprehensive_inner(stop_rx, Some("lightweight")).await
    }

    async fn run_comprehensive_inner(
        &self,
        stop_rx: &watch::Receiver<bool>,
        escalated_from: Option<&str>,
    ) -> Result<ComprehensiveTestResult, ConnectivityError> {
        if self.dns_servers.is_empty() && self.http_hosts.is_empty() {
            return Err(ConnectivityError::NoTargets);
        }

        let started = Instant::now();
        let timestamp = Utc::now();
        debug!(
            escalated_from = escalated_from.unwrap_or(""),
            "starting comprehensive connectivity tests"
        );

        let deadline =
            started + (self.connection_timeout + self.http_timeout) * COMPREHENSIVE_DEADLINE_FACTOR;

        let dns_group = async {
            join_all(
                self.dns_servers
                    .iter()
                    .map(|server| self.probe_dns_resolution(stop_rx, deadline, server)),
            )
            .await
        };
        let http_group = async {
            join_all(
                self.http_hosts
                    .iter()
                    .map(|host| self.probe_http_connectivity(stop_rx, deadline, host)),
            )
            .await
        };

        let (dns_outcomes, http_outcomes) = tokio::join!(dns_group, http_group);

        let mut dns_results = Vec::with_capacity(self.dns_servers.len());
        for outcome in dns_outcomes {
            dns_results.push(outcome?);
        }
        let mut http_results = Vec::with_capacity(self.http_hosts.len());
        for outcome in http_outcomes {
            http_results.push(outcome?);
        }

        let success_count = dns_results.iter().filter(|r| r.success).count()
            + http_results.iter().filter(|r| r.success).count();
        let total_tests = dns_results.len() + http_results.len();
        let failure_count = total_tests - success_count;
        let overall_success =
            total_tests > 0 && success_count as f64 / total_tests as f64 >= 0.6;
        let duration = started.elapsed();

        debug!(
            overall_success,
            success_count,
            failure_count,
            dns_tests = dns_results.len(),
            http_tests = http_results.len(),
            duration_ms = duration.as_millis() as u64,
            escalated_from = escalated_from.unwrap_or(""),
            test_type = "comprehensive",
            "comprehensive connectivity tests completed"
        );

        Ok(ComprehensiveTestResult {
            overall_success,
            dns_results,
            http_results,
            duration,
            timestamp,
            success_count,
            failure_count,
            escalated_from: escalated_from.map(String::from),
        })
    }

    // --- Tiered orchestration ---

    /// Tiered testing with the default escalation policy.
    pub async fn run_tiered_tests(
        &self,
        stop_rx: &watch::Receiver<bool>,
    ) -> Result<TieredTestResult, ConnectivityError> {
        self.run_tiered_tests_with_force(stop_rx, false).await
    }

    /// Tiered testing: lightweight first, then comprehensive when forced
    /// or when the lightweight tier failed. A comprehensive run that
    /// itself fails to execute degrades to the lightweight outcome instead
    /// of surfacing the error; cancellation always propagates.
    pub async fn run_tiered_tests_with_force(
        &self,
        stop_rx: &watch::Receiver<bool>,
        force_comprehensive: bool,
    ) -> Result<TieredTestResult, ConnectivityError> {
        let started = Instant::now();
        let timestamp = Utc::now();
        debug!(force_comprehensive, "starting tiered connectivity tests");

        let lightweight = self.run_lightweight_tests(stop_rx).await?;

        let need_comprehensive = force_comprehensive || !lightweight.overall_success;

        let (strategy, comprehensive, overall_success, short_circuited) = if need_comprehensive {
            debug!(
                lightweight_success = lightweight.overall_success,
                force_comprehensive, "escalating to comprehensive tests"
            );
            match self.run_comprehensive_tests_escalated(stop_rx).await {
                Ok(comp) => {
                    let success = comp.overall_success;
                    (
                        TestStrategy::EscalatedToComprehensive,
                        Some(comp),
                        success,
                        false,
                    )
                }
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err) => {
                    warn!(
                        error = %err,
                        "comprehensive tests failed to execute, using lightweight results"
                    );
                    (
                        TestStrategy::LightweightFallback,
                        None,
                        lightweight.overall_success,
                        false,
                    )
                }
            }
        } else {
            debug!("lightweight tests successful, short-circuiting comprehensive tests");
            (
                TestStrategy::LightweightOnly,
                None,
                lightweight.overall_success,
                true,
            )
        };

        let result = TieredTestResult {
            strategy,
            lightweight,
            comprehensive,
            overall_success,
            short_circuited,
            total_duration: started.elapsed(),
            timestamp,
        };

        debug!(
            strategy = %result.strategy,
            overall_success = result.overall_success,
            short_circuited = result.short_circuited,
            total_duration_ms = result.total_duration.as_millis() as u64,
            "tiered connectivity tests completed"
        );

        Ok(result)
    }

    // --- Individual probes ---

    /// TCP handshake probe, guarded by the DNS-class breaker and the retry
    /// executor. Returns `Err` only on cancellation.
    async fn probe_tcp_handshake(
        &self,
        stop_rx: &watch::Receiver<bool>,
        deadline: Instant,
        server: &str,
    ) -> Result<ProbeResult, ConnectivityError> {
        let started = Instant::now();
        let timestamp = Utc::now();
        let retries = Cell::new(0u32);
        let retries_out = &retries;

        let outcome = self
            .dns_breaker
            .execute(|| async move {
                let (attempts, res) = execute_with_retry(&self.retry, stop_rx, deadline, || {
                    self.perform_tcp_handshake(deadline, server)
                })
                .await;
                retries_out.set(attempts);
                res
            })
            .await;

        if let Err(err) = &outcome {
            if err.is_cancellation() {
                return Err(ConnectivityError::Cancelled);
            }
        }

        let retry_count = retries.get();
        let circuit_open = matches!(outcome, Err(ConnectivityError::CircuitOpen));

        let mut details = Details::new();
        details.insert("server".to_string(), server.into());
        details.insert(
            "timeout_ms".to_string(),
            (self.connection_timeout.as_millis() as u64).into(),
        );
        details.insert("retry_count".to_string(), retry_count.into());
        details.insert("circuit_open".to_string(), circuit_open.into());
        details.insert(
            "circuit_state".to_string(),
            self.dns_breaker.state().as_str().into(),
        );
        if let Err(err) = &outcome {
            details.insert("error".to_string(), err.to_string().into());
            details.insert("error_type".to_string(), err.error_type().into());
        }

        let mut result = ProbeResult::new(
            ProbeKind::TcpHandshake,
            server,
            timestamp,
            started.elapsed(),
            outcome.is_ok(),
            outcome.as_ref().err().map(|e| e.to_string()),
            details,
        );
        result.retry_count = retry_count;
        result.circuit_open = circuit_open;

        debug!(
            server = %server,
            success = result.success,
            duration_ms = result.duration.as_millis() as u64,
            retry_count,
            circuit_open,
            circuit_state = %self.dns_breaker.state(),
            "TCP handshake probe completed"
        );

        Ok(result)
    }

    async fn perform_tcp_handshake(
        &self,
        deadline: Instant,
        server: &str,
    ) -> Result<(), ConnectivityError> {
        let attempt_deadline = deadline.min(Instant::now() + self.connection_timeout);
        match timeout_at(attempt_deadline, TcpStream::connect(server)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                Ok(())
            }
            Ok(Err(err)) => Err(ConnectivityError::Connection {
                target: server.to_string(),
                reason: err.to_string(),
            }),
            Err(_) => Err(ConnectivityError::timeout(
                "tcp handshake",
                server,
                self.connection_timeout,
            )),
        }
    }

    /// DNS resolution probe: resolves the configured test domains through
    /// one specific server. The probe succeeds when at least half of the
    /// domains resolve to one or more addresses.
    async fn probe_dns_resolution(
        &self,
        stop_rx: &watch::Receiver<bool>,
        deadline: Instant,
        server: &str,
    ) -> Result<ProbeResult, ConnectivityError> {
        let started = Instant::now();
        let timestamp = Utc::now();
        let retries = Cell::new(0u32);
        let retries_out = &retries;
        let resolutions = RefCell::new(Details::new());
        let resolutions_out = &resolutions;

        let outcome = self
            .dns_breaker
            .execute(|| async move {
                let (attempts, res) = execute_with_retry(&self.retry, stop_rx, deadline, || {
                    self.perform_dns_resolution(deadline, server, resolutions_out)
                })
                .await;
                retries_out.set(attempts);
                res
            })
            .await;

        if let Err(err) = &outcome {
            if err.is_cancellation() {
                return Err(ConnectivityError::Cancelled);
            }
        }

        let retry_count = retries.get();
        let circuit_open = matches!(outcome, Err(ConnectivityError::CircuitOpen));

        let mut details = resolutions.into_inner();
        details.insert("server".to_string(), server.into());
        details.insert(
            "domains".to_string(),
            self.dns_test_domains.join(", ").into(),
        );
        details.insert(
            "timeout_ms".to_string(),
            (self.connection_timeout.as_millis() as u64).into(),
        );
        details.insert("retry_count".to_string(), retry_count.into());
        details.insert("circuit_open".to_string(), circuit_open.into());
        details.insert(
            "circuit_state".to_string(),
            self.dns_breaker.state().as_str().into(),
        );
        if let Err(err) = &outcome {
            details.insert("error".to_string(), err.to_string().into());
            details.insert("error_type".to_string(), err.error_type().into());
        }

        let mut result = ProbeResult::new(
            ProbeKind::DnsResolution,
            server,
            timestamp,
            started.elapsed(),
            outcome.is_ok(),
            outcome.as_ref().err().map(|e| e.to_string()),
            details,
        );
        result.retry_count = retry_count;
        result.circuit_open = circuit_open;

        debug!(
            server = %server,
            success = result.success,
            duration_ms = result.duration.as_millis() as u64,
            retry_count,
            circuit_open,
            "DNS resolution probe completed"
        );

        Ok(result)
    }

    async fn perform_dns_resolution(
        &self,
        deadline: Instant,
        server: &str,
        out: &RefCell<Details>,
    ) -> Result<(), ConnectivityError> {
        let addr: SocketAddr =
            server
                .parse()
                .map_err(|_| ConnectivityError::InvalidTarget {
                    target: server.to_string(),
                    reason: "not a socket address".to_string(),
                })?;
        let resolver = self.resolver_for(addr);

        let mut resolved = 0usize;
        let mut details = Details::new();
        for domain in &self.dns_test_domains {
            let attempt_deadline = deadline.min(Instant::now() + self.connection_timeout);
            let key = format!("resolution_{domain}");
            match timeout_at(attempt_deadline, resolver.lookup_ip(domain.as_str())).await {
                Ok(Ok(lookup)) => {
                    let addresses = lookup.iter().count();
                    if addresses > 0 {
                        resolved += 1;
                        details.insert(key, format!("resolved {addresses} addresses").into());
                    } else {
                        details.insert(key, "no addresses returned".into());
                    }
                }
                Ok(Err(err)) => {
                    details.insert(key, format!("failed: {err}").into());
                }
                Err(_) => {
                    details.insert(key, "timed out".into());
                }
            }
        }
        details.insert("successful_resolutions".to_string(), resolved.into());
        *out.borrow_mut() = details;

        let total = self.dns_test_domains.len();
        if total > 0 && resolved as f64 / total as f64 >= 0.5 {
            Ok(())
        } else {
            Err(ConnectivityError::DnsResolution {
                server: server.to_string(),
                resolved,
                total,
            })
        }
    }

    fn resolver_for(&self, addr: SocketAddr) -> TokioAsyncResolver {
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(addr, Protocol::Udp));
        let mut opts = ResolverOpts::default();
        opts.timeout = self.connection_timeout;
        // The retry executor owns retries; keep the resolver single-shot
        // and uncached so every probe exercises the network.
        opts.attempts = 1;
        opts.cache_size = 0;
        opts.use_hosts_file = false;
        TokioAsyncResolver::tokio(config, opts)
    }

    /// HTTP reachability probe: HEAD request against one URL, guarded by
    /// the HTTP-class breaker and the retry executor. Any status below 400
    /// counts as reachable.
    async fn probe_http_connectivity(
        &self,
        stop_rx: &watch::Receiver<bool>,
        deadline: Instant,
        target: &str,
    ) -> Result<ProbeResult, ConnectivityError> {
        let started = Instant::now();
        let timestamp = Utc::now();
        let retries = Cell::new(0u32);
        let retries_out = &retries;
        let response_details = RefCell::new(Details::new());
        let response_out = &response_details;

        let outcome = self
            .http_breaker
            .execute(|| async move {
                let (attempts, res) = execute_with_retry(&self.retry, stop_rx, deadline, || {
                    self.perform_http_head(deadline, target, response_out)
                })
                .await;
                retries_out.set(attempts);
                res
            })
            .await;

        if let Err(err) = &outcome {
            if err.is_cancellation() {
                return Err(ConnectivityError::Cancelled);
            }
        }

        let retry_count = retries.get();
        let circuit_open = matches!(outcome, Err(ConnectivityError::CircuitOpen));

        let mut details = response_details.into_inner();
        details.insert("http_host".to_string(), target.into());
        details.insert(
            "timeout_ms".to_string(),
            (self.http_timeout.as_millis() as u64).into(),
        );
        details.insert("retry_count".to_string(), retry_count.into());
        details.insert("circuit_open".to_string(), circuit_open.into());
        details.insert(
            "circuit_state".to_string(),
            self.http_breaker.state().as_str().into(),
        );
        if let Err(err) = &outcome {
            details.insert("error".to_string(), err.to_string().into());
            details.insert("error_type".to_string(), err.error_type().into());
        }

        let mut result = ProbeResult::new(
            ProbeKind::HttpConnectivity,
            target,
            timestamp,
            started.elapsed(),
            outcome.is_ok(),
            outcome.as_ref().err().map(|e| e.to_string()),
            details,
        );
        result.retry_count = retry_count;
        result.circuit_open = circuit_open;

        debug!(
            http_host = %target,
            success = result.success,
            duration_ms = result.duration.as_millis() as u64,
            retry_count,
            circuit_open,
            circuit_state = %self.http_breaker.state(),
            "HTTP connectivity probe completed"
        );

        Ok(result)
    }

    async fn perform_http_head(
        &self,
        deadline: Instant,
        target: &str,
        out: &RefCell<Details>,
    ) -> Result<(), ConnectivityError> {
        let parsed = url::Url::parse(target).map_err(|err| ConnectivityError::InvalidTarget {
            target: target.to_string(),
            reason: err.to_string(),
        })?;

        let attempt_deadline = deadline.min(Instant::now() + self.http_timeout);
        let response = match timeout_at(attempt_deadline, self.http_client.head(target).send())
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                return Err(if err.is_timeout() {
                    ConnectivityError::timeout("http request", target, self.http_timeout)
                } else if err.is_connect() {
                    ConnectivityError::Connection {
                        target: target.to_string(),
                        reason: err.to_string(),
                    }
                } else {
                    ConnectivityError::Http {
                        target: target.to_string(),
                        reason: err.to_string(),
                    }
                });
            }
            Err(_) => {
                return Err(ConnectivityError::timeout(
                    "http request",
                    target,
                    self.http_timeout,
                ));
            }
        };

        let status = response.status();
        {
            let mut details = out.borrow_mut();
            details.insert("status_code".to_string(), status.as_u16().into());
            details.insert("status".to_string(), status.to_string().into());
            if let Some(host) = parsed.host_str() {
                details.insert("host".to_string(), host.into());
            }
        }

        if status.as_u16() >= 400 {
            return Err(ConnectivityError::HttpStatus {
                target: target.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Failed result slot for an empty target, recorded at its original index
/// instead of panicking or skewing the aggregate.
fn empty_target_result(kind: ProbeKind, index: usize) -> ProbeResult {
    let err = ConnectivityError::EmptyTarget(index);
    let mut details = Details::new();
    details.insert("server".to_string(), "".into());
    details.insert("error".to_string(), err.to_string().into());
    details.insert("error_type".to_string(), err.error_type().into());
    ProbeResult::new(
        kind,
        "",
        Utc::now(),
        Duration::ZERO,
        false,
        Some(err.to_string()),
        details,
    )
}

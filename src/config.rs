use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::retry::RetryConfig;

// Probe timeouts
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

// Default probe targets
pub const DEFAULT_DNS_SERVERS: &[&str] = &["1.1.1.1", "8.8.8.8", "9.9.9.9", "208.67.222.222"];
pub const DEFAULT_HTTP_HOSTS: &[&str] = &[
    "https://google.com",
    "https://cloudflare.com",
    "https://amazon.com",
];
pub const DEFAULT_DNS_TEST_DOMAINS: &[&str] = &["google.com", "cloudflare.com", "amazon.com"];
pub const DNS_PORT: u16 = 53;

// Circuit breaker constants
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_BREAKER_RESET_TIMEOUT: Duration = Duration::from_secs(30);

// Suite deadlines, as multiples of the relevant probe timeouts. The
// lightweight factor leaves room for retries.
pub const LIGHTWEIGHT_DEADLINE_FACTOR: u32 = 4;
pub const COMPREHENSIVE_DEADLINE_FACTOR: u32 = 2;

// Scheduling constants
pub const FORCE_COMPREHENSIVE_FAILURE_THRESHOLD: u32 = 3;
pub const PERIODIC_VALIDATION_INTERVAL: u32 = 10;

pub const USER_AGENT: &str = concat!("connwatch/", env!("CARGO_PKG_VERSION"));

/// Tester configuration. Filled in by whatever loads configuration in the
/// embedding process; `Default` matches the production defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub connection_timeout: Duration,
    pub http_timeout: Duration,
    /// DNS server addresses; port 53 is appended when absent.
    pub dns_servers: Vec<String>,
    /// URLs probed with HEAD requests.
    pub http_hosts: Vec<String>,
    /// Domains resolved through each DNS server during comprehensive tests.
    pub dns_test_domains: Vec<String>,
    pub retry: RetryConfig,
    pub breaker_failure_threshold: u32,
    pub breaker_reset_timeout: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            dns_servers: DEFAULT_DNS_SERVERS.iter().map(|s| s.to_string()).collect(),
            http_hosts: DEFAULT_HTTP_HOSTS.iter().map(|s| s.to_string()).collect(),
            dns_test_domains: DEFAULT_DNS_TEST_DOMAINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            retry: RetryConfig::default(),
            breaker_failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            breaker_reset_timeout: DEFAULT_BREAKER_RESET_TIMEOUT,
        }
    }
}

impl ConnectivityConfig {
    /// DNS server list with the default port appended where missing.
    /// Empty entries are kept as-is so the suites can report them at their
    /// original index instead of silently dropping them.
    pub fn normalized_dns_servers(&self) -> Vec<String> {
        self.dns_servers
            .iter()
            .map(|s| {
                if s.is_empty() {
                    String::new()
                } else {
                    normalize_dns_server(s)
                }
            })
            .collect()
    }
}

/// Append `:53` to a DNS server address that lacks a port. Bare IPv6
/// addresses get bracketed in the process.
pub fn normalize_dns_server(server: &str) -> String {
    if server.parse::<SocketAddr>().is_ok() {
        return server.to_string();
    }
    if let Ok(ip) = server.parse::<IpAddr>() {
        return SocketAddr::new(ip, DNS_PORT).to_string();
    }
    // Hostname, possibly with an explicit port.
    match server.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => server.to_string(),
        _ => format!("{server}:{DNS_PORT}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_constants() {
        let config = ConnectivityConfig::default();
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.dns_servers.len(), 4);
        assert_eq!(config.http_hosts.len(), 3);
        assert_eq!(config.dns_test_domains.len(), 3);
        assert_eq!(config.breaker_failure_threshold, 3);
        assert_eq!(config.breaker_reset_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_normalize_appends_default_port() {
        assert_eq!(normalize_dns_server("1.1.1.1"), "1.1.1.1:53");
        assert_eq!(normalize_dns_server("dns.local"), "dns.local:53");
    }

    #[test]
    fn test_normalize_keeps_explicit_port() {
        assert_eq!(normalize_dns_server("1.1.1.1:5353"), "1.1.1.1:5353");
        assert_eq!(normalize_dns_server("dns.local:53"), "dns.local:53");
    }

    #[test]
    fn test_normalize_brackets_bare_ipv6() {
        assert_eq!(
            normalize_dns_server("2606:4700:4700::1111"),
            "[2606:4700:4700::1111]:53"
        );
    }

    #[test]
    fn test_normalize_keeps_bracketed_ipv6_with_port() {
        assert_eq!(
            normalize_dns_server("[2606:4700:4700::1111]:53"),
            "[2606:4700:4700::1111]:53"
        );
    }

    #[test]
    fn test_normalized_dns_servers_preserves_empty_entries() {
        let config = ConnectivityConfig {
            dns_servers: vec!["8.8.8.8".to_string(), String::new()],
            ..Default::default()
        };
        let normalized = config.normalized_dns_servers();
        assert_eq!(normalized, vec!["8.8.8.8:53".to_string(), String::new()]);
    }
}

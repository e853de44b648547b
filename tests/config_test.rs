use std::time::Duration;

use connwatch::config::*;
use connwatch::{ConnectivityConfig, RetryConfig};

#[test]
fn test_default_timeouts() {
    assert_eq!(DEFAULT_CONNECTION_TIMEOUT, Duration::from_secs(5));
    assert_eq!(DEFAULT_HTTP_TIMEOUT, Duration::from_secs(10));
}

#[test]
fn test_default_targets() {
    assert_eq!(
        DEFAULT_DNS_SERVERS,
        &["1.1.1.1", "8.8.8.8", "9.9.9.9", "208.67.222.222"]
    );
    assert_eq!(DEFAULT_HTTP_HOSTS.len(), 3);
    assert_eq!(DEFAULT_DNS_TEST_DOMAINS.len(), 3);
    assert_eq!(DNS_PORT, 53);
}

#[test]
fn test_scheduling_constants() {
    assert_eq!(FORCE_COMPREHENSIVE_FAILURE_THRESHOLD, 3);
    assert_eq!(PERIODIC_VALIDATION_INTERVAL, 10);
}

#[test]
fn test_deadline_factors() {
    assert_eq!(LIGHTWEIGHT_DEADLINE_FACTOR, 4);
    assert_eq!(COMPREHENSIVE_DEADLINE_FACTOR, 2);
}

#[test]
fn test_user_agent_carries_crate_version() {
    assert!(USER_AGENT.starts_with("connwatch/"));
}

#[test]
fn test_default_config_normalizes_dns_ports() {
    let config = ConnectivityConfig::default();
    let normalized = config.normalized_dns_servers();
    assert_eq!(
        normalized,
        vec![
            "1.1.1.1:53".to_string(),
            "8.8.8.8:53".to_string(),
            "9.9.9.9:53".to_string(),
            "208.67.222.222:53".to_string(),
        ]
    );
}

#[test]
fn test_config_deserializes_from_json() {
    let json = serde_json::json!({
        "connection_timeout": {"secs": 2, "nanos": 0},
        "http_timeout": {"secs": 4, "nanos": 0},
        "dns_servers": ["9.9.9.9"],
        "http_hosts": ["https://example.com"],
        "breaker_failure_threshold": 5
    });

    let config: ConnectivityConfig = serde_json::from_value(json).unwrap();
    assert_eq!(config.connection_timeout, Duration::from_secs(2));
    assert_eq!(config.http_timeout, Duration::from_secs(4));
    assert_eq!(config.dns_servers, vec!["9.9.9.9".to_string()]);
    assert_eq!(config.http_hosts, vec!["https://example.com".to_string()]);
    assert_eq!(config.breaker_failure_threshold, 5);
    // Unspecified fields fall back to defaults.
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.breaker_reset_timeout, Duration::from_secs(30));
    assert_eq!(config.dns_test_domains.len(), 3);
}

#[test]
fn test_config_round_trips_through_json() {
    let config = ConnectivityConfig {
        connection_timeout: Duration::from_millis(1500),
        dns_servers: vec!["1.1.1.1:5353".to_string()],
        retry: RetryConfig {
            max_attempts: 7,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            multiplier: 1.5,
        },
        ..Default::default()
    };

    let encoded = serde_json::to_string(&config).unwrap();
    let decoded: ConnectivityConfig = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded.connection_timeout, Duration::from_millis(1500));
    assert_eq!(decoded.dns_servers, config.dns_servers);
    assert_eq!(decoded.retry.max_attempts, 7);
    assert!((decoded.retry.multiplier - 1.5).abs() < f64::EPSILON);
}

#[test]
fn test_normalize_dns_server_variants() {
    assert_eq!(normalize_dns_server("8.8.4.4"), "8.8.4.4:53");
    assert_eq!(normalize_dns_server("8.8.4.4:5300"), "8.8.4.4:5300");
    assert_eq!(normalize_dns_server("resolver.internal"), "resolver.internal:53");
    assert_eq!(
        normalize_dns_server("2001:4860:4860::8888"),
        "[2001:4860:4860::8888]:53"
    );
}

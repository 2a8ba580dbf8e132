//! Configuration loading tests
//!
//! Every test that touches the process environment is `#[serial]`, since
//! environment variables are shared by all test threads.

use lighter_resilience::config::*;
use serial_test::serial;
use std::env;

mod utils {
    /// Clean up environment variables with the LIGHTER_RESILIENCE prefix
    pub fn clean_env_vars() {
        let keys: Vec<String> = std::env::vars()
            .filter(|(k, _)| k.starts_with("LIGHTER_RESILIENCE"))
            .map(|(k, _)| k)
            .collect();

        for key in keys {
            unsafe { std::env::remove_var(&key) };
        }
        unsafe { std::env::remove_var("APP_ENV") };
    }
}

// =============================================================================
// Loading
// =============================================================================

#[test]
#[serial]
fn test_load_default_config_success() {
    utils::clean_env_vars();

    let config = load();
    assert!(config.is_ok(), "Failed to load default configuration: {:?}", config.err());
    let config = config.unwrap();

    assert_eq!(config.app.name, "lighter-resilience");
    assert_eq!(config.app.environment, "development");

    assert_eq!(config.rate_limit.capacity, 100.0);
    assert_eq!(config.rate_limit.refill_rate_per_second, 50.0);
    assert_eq!(config.rate_limit.idle_ttl, 600);

    assert_eq!(config.circuit_breaker.window_size, 20);
    assert_eq!(config.circuit_breaker.failure_rate_threshold, 50.0);
    assert_eq!(config.circuit_breaker.wait_duration_in_open_ms, 30_000);
    assert_eq!(config.circuit_breaker.permitted_calls_in_half_open, 3);
    assert_eq!(config.circuit_breaker.call_timeout(), None);

    assert_eq!(config.idempotency.ttl, 86_400);
    assert_eq!(config.idempotency.failed_policy, FailedPolicy::Retry);
    assert_eq!(config.idempotency.backend, LedgerBackend::Local);
    assert_eq!(config.idempotency.redis.prefix, "lighter-resilience");

    assert_eq!(config.invoker.limit_scope, LimitScope::Dependency);
    assert_eq!(config.invoker.in_progress, InProgressPolicy::Wait);
    assert!(config.metrics.enabled);
}

#[test]
#[serial]
fn test_production_environment_overrides() {
    utils::clean_env_vars();
    unsafe { env::set_var("APP_ENV", "production") };

    let config = load().unwrap();

    assert_eq!(config.app.environment, "production");
    assert_eq!(config.circuit_breaker.window_size, 50);
    assert_eq!(
        config.circuit_breaker.call_timeout(),
        Some(std::time::Duration::from_secs(10))
    );
    assert_eq!(config.idempotency.backend, LedgerBackend::Local);
    // Values not overridden keep their defaults
    assert_eq!(config.rate_limit.capacity, 100.0);

    utils::clean_env_vars();
}

#[test]
#[serial]
fn test_unknown_environment_falls_back_to_defaults() {
    utils::clean_env_vars();
    unsafe { env::set_var("APP_ENV", "nonexistent") };

    let config = load().unwrap();
    assert_eq!(config.app.environment, "development");
    assert_eq!(config.circuit_breaker.window_size, 20);

    utils::clean_env_vars();
}

#[test]
#[serial]
fn test_env_vars_override_files() {
    utils::clean_env_vars();
    unsafe {
        env::set_var("APP_ENV", "production");
        env::set_var("LIGHTER_RESILIENCE__RATE_LIMIT__CAPACITY", "10");
        env::set_var("LIGHTER_RESILIENCE__CIRCUIT_BREAKER__WINDOW_SIZE", "7");
        env::set_var("LIGHTER_RESILIENCE__INVOKER__IN_PROGRESS", "reject");
        env::set_var("LIGHTER_RESILIENCE__IDEMPOTENCY__FAILED_POLICY", "replay");
        env::set_var("LIGHTER_RESILIENCE__IDEMPOTENCY__BACKEND", "redis");
    };

    let config = load().unwrap();

    assert_eq!(config.rate_limit.capacity, 10.0);
    // Environment variables win over config/production.toml
    assert_eq!(config.circuit_breaker.window_size, 7);
    assert_eq!(config.invoker.in_progress, InProgressPolicy::Reject);
    assert_eq!(config.idempotency.failed_policy, FailedPolicy::Replay);
    assert_eq!(config.idempotency.backend, LedgerBackend::Redis);

    utils::clean_env_vars();
}

#[tokio::test]
#[serial]
async fn test_production_settings_build_an_invoker() {
    utils::clean_env_vars();
    unsafe { env::set_var("APP_ENV", "production") };

    let settings = load().unwrap();
    let invoker: lighter_resilience::ResilientInvoker<u32, String> =
        lighter_resilience::ResilientInvoker::from_config(
            &settings,
            std::sync::Arc::new(lighter_resilience::SystemClock),
            lighter_resilience::resilience::errors_are_failures(),
        )
        .await
        .unwrap();
    assert_eq!(invoker.ledger().config().backend, LedgerBackend::Local);

    utils::clean_env_vars();
}

#[test]
#[serial]
fn test_invalid_env_value_fails_validation() {
    utils::clean_env_vars();
    unsafe { env::set_var("LIGHTER_RESILIENCE__CIRCUIT_BREAKER__FAILURE_RATE_THRESHOLD", "150") };

    let result = load();
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    utils::clean_env_vars();
}

#[test]
#[serial]
fn test_unknown_policy_fails_to_load() {
    utils::clean_env_vars();
    unsafe { env::set_var("LIGHTER_RESILIENCE__IDEMPOTENCY__FAILED_POLICY", "sometimes") };

    let result = load();
    assert!(matches!(result, Err(ConfigError::Load(_))));

    utils::clean_env_vars();
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_rate_limit_validation() {
    assert!(RateLimitConfig::new(5.0, 1.0).validate().is_ok());
    assert!(RateLimitConfig::new(0.5, 1.0).validate().is_err());
    assert!(RateLimitConfig::new(f64::INFINITY, 1.0).validate().is_err());
    assert!(RateLimitConfig::new(5.0, 0.0).validate().is_err());
    assert!(RateLimitConfig::new(5.0, f64::NAN).validate().is_err());
}

#[test]
fn test_circuit_breaker_validation() {
    let valid = CircuitBreakerConfig::default();
    assert!(valid.validate().is_ok());

    for invalid in [
        CircuitBreakerConfig { window_size: 0, ..valid.clone() },
        CircuitBreakerConfig { failure_rate_threshold: -1.0, ..valid.clone() },
        CircuitBreakerConfig { failure_rate_threshold: 100.5, ..valid.clone() },
        CircuitBreakerConfig { wait_duration_in_open_ms: 0, ..valid.clone() },
        CircuitBreakerConfig { permitted_calls_in_half_open: 0, ..valid.clone() },
    ] {
        assert!(invalid.validate().is_err(), "{:?} should be rejected", invalid);
    }
}

#[test]
fn test_invoker_validation() {
    assert!(InvokerConfig::default().validate().is_ok());

    let no_poll = InvokerConfig {
        poll_interval_ms: 0,
        ..InvokerConfig::default()
    };
    assert!(no_poll.validate().is_err());

    // Polling settings are irrelevant when duplicates are rejected
    let reject = InvokerConfig {
        in_progress: InProgressPolicy::Reject,
        poll_interval_ms: 0,
        ..InvokerConfig::default()
    };
    assert!(reject.validate().is_ok());
}

#[test]
fn test_settings_with_defaults_are_valid() {
    let settings = ResilienceSettings::with_defaults();
    assert!(settings.validate().is_ok());
}

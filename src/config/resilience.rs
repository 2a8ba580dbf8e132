use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ConfigError, Validate, WithDefaults};

/// Token bucket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum number of tokens a bucket can hold
    #[serde(default = "default_rate_limit_capacity")]
    pub capacity: f64,
    /// Tokens added to a bucket per elapsed second
    #[serde(default = "default_rate_limit_refill_rate")]
    pub refill_rate_per_second: f64,
    /// Seconds a bucket may stay untouched before it can be evicted (0 = never)
    #[serde(default = "default_rate_limit_idle_ttl")]
    pub idle_ttl: u64,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of outcomes kept in the sliding window
    #[serde(default = "default_circuit_breaker_window_size")]
    pub window_size: usize,
    /// Failure percentage (0-100) of a full window that opens the circuit
    #[serde(default = "default_circuit_breaker_failure_rate_threshold")]
    pub failure_rate_threshold: f64,
    /// Cooldown in milliseconds before an open circuit admits trial calls
    #[serde(default = "default_circuit_breaker_wait_duration_in_open")]
    pub wait_duration_in_open_ms: u64,
    /// Number of trial calls admitted while half-open
    #[serde(default = "default_circuit_breaker_permitted_calls_in_half_open")]
    pub permitted_calls_in_half_open: u32,
    /// Per-call timeout in milliseconds (0 = no timeout)
    #[serde(default = "default_circuit_breaker_call_timeout")]
    pub call_timeout_ms: u64,
}

impl RateLimitConfig {
    pub fn new(capacity: f64, refill_rate_per_second: f64) -> Self {
        Self {
            capacity,
            refill_rate_per_second,
            idle_ttl: default_rate_limit_idle_ttl(),
        }
    }

    pub fn idle_ttl(&self) -> Option<Duration> {
        (self.idle_ttl > 0).then(|| Duration::from_secs(self.idle_ttl))
    }
}

impl CircuitBreakerConfig {
    pub fn wait_duration_in_open(&self) -> Duration {
        Duration::from_millis(self.wait_duration_in_open_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }
}

// Default functions for RateLimitConfig
fn default_rate_limit_capacity() -> f64 {
    100.0
}

fn default_rate_limit_refill_rate() -> f64 {
    50.0
}

fn default_rate_limit_idle_ttl() -> u64 {
    600 // 10 minutes
}

// Default functions for CircuitBreakerConfig
fn default_circuit_breaker_window_size() -> usize {
    20
}

fn default_circuit_breaker_failure_rate_threshold() -> f64 {
    50.0
}

fn default_circuit_breaker_wait_duration_in_open() -> u64 {
    30_000
}

fn default_circuit_breaker_permitted_calls_in_half_open() -> u32 {
    3
}

fn default_circuit_breaker_call_timeout() -> u64 {
    0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_rate_limit_capacity(),
            refill_rate_per_second: default_rate_limit_refill_rate(),
            idle_ttl: default_rate_limit_idle_ttl(),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: default_circuit_breaker_window_size(),
            failure_rate_threshold: default_circuit_breaker_failure_rate_threshold(),
            wait_duration_in_open_ms: default_circuit_breaker_wait_duration_in_open(),
            permitted_calls_in_half_open: default_circuit_breaker_permitted_calls_in_half_open(),
            call_timeout_ms: default_circuit_breaker_call_timeout(),
        }
    }
}

impl Validate for RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.capacity.is_finite() || self.capacity < 1.0 {
            return Err(ConfigError::Validation(
                "rate_limit.capacity must be a finite number >= 1".to_string(),
            ));
        }
        if !self.refill_rate_per_second.is_finite() || self.refill_rate_per_second <= 0.0 {
            return Err(ConfigError::Validation(
                "rate_limit.refill_rate_per_second must be a finite number > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Validate for CircuitBreakerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::Validation(
                "circuit_breaker.window_size must be > 0".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.failure_rate_threshold) {
            return Err(ConfigError::Validation(
                "circuit_breaker.failure_rate_threshold must be within 0-100".to_string(),
            ));
        }
        if self.wait_duration_in_open_ms == 0 {
            return Err(ConfigError::Validation(
                "circuit_breaker.wait_duration_in_open_ms must be > 0".to_string(),
            ));
        }
        if self.permitted_calls_in_half_open == 0 {
            return Err(ConfigError::Validation(
                "circuit_breaker.permitted_calls_in_half_open must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl WithDefaults for RateLimitConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}

impl WithDefaults for CircuitBreakerConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}

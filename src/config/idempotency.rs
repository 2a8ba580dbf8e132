use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ConfigError, Validate, WithDefaults};

/// Idempotency ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// Seconds a record stays visible after its last state change
    #[serde(default = "default_idempotency_ttl")]
    pub ttl: u64,
    /// What `begin` does when it finds a failed record
    #[serde(default = "default_idempotency_failed_policy")]
    pub failed_policy: FailedPolicy,
    /// Seconds between background purges of expired records (0 = no sweeper)
    #[serde(default = "default_idempotency_sweep_interval")]
    pub sweep_interval: u64,
    /// Where records are kept
    #[serde(default = "default_idempotency_backend")]
    pub backend: LedgerBackend,
    /// Redis settings, used when `backend = "redis"`
    #[serde(default = "RedisLedgerConfig::default")]
    pub redis: RedisLedgerConfig,
}

/// Handling of a record whose previous attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailedPolicy {
    /// Replace the failed record and let the caller execute again
    Retry,
    /// Report the stored failure without executing again
    Replay,
}

/// Ledger storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// In-process sharded map
    Local,
    /// Shared Redis instance (requires the `redis-store` feature)
    Redis,
}

/// Redis ledger store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisLedgerConfig {
    /// Connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Key prefix for namespace isolation
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_connection_timeout")]
    pub connection_timeout_ms: u64,
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval > 0).then(|| Duration::from_secs(self.sweep_interval))
    }
}

impl RedisLedgerConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

// Default functions for IdempotencyConfig
fn default_idempotency_ttl() -> u64 {
    86_400 // 24 hours
}

fn default_idempotency_failed_policy() -> FailedPolicy {
    FailedPolicy::Retry
}

fn default_idempotency_sweep_interval() -> u64 {
    60
}

fn default_idempotency_backend() -> LedgerBackend {
    LedgerBackend::Local
}

// Default functions for RedisLedgerConfig
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_redis_prefix() -> String {
    "lighter-resilience".to_string()
}

fn default_redis_connection_timeout() -> u64 {
    3_000
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: default_idempotency_ttl(),
            failed_policy: default_idempotency_failed_policy(),
            sweep_interval: default_idempotency_sweep_interval(),
            backend: default_idempotency_backend(),
            redis: RedisLedgerConfig::default(),
        }
    }
}

impl Default for RedisLedgerConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: default_redis_prefix(),
            connection_timeout_ms: default_redis_connection_timeout(),
        }
    }
}

impl Validate for IdempotencyConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl == 0 {
            return Err(ConfigError::Validation("idempotency.ttl must be > 0".to_string()));
        }
        if self.backend == LedgerBackend::Redis {
            self.redis.validate()?;
        }
        Ok(())
    }
}

impl Validate for RedisLedgerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Validation(
                "idempotency.redis.url cannot be empty".to_string(),
            ));
        }
        if self.prefix.is_empty() {
            return Err(ConfigError::Validation(
                "idempotency.redis.prefix cannot be empty".to_string(),
            ));
        }
        if self.connection_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "idempotency.redis.connection_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl WithDefaults for IdempotencyConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ConfigError, Validate, WithDefaults};

/// Resilient invoker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// Which key the rate limiter buckets calls by
    #[serde(default = "default_invoker_limit_scope")]
    pub limit_scope: LimitScope,
    /// What a caller does when the same operation is already running
    #[serde(default = "default_invoker_in_progress")]
    pub in_progress: InProgressPolicy,
    /// Milliseconds between ledger polls while waiting on a duplicate
    #[serde(default = "default_invoker_poll_interval")]
    pub poll_interval_ms: u64,
    /// Maximum milliseconds to wait on a duplicate before giving up
    #[serde(default = "default_invoker_max_wait")]
    pub max_wait_ms: u64,
}

/// Rate limiter key selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScope {
    /// One bucket per downstream dependency
    Dependency,
    /// One bucket per client key
    Client,
}

/// Behaviour when `begin` reports an operation already in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InProgressPolicy {
    /// Poll the ledger until the first attempt resolves
    Wait,
    /// Fail fast with `DuplicateInProgress`
    Reject,
}

impl InvokerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

fn default_invoker_limit_scope() -> LimitScope {
    LimitScope::Dependency
}

fn default_invoker_in_progress() -> InProgressPolicy {
    InProgressPolicy::Wait
}

fn default_invoker_poll_interval() -> u64 {
    25
}

fn default_invoker_max_wait() -> u64 {
    5_000
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            limit_scope: default_invoker_limit_scope(),
            in_progress: default_invoker_in_progress(),
            poll_interval_ms: default_invoker_poll_interval(),
            max_wait_ms: default_invoker_max_wait(),
        }
    }
}

impl Validate for InvokerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.in_progress == InProgressPolicy::Wait {
            if self.poll_interval_ms == 0 {
                return Err(ConfigError::Validation(
                    "invoker.poll_interval_ms must be > 0 when waiting on duplicates".to_string(),
                ));
            }
            if self.max_wait_ms < self.poll_interval_ms {
                return Err(ConfigError::Validation(
                    "invoker.max_wait_ms must be >= poll_interval_ms".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl WithDefaults for InvokerConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}

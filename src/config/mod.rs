pub mod app;
pub mod idempotency;
pub mod invoker;
pub mod resilience;

pub use app::{AppMetadata, MetricsConfig, ResilienceSettings};
pub use idempotency::{FailedPolicy, IdempotencyConfig, LedgerBackend, RedisLedgerConfig};
pub use invoker::{InProgressPolicy, InvokerConfig, LimitScope};
pub use resilience::{CircuitBreakerConfig, RateLimitConfig};

/// Errors raised while loading or validating configuration
///
/// These are fatal at startup and never produced on the call path.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration source could not be read or deserialized
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    /// A value is outside its permitted range
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Configuration sections that can check their own invariants
pub trait Validate {
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Configuration sections with a complete set of defaults
pub trait WithDefaults {
    fn with_defaults() -> Self;
}

/// Load the configuration from files and environment variables
pub fn load() -> Result<ResilienceSettings, ConfigError> {
    app::load_config()
}

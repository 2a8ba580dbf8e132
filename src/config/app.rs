use serde::{Deserialize, Serialize};

use super::{
    CircuitBreakerConfig, ConfigError, IdempotencyConfig, InvokerConfig, RateLimitConfig, Validate,
    WithDefaults,
};

/// Top-level configuration that aggregates all config modules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceSettings {
    /// Application metadata
    #[serde(default = "AppMetadata::default")]
    pub app: AppMetadata,
    /// Token bucket rate limiting
    #[serde(default = "RateLimitConfig::default")]
    pub rate_limit: RateLimitConfig,
    /// Circuit breaker defaults applied to every dependency
    #[serde(default = "CircuitBreakerConfig::default")]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Idempotency ledger (TTL, failure policy, backend)
    #[serde(default = "IdempotencyConfig::default")]
    pub idempotency: IdempotencyConfig,
    /// Invoker composition settings
    #[serde(default = "InvokerConfig::default")]
    pub invoker: InvokerConfig,
    /// Metrics (Prometheus recorder)
    #[serde(default = "MetricsConfig::default")]
    pub metrics: MetricsConfig,
}

/// Application metadata configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Name of the embedding service
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Deployment environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Attach `service` and `environment` labels to every metric
    #[serde(default = "default_metrics_global_labels")]
    pub global_labels: bool,
}

fn default_app_name() -> String {
    "lighter-resilience".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_global_labels() -> bool {
    true
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            global_labels: default_metrics_global_labels(),
        }
    }
}

impl Validate for AppMetadata {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Validation("app.name cannot be empty".to_string()));
        }
        if self.environment.is_empty() {
            return Err(ConfigError::Validation("app.environment cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl Validate for ResilienceSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        self.app.validate()?;
        self.rate_limit.validate()?;
        self.circuit_breaker.validate()?;
        self.idempotency.validate()?;
        self.invoker.validate()?;
        Ok(())
    }
}

impl WithDefaults for ResilienceSettings {
    fn with_defaults() -> Self {
        Self {
            app: AppMetadata::default(),
            rate_limit: RateLimitConfig::with_defaults(),
            circuit_breaker: CircuitBreakerConfig::with_defaults(),
            idempotency: IdempotencyConfig::with_defaults(),
            invoker: InvokerConfig::with_defaults(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Load configuration from files and environment variables
///
/// Configuration loading follows this precedence (highest to lowest):
/// 1. Environment variables: LIGHTER_RESILIENCE__RATE_LIMIT__CAPACITY=10
/// 2. config/local.toml (git-ignored, developer overrides)
/// 3. config/{APP_ENV}.toml (development/staging/production)
/// 4. config/default.toml (base defaults)
pub fn load_config() -> Result<ResilienceSettings, ConfigError> {
    use config::{Config, Environment, File};

    let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

    let config = Config::builder()
        // Layer 1: Base defaults
        .add_source(File::with_name("config/default").required(false))
        // Layer 2: Environment-specific overrides
        .add_source(File::with_name(&format!("config/{}", env)).required(false))
        // Layer 3: Local developer overrides (git-ignored)
        .add_source(File::with_name("config/local").required(false))
        // Layer 4: Environment variables (highest precedence)
        .add_source(
            Environment::with_prefix("LIGHTER_RESILIENCE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let settings: ResilienceSettings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

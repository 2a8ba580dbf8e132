//! Rate limiting, circuit breaking and idempotent replay for outbound
//! dependency calls.
//!
//! The three components can be used on their own or composed behind a
//! [`ResilientInvoker`]:
//!
//! ```rust
//! use lighter_resilience::clock::SystemClock;
//! use lighter_resilience::config::{self, WithDefaults};
//! use lighter_resilience::resilience::errors_are_failures;
//! use lighter_resilience::ResilientInvoker;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let settings = config::ResilienceSettings::with_defaults();
//! let invoker: ResilientInvoker<u64, std::io::Error> = ResilientInvoker::from_config(
//!     &settings,
//!     Arc::new(SystemClock),
//!     errors_are_failures(),
//! )
//! .await?;
//!
//! let order_id = invoker
//!     .execute("client-7", "create-order-42", "orders-db", || async { Ok(42) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod invoker;
pub mod metrics;
pub mod rate_limit;
pub mod resilience;

// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::InvokeError;
pub use idempotency::{BeginOutcome, IdempotencyLedger, LedgerKey, LedgerStore, LocalLedgerStore};
pub use invoker::ResilientInvoker;
pub use metrics::ResilienceMetrics;
pub use rate_limit::RateLimiter;
pub use resilience::{CircuitBreaker, CircuitBreakerError, CircuitBreakerRegistry, CircuitState};

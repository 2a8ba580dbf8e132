//! Circuit breakers guarding named downstream dependencies
//!
//! # Example
//!
//! ```rust
//! use lighter_resilience::clock::SystemClock;
//! use lighter_resilience::config::CircuitBreakerConfig;
//! use lighter_resilience::resilience::{CircuitBreakerRegistry, errors_are_failures};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = CircuitBreakerRegistry::new(
//!     CircuitBreakerConfig::default(),
//!     Arc::new(SystemClock),
//!     errors_are_failures::<(), std::io::Error>(),
//! )?;
//!
//! let result = registry
//!     .get("payment-api")
//!     .call(|| async { Ok::<_, std::io::Error>(()) })
//!     .await;
//! # Ok(())
//! # }
//! ```

mod circuit_breaker;
mod registry;
mod sliding_window;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerSnapshot, CircuitState, FailureClassifier,
    errors_are_failures,
};
pub use registry::CircuitBreakerRegistry;
pub use sliding_window::SlidingWindow;

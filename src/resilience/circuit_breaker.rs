//! Circuit Breaker Pattern Implementation
//!
//! The circuit breaker tracks the outcome of calls to one dependency over a
//! sliding window and fails fast while that dependency is presumed unhealthy.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐
//! │ Closed  │ ◄──────────────────────────┐
//! │ (Normal)│                            │
//! └────┬────┘                            │
//!      │ window full and                 │ permitted trial calls
//!      │ failure rate >= threshold       │ all succeeded
//!      ▼                                 │
//! ┌─────────┐  wait_duration_in_open ┌───┴───────┐
//! │  Open   │───────────────────────►│ HalfOpen  │
//! │(Failing)│                        │ (Testing) │
//! └─────────┘◄───────────────────────└───────────┘
//!                any trial failure
//! ```
//!
//! Trial calls consume the half-open budget when they are dispatched, so
//! concurrent callers beyond the budget are rejected exactly like in Open.
//!
//! # Example
//!
//! ```rust
//! use lighter_resilience::clock::SystemClock;
//! use lighter_resilience::config::CircuitBreakerConfig;
//! use lighter_resilience::resilience::{CircuitBreaker, errors_are_failures};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cb = CircuitBreaker::new(
//!     "payment-service",
//!     CircuitBreakerConfig::default(),
//!     Arc::new(SystemClock),
//!     errors_are_failures::<String, std::io::Error>(),
//! )?;
//!
//! let result = cb.call(|| async {
//!     Ok::<String, std::io::Error>("charged".to_string())
//! }).await;
//!
//! match result {
//!     Ok(response) => println!("Success: {:?}", response),
//!     Err(e) => println!("Failed: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::sliding_window::SlidingWindow;
use crate::clock::Clock;
use crate::config::{CircuitBreakerConfig, ConfigError, Validate};

/// Decides whether a call outcome counts against the dependency's health
///
/// Not every error is an infrastructure failure: a "not found" answer from a
/// healthy dependency should usually be classified as a success.
pub type FailureClassifier<T, E> = Arc<dyn Fn(&Result<T, E>) -> bool + Send + Sync>;

/// Classifier that counts every `Err` as a failure and every `Ok` as a success
pub fn errors_are_failures<T: 'static, E: 'static>() -> FailureClassifier<T, E> {
    Arc::new(|result: &Result<T, E>| result.is_err())
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, allowing all requests through
    Closed,
    /// Failing state, rejecting all requests until the cooldown expires
    Open,
    /// Testing state, allowing a limited number of trial requests
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker error
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was not invoked
    #[error("Circuit breaker is open for {name}")]
    Open { name: String },
    /// The operation did not finish within the configured call timeout
    #[error("Call through circuit breaker {name} timed out after {after:?}")]
    Timeout { name: String, after: Duration },
    /// The underlying operation failed
    #[error("Operation failed: {0}")]
    Inner(#[source] E),
}

/// Lifetime counters, independent of the sliding window
#[derive(Debug, Default)]
struct CircuitBreakerStats {
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreakerStats {
    fn record(&self, failed: bool) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_rejection(&self) {
        self.total_rejections.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    /// Failure percentage of the outcomes currently in the window
    pub failure_rate: f64,
    pub window_len: usize,
    /// Trial calls still available while half-open
    pub trial_budget: u32,
    /// Time left before an open breaker admits a trial call
    pub open_remaining: Option<Duration>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    window: SlidingWindow,
    opened_at: Option<Instant>,
    trial_budget: u32,
    trial_successes: u32,
    /// Bumped on every transition so late outcomes from an earlier state are ignored
    generation: u64,
}

/// Admission ticket for one dispatched call
#[derive(Debug, Clone, Copy)]
struct Permit {
    generation: u64,
}

/// Sliding-window circuit breaker for a single dependency
///
/// Every state mutation happens under one mutex that is never held across an
/// `.await`, so the breaker can be shared freely between tasks behind an `Arc`.
pub struct CircuitBreaker<T, E> {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    classifier: FailureClassifier<T, E>,
    inner: Mutex<BreakerState>,
    stats: CircuitBreakerStats,
}

impl<T, E> CircuitBreaker<T, E> {
    /// Create a breaker; the failure classifier is mandatory
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        classifier: FailureClassifier<T, E>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(name.into(), config, clock, classifier))
    }

    pub(crate) fn from_validated(
        name: String,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        classifier: FailureClassifier<T, E>,
    ) -> Self {
        Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                window: SlidingWindow::new(config.window_size),
                opened_at: None,
                trial_budget: 0,
                trial_successes: 0,
                generation: 0,
            }),
            name,
            config,
            clock,
            classifier,
            stats: CircuitBreakerStats::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the circuit breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state
    ///
    /// An open breaker whose cooldown has elapsed still reports `Open` until
    /// the next call moves it to `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn total_calls(&self) -> u64 {
        self.stats.total_calls.load(Ordering::Relaxed)
    }

    pub fn total_failures(&self) -> u64 {
        self.stats.total_failures.load(Ordering::Relaxed)
    }

    pub fn total_rejections(&self) -> u64 {
        self.stats.total_rejections.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = self.clock.now();
        let inner = self.lock();
        let open_remaining = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                (opened_at + self.config.wait_duration_in_open()).saturating_duration_since(now),
            ),
            _ => None,
        };

        CircuitBreakerSnapshot {
            state: inner.state,
            failure_rate: inner.window.failure_rate(),
            window_len: inner.window.len(),
            trial_budget: inner.trial_budget,
            open_remaining,
            total_calls: self.total_calls(),
            total_failures: self.total_failures(),
            total_rejections: self.total_rejections(),
        }
    }

    /// Execute an operation protected by the circuit breaker
    ///
    /// The operation is only constructed and awaited when the breaker admits
    /// the call. Its own error is returned unchanged inside
    /// [`CircuitBreakerError::Inner`]; the breaker never retries. If the
    /// returned future is dropped after dispatch, the call counts as a failure.
    pub async fn call<F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.acquire() else {
            self.stats.record_rejection();
            crate::metrics::record_breaker_call(&self.name, "rejected");
            return Err(CircuitBreakerError::Open {
                name: self.name.clone(),
            });
        };

        let mut guard = CallGuard {
            breaker: self,
            permit: Some(permit),
        };

        let result = match self.config.call_timeout() {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => {
                    guard.finish(true, "timeout");
                    return Err(CircuitBreakerError::Timeout {
                        name: self.name.clone(),
                        after: limit,
                    });
                }
            },
            None => operation().await,
        };

        let failed = (self.classifier)(&result);
        guard.finish(failed, if failed { "failure" } else { "success" });

        result.map_err(CircuitBreakerError::Inner)
    }

    /// Manually force the circuit breaker to Closed with an empty window
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed, now);
        } else {
            inner.window.clear();
        }
        tracing::info!(
            circuit_breaker = %self.name,
            "Circuit breaker manually reset to Closed"
        );
    }

    fn acquire(&self) -> Option<Permit> {
        let now = self.clock.now();
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let cooled_down = inner
                .opened_at
                .is_none_or(|opened_at| now >= opened_at + self.config.wait_duration_in_open());
            if !cooled_down {
                return None;
            }
            self.transition(&mut inner, CircuitState::HalfOpen, now);
        }

        match inner.state {
            CircuitState::Closed => Some(Permit {
                generation: inner.generation,
            }),
            CircuitState::HalfOpen if inner.trial_budget > 0 => {
                inner.trial_budget -= 1;
                Some(Permit {
                    generation: inner.generation,
                })
            }
            _ => None,
        }
    }

    fn record(&self, permit: Permit, failed: bool) {
        self.stats.record(failed);

        let now = self.clock.now();
        let mut inner = self.lock();

        if inner.generation != permit.generation {
            tracing::trace!(
                circuit_breaker = %self.name,
                failed,
                "Ignoring outcome admitted before the last transition"
            );
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.window.record(failed);
                if inner.window.is_full()
                    && inner.window.failure_rate() >= self.config.failure_rate_threshold
                {
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                if failed {
                    self.transition(&mut inner, CircuitState::Open, now);
                } else {
                    inner.trial_successes += 1;
                    if inner.trial_successes >= self.config.permitted_calls_in_half_open {
                        self.transition(&mut inner, CircuitState::Closed, now);
                    }
                }
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState, now: Instant) {
        let from = inner.state;
        let failure_rate = inner.window.failure_rate();

        inner.state = to;
        inner.generation += 1;
        inner.trial_successes = 0;

        match to {
            CircuitState::Open => {
                inner.opened_at = Some(now);
                inner.trial_budget = 0;
                tracing::warn!(
                    circuit_breaker = %self.name,
                    state = %format_args!("{} -> {}", from, to),
                    failure_rate,
                    failure_rate_threshold = self.config.failure_rate_threshold,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.trial_budget = self.config.permitted_calls_in_half_open;
                tracing::info!(
                    circuit_breaker = %self.name,
                    state = %format_args!("{} -> {}", from, to),
                    trial_budget = inner.trial_budget,
                    "Circuit breaker transitioning to HalfOpen"
                );
            }
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.trial_budget = 0;
                inner.window.clear();
                tracing::info!(
                    circuit_breaker = %self.name,
                    state = %format_args!("{} -> {}", from, to),
                    "Circuit breaker closed"
                );
            }
        }

        crate::metrics::record_breaker_transition(&self.name, from.as_str(), to.as_str());
    }
}

/// Records the outcome of a dispatched call exactly once, counting a call
/// whose future was dropped before completion as a failure
struct CallGuard<'a, T, E> {
    breaker: &'a CircuitBreaker<T, E>,
    permit: Option<Permit>,
}

impl<T, E> CallGuard<'_, T, E> {
    fn finish(&mut self, failed: bool, outcome: &'static str) {
        if let Some(permit) = self.permit.take() {
            self.breaker.record(permit, failed);
            crate::metrics::record_breaker_call(&self.breaker.name, outcome);
        }
    }
}

impl<T, E> Drop for CallGuard<'_, T, E> {
    fn drop(&mut self) {
        if self.permit.is_some() {
            tracing::debug!(
                circuit_breaker = %self.breaker.name,
                "Call cancelled before completion, counting as failure"
            );
            self.finish(true, "cancelled");
        }
    }
}

impl<T, E> fmt::Debug for CircuitBreaker<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("total_calls", &self.total_calls())
            .field("total_failures", &self.total_failures())
            .field("config", &self.config)
            .finish()
    }
}

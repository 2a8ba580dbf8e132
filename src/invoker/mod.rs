//! # Resilient Invoker
//!
//! A single protected-call entry point composing the idempotency ledger, the
//! rate limiter and the per-dependency circuit breakers:
//!
//! ```text
//! execute ─► ledger.begin ─► limiter.admit ─► breaker.call(work) ─► ledger.complete / fail
//!               │                 │                  │
//!               │ replay          │ rejected         │ open
//!               ▼                 ▼                  ▼
//!          stored result    roll back entry    roll back entry
//! ```
//!
//! A ledger entry only survives for work that was actually attempted. If the
//! future returned by [`ResilientInvoker::execute`] is dropped while the work
//! is running, the entry is resolved as failed on the runtime.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use anyhow::Context;

use crate::clock::Clock;
use crate::config::{
    ConfigError, InProgressPolicy, InvokerConfig, LimitScope, ResilienceSettings, Validate,
};
use crate::error::InvokeError;
use crate::idempotency::{BeginOutcome, IdempotencyLedger, LedgerKey};
use crate::metrics::ResilienceMetrics;
use crate::rate_limit::RateLimiter;
use crate::resilience::{CircuitBreakerError, CircuitBreakerRegistry, FailureClassifier};

/// Failure message stored for work whose caller went away mid-flight
pub const CANCELLED: &str = "cancelled";

/// Payload stored for a success whose value could not be encoded
///
/// No JSON document is empty, so this never collides with a real result.
const UNREPLAYABLE: &[u8] = b"";

/// Guards outbound dependency calls with deduplication, rate limiting and
/// circuit breaking
///
/// Results are stored in the ledger as JSON so a retried operation can be
/// answered without invoking the work again.
pub struct ResilientInvoker<T, E> {
    ledger: Arc<IdempotencyLedger>,
    limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakerRegistry<T, E>>,
    config: InvokerConfig,
    metrics: Option<ResilienceMetrics>,
}

impl<T, E> ResilientInvoker<T, E>
where
    T: Serialize + DeserializeOwned,
    E: Display,
{
    pub fn new(
        ledger: Arc<IdempotencyLedger>,
        limiter: Arc<RateLimiter>,
        breakers: Arc<CircuitBreakerRegistry<T, E>>,
        config: InvokerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            ledger,
            limiter,
            breakers,
            config,
            metrics: None,
        })
    }

    /// Build every component from loaded settings
    ///
    /// `classifier` becomes the default failure classifier of the breaker
    /// registry. The Prometheus recorder is installed when `metrics.enabled`
    /// is set. Must be called from within a tokio runtime.
    pub async fn from_config(
        settings: &ResilienceSettings,
        clock: Arc<dyn Clock>,
        classifier: FailureClassifier<T, E>,
    ) -> anyhow::Result<Self> {
        settings.validate()?;

        let limiter = RateLimiter::new(settings.rate_limit.clone(), Arc::clone(&clock))?;
        let breakers = CircuitBreakerRegistry::new(
            settings.circuit_breaker.clone(),
            Arc::clone(&clock),
            classifier,
        )?;
        let ledger = IdempotencyLedger::connect(settings.idempotency.clone(), clock).await?;
        let metrics = ResilienceMetrics::from_settings(settings)?;

        tracing::info!(
            service = %settings.app.name,
            environment = %settings.app.environment,
            limit_scope = ?settings.invoker.limit_scope,
            in_progress = ?settings.invoker.in_progress,
            metrics = metrics.is_some(),
            "Resilient invoker initialized"
        );

        let mut invoker = Self::new(
            Arc::new(ledger),
            Arc::new(limiter),
            Arc::new(breakers),
            settings.invoker.clone(),
        )?;
        invoker.metrics = metrics;
        Ok(invoker)
    }

    pub fn ledger(&self) -> &Arc<IdempotencyLedger> {
        &self.ledger
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry<T, E>> {
        &self.breakers
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Recorder installed by [`ResilientInvoker::from_config`], if any
    pub fn metrics(&self) -> Option<&ResilienceMetrics> {
        self.metrics.as_ref()
    }

    /// Run `work` against `dependency` at most once per
    /// `(client_key, operation_id)`
    ///
    /// A repeated call for an operation that already succeeded returns the
    /// stored result without invoking `work`.
    pub async fn execute<F, Fut>(
        &self,
        client_key: &str,
        operation_id: &str,
        dependency: &str,
        work: F,
    ) -> Result<T, InvokeError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = self.run(client_key, operation_id, dependency, work).await;

        match &result {
            Ok((_, outcome)) => crate::metrics::record_execution(*outcome),
            Err(e) => crate::metrics::record_execution(e.outcome()),
        }
        result.map(|(value, _)| value)
    }

    #[tracing::instrument(
        skip_all,
        fields(client_key = %client_key, operation_id = %operation_id, dependency = %dependency)
    )]
    async fn run<F, Fut>(
        &self,
        client_key: &str,
        operation_id: &str,
        dependency: &str,
        work: F,
    ) -> Result<(T, &'static str), InvokeError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = LedgerKey::new(client_key, operation_id);

        if let Some(replayed) = self.claim(&key).await? {
            return Ok((replayed, "replayed"));
        }

        let mut entry = PendingEntry::new(Arc::clone(&self.ledger), key);

        let limit_key = match self.config.limit_scope {
            LimitScope::Dependency => dependency,
            LimitScope::Client => client_key,
        };
        if !self.limiter.admit(limit_key) {
            entry.rollback().await;
            return Err(InvokeError::RateLimited {
                key: limit_key.to_string(),
            });
        }

        match self.breakers.get(dependency).call(work).await {
            Ok(value) => {
                match serde_json::to_vec(&value) {
                    Ok(bytes) => entry.complete(bytes).await,
                    Err(e) => {
                        // Still terminal: a succeeded operation must not run again
                        tracing::error!(error = %e, "Result cannot be stored for replay");
                        entry.complete(UNREPLAYABLE.to_vec()).await;
                    }
                }
                Ok((value, "success"))
            }
            Err(CircuitBreakerError::Open { name }) => {
                entry.rollback().await;
                Err(InvokeError::CircuitOpen { name })
            }
            Err(CircuitBreakerError::Timeout { name, after }) => {
                entry.fail(format!("timed out after {:?}", after)).await;
                Err(InvokeError::TimedOut { name, after })
            }
            Err(CircuitBreakerError::Inner(e)) => {
                entry.fail(e.to_string()).await;
                Err(InvokeError::Work(e))
            }
        }
    }

    /// Take ownership of the operation, or return the replayed result
    ///
    /// `Ok(None)` means the caller now holds a fresh in-progress entry.
    async fn claim(&self, key: &LedgerKey) -> Result<Option<T>, InvokeError<E>> {
        let deadline = tokio::time::Instant::now() + self.config.max_wait();

        loop {
            match self.ledger.begin(key).await.map_err(InvokeError::Ledger)? {
                BeginOutcome::Fresh => return Ok(None),
                BeginOutcome::Completed(bytes) if bytes == UNREPLAYABLE => {
                    return Err(InvokeError::Ledger(anyhow::anyhow!(
                        "operation {} succeeded but its result was not stored for replay",
                        key
                    )));
                }
                BeginOutcome::Completed(bytes) => {
                    let value = serde_json::from_slice(&bytes)
                        .context("Failed to decode stored result")
                        .map_err(InvokeError::Ledger)?;
                    tracing::debug!("Replaying stored result");
                    return Ok(Some(value));
                }
                BeginOutcome::Failed(message) => {
                    return Err(InvokeError::PreviouslyFailed { message });
                }
                BeginOutcome::InProgress => {
                    let remaining =
                        deadline.saturating_duration_since(tokio::time::Instant::now());
                    if self.config.in_progress == InProgressPolicy::Reject || remaining.is_zero() {
                        return Err(InvokeError::DuplicateInProgress {
                            client_key: key.client_key.clone(),
                            operation_id: key.operation_id.clone(),
                        });
                    }
                    tokio::time::sleep(self.config.poll_interval().min(remaining)).await;
                }
            }
        }
    }
}

impl<T, E> std::fmt::Debug for ResilientInvoker<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientInvoker")
            .field("ledger", &self.ledger)
            .field("limiter", &self.limiter)
            .field("breakers", &self.breakers)
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .finish()
    }
}

/// Ledger write that resolves an in-progress entry
#[derive(Debug, Clone)]
enum Resolution {
    Complete(Vec<u8>),
    Fail(String),
    Abandon,
}

impl Resolution {
    fn as_str(&self) -> &'static str {
        match self {
            Resolution::Complete(_) => "complete",
            Resolution::Fail(_) => "fail",
            Resolution::Abandon => "abandon",
        }
    }

    async fn apply(self, ledger: &IdempotencyLedger, key: &LedgerKey) -> anyhow::Result<()> {
        match self {
            Resolution::Complete(bytes) => ledger.complete(key, bytes).await,
            Resolution::Fail(message) => ledger.fail(key, message).await,
            Resolution::Abandon => ledger.abandon(key).await.map(|_| ()),
        }
    }
}

/// In-progress ledger entry owned by one execution
///
/// `key` is cleared only after the ledger write finishes. An execution
/// dropped before that leaves `Drop` to replay `on_drop`, which is the write
/// that was in flight, or a cancellation failure if none was.
struct PendingEntry {
    ledger: Arc<IdempotencyLedger>,
    key: Option<LedgerKey>,
    on_drop: Resolution,
}

impl PendingEntry {
    fn new(ledger: Arc<IdempotencyLedger>, key: LedgerKey) -> Self {
        Self {
            ledger,
            key: Some(key),
            on_drop: Resolution::Fail(CANCELLED.to_string()),
        }
    }

    async fn complete(&mut self, bytes: Vec<u8>) {
        // The work succeeded; the caller still gets its value
        self.resolve(Resolution::Complete(bytes)).await;
    }

    async fn fail(&mut self, message: String) {
        self.resolve(Resolution::Fail(message)).await;
    }

    /// Remove the entry, as if the operation had never been claimed
    async fn rollback(&mut self) {
        self.resolve(Resolution::Abandon).await;
    }

    async fn resolve(&mut self, resolution: Resolution) {
        let Some(key) = self.key.clone() else {
            return;
        };

        let action = resolution.as_str();
        self.on_drop = resolution.clone();
        if let Err(e) = resolution.apply(&self.ledger, &key).await {
            tracing::error!(
                error = %format!("{:#}", e),
                idempotency_key = %key,
                resolution = action,
                "Failed to resolve idempotency entry"
            );
        }
        self.key = None;
    }
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let resolution = std::mem::replace(&mut self.on_drop, Resolution::Abandon);
        let action = resolution.as_str();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let ledger = Arc::clone(&self.ledger);
                handle.spawn(async move {
                    match resolution.apply(&ledger, &key).await {
                        Ok(()) => tracing::debug!(
                            idempotency_key = %key,
                            resolution = action,
                            "Dropped operation resolved"
                        ),
                        Err(e) => tracing::warn!(
                            error = %format!("{:#}", e),
                            idempotency_key = %key,
                            resolution = action,
                            "Failed to resolve dropped operation"
                        ),
                    }
                });
            }
            Err(_) => tracing::warn!(
                idempotency_key = %key,
                resolution = action,
                "No runtime to resolve dropped operation, entry stays in progress until it expires"
            ),
        }
    }
}

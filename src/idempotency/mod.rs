//! # Idempotency Ledger
//!
//! Deduplicates retried mutating operations. The first `begin` for a
//! `(client_key, operation_id)` pair atomically creates an in-progress record;
//! later calls see that record and either wait, replay the stored result, or
//! report the stored failure.
//!
//! ## Storage
//!
//! - [`LocalLedgerStore`]: in-process DashMap, for a single instance
//! - [`RedisLedgerStore`]: shared across instances (feature `redis-store`)
//!
//! ## Example
//!
//! ```rust
//! use lighter_resilience::clock::SystemClock;
//! use lighter_resilience::config::IdempotencyConfig;
//! use lighter_resilience::idempotency::{BeginOutcome, IdempotencyLedger, LedgerKey, LocalLedgerStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let ledger = IdempotencyLedger::new(
//!     Arc::new(LocalLedgerStore::new()),
//!     IdempotencyConfig::default(),
//!     Arc::new(SystemClock),
//! )?;
//!
//! let key = LedgerKey::new("client-7", "create-order-42");
//! if let BeginOutcome::Fresh = ledger.begin(&key).await? {
//!     ledger.complete(&key, b"{\"order\":42}".to_vec()).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod local;
#[cfg(feature = "redis-store")]
mod redis_store;
mod store;

pub use local::LocalLedgerStore;
#[cfg(feature = "redis-store")]
pub use redis_store::RedisLedgerStore;
pub use store::LedgerStore;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::{FailedPolicy, IdempotencyConfig, LedgerBackend, Validate};

/// Upper bound on compare-and-swap retries inside `begin`
const MAX_BEGIN_ATTEMPTS: usize = 8;

/// Compound key identifying one logical operation of one client
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub client_key: String,
    pub operation_id: String,
}

impl LedgerKey {
    pub fn new(client_key: impl Into<String>, operation_id: impl Into<String>) -> Self {
        Self {
            client_key: client_key.into(),
            operation_id: operation_id.into(),
        }
    }

    /// Key used in the store
    ///
    /// The client key is length-prefixed so `("a:b", "c")` and `("a", "b:c")`
    /// never collide.
    pub fn storage_key(&self) -> String {
        format!(
            "idempotency:{}:{}:{}",
            self.client_key.len(),
            self.client_key,
            self.operation_id
        )
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.client_key, self.operation_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    InProgress,
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::InProgress => "in_progress",
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
        }
    }
}

/// Stored state of one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub status: RecordStatus,
    /// Opaque result payload, present only when completed
    pub result: Option<Vec<u8>>,
    /// Failure message, present only when failed
    pub error: Option<String>,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

impl IdempotencyRecord {
    pub fn in_progress(now_ms: u64, ttl_ms: u64) -> Self {
        Self {
            status: RecordStatus::InProgress,
            result: None,
            error: None,
            created_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        }
    }

    fn completed(&self, result: Vec<u8>, now_ms: u64, ttl_ms: u64) -> Self {
        Self {
            status: RecordStatus::Completed,
            result: Some(result),
            error: None,
            created_at_ms: self.created_at_ms,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        }
    }

    fn failed(&self, error: String, now_ms: u64, ttl_ms: u64) -> Self {
        Self {
            status: RecordStatus::Failed,
            result: None,
            error: Some(error),
            created_at_ms: self.created_at_ms,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Result of [`IdempotencyLedger::begin`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// No live record existed and one was created; the caller owns the
    /// operation and must `complete`, `fail` or `abandon` it
    Fresh,
    /// Another invocation is in flight
    InProgress,
    /// The operation already succeeded; replay these bytes
    Completed(Vec<u8>),
    /// The operation already failed (replay policy only)
    Failed(String),
}

/// Per-operation deduplication ledger over a [`LedgerStore`]
pub struct IdempotencyLedger {
    store: Arc<dyn LedgerStore>,
    config: IdempotencyConfig,
    clock: Arc<dyn Clock>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl IdempotencyLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        config: IdempotencyConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            store,
            config,
            clock,
            sweeper: Mutex::new(None),
        })
    }

    /// Build a ledger over the configured backend and start the sweeper
    ///
    /// Must be called from within a tokio runtime.
    pub async fn connect(config: IdempotencyConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let store: Arc<dyn LedgerStore> = match config.backend {
            LedgerBackend::Local => Arc::new(LocalLedgerStore::new()),
            #[cfg(feature = "redis-store")]
            LedgerBackend::Redis => Arc::new(RedisLedgerStore::connect(&config.redis).await?),
            #[cfg(not(feature = "redis-store"))]
            LedgerBackend::Redis => {
                bail!("the redis ledger backend requires the `redis-store` feature")
            }
        };

        tracing::info!(
            backend = ?config.backend,
            ttl_secs = config.ttl,
            "Idempotency ledger ready"
        );

        let sweep_interval = config.sweep_interval();
        let ledger = Self::new(store, config, clock)?;
        if let Some(period) = sweep_interval {
            ledger.spawn_sweeper(period);
        }
        Ok(ledger)
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    fn ttl_ms(&self) -> u64 {
        self.config.ttl().as_millis() as u64
    }

    /// Claim an operation, or report what is already known about it
    #[tracing::instrument(skip(self), fields(idempotency_key = %key))]
    pub async fn begin(&self, key: &LedgerKey) -> Result<BeginOutcome> {
        let storage_key = key.storage_key();

        for _ in 0..MAX_BEGIN_ATTEMPTS {
            let now = self.clock.unix_millis();
            let record = IdempotencyRecord::in_progress(now, self.ttl_ms());

            let Some(existing) = self
                .store
                .insert_if_absent(&storage_key, record.clone(), now)
                .await?
            else {
                crate::metrics::record_ledger_lookup("miss");
                return Ok(BeginOutcome::Fresh);
            };

            match existing.status {
                RecordStatus::InProgress => {
                    crate::metrics::record_ledger_lookup("duplicate");
                    return Ok(BeginOutcome::InProgress);
                }
                RecordStatus::Completed => {
                    crate::metrics::record_ledger_lookup("hit");
                    return Ok(BeginOutcome::Completed(existing.result.unwrap_or_default()));
                }
                RecordStatus::Failed => match self.config.failed_policy {
                    FailedPolicy::Replay => {
                        crate::metrics::record_ledger_lookup("failed");
                        return Ok(BeginOutcome::Failed(existing.error.unwrap_or_default()));
                    }
                    FailedPolicy::Retry => {
                        if self
                            .store
                            .replace_if(&storage_key, RecordStatus::Failed, record, now)
                            .await?
                        {
                            tracing::debug!("Retrying previously failed operation");
                            crate::metrics::record_ledger_lookup("miss");
                            return Ok(BeginOutcome::Fresh);
                        }
                        // Someone else changed the record first; look again
                    }
                },
            }
        }

        bail!(
            "idempotency record {} changed concurrently {} times, giving up",
            key,
            MAX_BEGIN_ATTEMPTS
        )
    }

    /// Resolve an in-progress operation as succeeded
    #[tracing::instrument(
        skip(self, result),
        fields(idempotency_key = %key, result_bytes = result.len())
    )]
    pub async fn complete(&self, key: &LedgerKey, result: Vec<u8>) -> Result<()> {
        let now = self.clock.unix_millis();
        let storage_key = key.storage_key();
        let current = self.in_progress_record(key, &storage_key, now).await?;

        let record = current.completed(result, now, self.ttl_ms());
        if !self
            .store
            .replace_if(&storage_key, RecordStatus::InProgress, record, now)
            .await?
        {
            bail!("idempotency record {} was resolved concurrently", key);
        }

        tracing::debug!("Operation completed");
        Ok(())
    }

    /// Resolve an in-progress operation as failed
    #[tracing::instrument(skip(self, error), fields(idempotency_key = %key))]
    pub async fn fail(&self, key: &LedgerKey, error: impl Into<String> + Send) -> Result<()> {
        let now = self.clock.unix_millis();
        let storage_key = key.storage_key();
        let current = self.in_progress_record(key, &storage_key, now).await?;

        let record = current.failed(error.into(), now, self.ttl_ms());
        if !self
            .store
            .replace_if(&storage_key, RecordStatus::InProgress, record, now)
            .await?
        {
            bail!("idempotency record {} was resolved concurrently", key);
        }

        tracing::debug!("Operation failed");
        Ok(())
    }

    async fn in_progress_record(
        &self,
        key: &LedgerKey,
        storage_key: &str,
        now: u64,
    ) -> Result<IdempotencyRecord> {
        match self.store.get(storage_key, now).await? {
            Some(record) if record.status == RecordStatus::InProgress => Ok(record),
            Some(record) => bail!(
                "idempotency record {} is {}, not in progress",
                key,
                record.status.as_str()
            ),
            None => bail!("idempotency record {} does not exist or has expired", key),
        }
    }

    /// Delete an in-progress record so the operation was never claimed
    ///
    /// Returns false when there was no in-progress record to remove.
    #[tracing::instrument(skip(self), fields(idempotency_key = %key))]
    pub async fn abandon(&self, key: &LedgerKey) -> Result<bool> {
        let now = self.clock.unix_millis();
        let removed = self
            .store
            .remove_if(&key.storage_key(), RecordStatus::InProgress, now)
            .await?;

        if removed {
            tracing::debug!("Operation abandoned");
        }
        Ok(removed)
    }

    pub async fn lookup(&self, key: &LedgerKey) -> Result<Option<IdempotencyRecord>> {
        self.store
            .get(&key.storage_key(), self.clock.unix_millis())
            .await
    }

    pub async fn purge_expired(&self) -> Result<usize> {
        self.store.purge_expired(self.clock.unix_millis()).await
    }

    /// Start a background task that purges expired records every `period`
    ///
    /// Replaces a previously started sweeper. The task stops when the ledger
    /// is dropped.
    pub fn spawn_sweeper(&self, period: Duration) {
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;

                match store.purge_expired(clock.unix_millis()).await {
                    Ok(0) => {}
                    Ok(purged) => tracing::debug!(purged, "Purged expired idempotency records"),
                    Err(e) => tracing::warn!(error = %e, "Failed to purge idempotency records"),
                }
            }
        });

        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Drop for IdempotencyLedger {
    fn drop(&mut self) {
        // Abort the sweeper when the ledger is dropped
        let handle = self
            .sweeper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl fmt::Debug for IdempotencyLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdempotencyLedger")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

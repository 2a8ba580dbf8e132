use anyhow::Result;
use async_trait::async_trait;

use super::{IdempotencyRecord, RecordStatus};

/// Storage backend for idempotency records
///
/// Every method is atomic with respect to a single key. Records whose
/// `expires_at_ms` is at or before `now_ms` must be treated as absent by every
/// method, whether or not they have been physically removed yet.
#[async_trait]
pub trait LedgerStore: Send + Sync + std::fmt::Debug {
    /// Store `record` unless a live record already exists
    ///
    /// Returns `None` when the record was inserted, otherwise the existing
    /// record, which is left untouched.
    async fn insert_if_absent(
        &self,
        key: &str,
        record: IdempotencyRecord,
        now_ms: u64,
    ) -> Result<Option<IdempotencyRecord>>;

    async fn get(&self, key: &str, now_ms: u64) -> Result<Option<IdempotencyRecord>>;

    /// Overwrite the live record only if its status is `expected`
    async fn replace_if(
        &self,
        key: &str,
        expected: RecordStatus,
        record: IdempotencyRecord,
        now_ms: u64,
    ) -> Result<bool>;

    /// Delete the live record only if its status is `expected`
    async fn remove_if(&self, key: &str, expected: RecordStatus, now_ms: u64) -> Result<bool>;

    /// Physically remove expired records, returning how many were dropped
    ///
    /// Backends that expire records on their own may return `Ok(0)`.
    async fn purge_expired(&self, now_ms: u64) -> Result<usize>;
}

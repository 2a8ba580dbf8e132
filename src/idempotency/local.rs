use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::store::LedgerStore;
use super::{IdempotencyRecord, RecordStatus};

/// In-process ledger store using DashMap
///
/// Each operation runs under the shard lock of its key, which is what makes
/// insert-if-absent and the status compare-and-swap atomic.
#[derive(Debug)]
pub struct LocalLedgerStore {
    records: DashMap<String, IdempotencyRecord>,
}

impl LocalLedgerStore {
    /// Create a store with default shard count (CPU count * 4)
    pub fn new() -> Self {
        Self::with_shard_count(num_cpus::get() * 4)
    }

    /// Create a store with a specific shard count, rounded up to a power of two
    pub fn with_shard_count(shard_count: usize) -> Self {
        Self {
            records: DashMap::with_shard_amount(shard_count.max(2).next_power_of_two()),
        }
    }

    /// Number of records held, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for LocalLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for LocalLedgerStore {
    async fn insert_if_absent(
        &self,
        key: &str,
        record: IdempotencyRecord,
        now_ms: u64,
    ) -> Result<Option<IdempotencyRecord>> {
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired(now_ms) {
                    entry.insert(record);
                    Ok(None)
                } else {
                    Ok(Some(entry.get().clone()))
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(None)
            }
        }
    }

    async fn get(&self, key: &str, now_ms: u64) -> Result<Option<IdempotencyRecord>> {
        // Drop an expired record on read so it stops occupying memory
        if self
            .records
            .remove_if(key, |_, record| record.is_expired(now_ms))
            .is_some()
        {
            return Ok(None);
        }

        Ok(self.records.get(key).map(|record| record.clone()))
    }

    async fn replace_if(
        &self,
        key: &str,
        expected: RecordStatus,
        record: IdempotencyRecord,
        now_ms: u64,
    ) -> Result<bool> {
        match self.records.get_mut(key) {
            Some(mut existing) if !existing.is_expired(now_ms) && existing.status == expected => {
                *existing = record;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_if(&self, key: &str, expected: RecordStatus, now_ms: u64) -> Result<bool> {
        Ok(self
            .records
            .remove_if(key, |_, record| {
                !record.is_expired(now_ms) && record.status == expected
            })
            .is_some())
    }

    async fn purge_expired(&self, now_ms: u64) -> Result<usize> {
        let mut purged = 0;
        self.records.retain(|_, record| {
            let keep = !record.is_expired(now_ms);
            if !keep {
                purged += 1;
            }
            keep
        });
        Ok(purged)
    }
}

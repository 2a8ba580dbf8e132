use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::store::LedgerStore;
use super::{IdempotencyRecord, RecordStatus};
use crate::config::RedisLedgerConfig;

// Every script takes the caller's clock as ARGV[1] and treats a record whose
// `expires_at` is at or before it as absent, whatever its PEXPIRE says.

const INSERT_IF_ABSENT: &str = r#"
local expires_at = redis.call('HGET', KEYS[1], 'expires_at')
if expires_at and tonumber(expires_at) > tonumber(ARGV[1]) then
    return redis.call('HGET', KEYS[1], 'record')
end
redis.call('HSET', KEYS[1], 'status', ARGV[2], 'record', ARGV[3], 'expires_at', ARGV[4])
redis.call('PEXPIRE', KEYS[1], ARGV[5])
return false
"#;

const REPLACE_IF: &str = r#"
local expires_at = redis.call('HGET', KEYS[1], 'expires_at')
if not expires_at or tonumber(expires_at) <= tonumber(ARGV[1]) then
    return 0
end
if redis.call('HGET', KEYS[1], 'status') ~= ARGV[2] then
    return 0
end
redis.call('HSET', KEYS[1], 'status', ARGV[3], 'record', ARGV[4], 'expires_at', ARGV[5])
redis.call('PEXPIRE', KEYS[1], ARGV[6])
return 1
"#;

const REMOVE_IF: &str = r#"
local expires_at = redis.call('HGET', KEYS[1], 'expires_at')
if not expires_at or tonumber(expires_at) <= tonumber(ARGV[1]) then
    return 0
end
if redis.call('HGET', KEYS[1], 'status') ~= ARGV[2] then
    return 0
end
return redis.call('DEL', KEYS[1])
"#;

/// Redis-backed ledger store shared by every process pointing at the same
/// instance and prefix
///
/// Each record is a hash holding its `status`, its `expires_at` and the
/// bincode-encoded `record`, with a server-side `PEXPIRE` matching
/// `expires_at_ms`. The
/// conditional operations run as Lua scripts, which Redis evaluates
/// atomically.
#[derive(Clone)]
pub struct RedisLedgerStore {
    conn_manager: Arc<ConnectionManager>,
    /// Key prefix for namespace isolation (e.g., "lighter-resilience:")
    prefix: String,
    insert_if_absent: Arc<Script>,
    replace_if: Arc<Script>,
    remove_if: Arc<Script>,
}

impl RedisLedgerStore {
    pub async fn connect(config: &RedisLedgerConfig) -> Result<Self> {
        Self::with_timeout(&config.url, &config.prefix, config.connection_timeout()).await
    }

    /// Connect with a custom timeout
    ///
    /// # Example
    /// ```no_run
    /// use lighter_resilience::idempotency::RedisLedgerStore;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let store = RedisLedgerStore::with_timeout(
    ///         "redis://localhost:6379",
    ///         "orders",
    ///         Duration::from_secs(5)
    ///     ).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn with_timeout(
        url: &str,
        prefix: &str,
        connection_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::open(url).context("Failed to create Redis client")?;

        let conn_manager = timeout(connection_timeout, ConnectionManager::new(client))
            .await
            .context(format!(
                "Redis connection timeout after {:?}. Check Redis is running at: {}",
                connection_timeout, url
            ))?
            .context("Failed to create Redis connection manager")?;

        Ok(Self {
            conn_manager: Arc::new(conn_manager),
            prefix: format!("{}:", prefix),
            insert_if_absent: Arc::new(Script::new(INSERT_IF_ABSENT)),
            replace_if: Arc::new(Script::new(REPLACE_IF)),
            remove_if: Arc::new(Script::new(REMOVE_IF)),
        })
    }

    fn build_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn connection(&self) -> ConnectionManager {
        (*self.conn_manager).clone()
    }
}

/// Milliseconds Redis should keep a record, never zero
fn remaining_ttl_ms(record: &IdempotencyRecord, now_ms: u64) -> u64 {
    record.expires_at_ms.saturating_sub(now_ms).max(1)
}

fn encode(record: &IdempotencyRecord) -> Result<Vec<u8>> {
    bincode::serialize(record).context("Failed to serialize idempotency record")
}

fn decode(bytes: &[u8]) -> Result<IdempotencyRecord> {
    bincode::deserialize(bytes).context("Failed to deserialize idempotency record")
}

impl std::fmt::Debug for RedisLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLedgerStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LedgerStore for RedisLedgerStore {
    #[tracing::instrument(skip(self, record), fields(ledger_key = %key))]
    async fn insert_if_absent(
        &self,
        key: &str,
        record: IdempotencyRecord,
        now_ms: u64,
    ) -> Result<Option<IdempotencyRecord>> {
        let mut conn = self.connection();

        let existing: Option<Vec<u8>> = self
            .insert_if_absent
            .key(self.build_key(key))
            .arg(now_ms)
            .arg(record.status.as_str())
            .arg(encode(&record)?)
            .arg(record.expires_at_ms)
            .arg(remaining_ttl_ms(&record, now_ms))
            .invoke_async(&mut conn)
            .await
            .context("Failed to insert idempotency record into Redis")?;

        match existing {
            Some(bytes) => decode(&bytes).map(Some),
            None => {
                ::tracing::debug!("Idempotency record created");
                Ok(None)
            }
        }
    }

    #[tracing::instrument(skip(self), fields(ledger_key = %key))]
    async fn get(&self, key: &str, now_ms: u64) -> Result<Option<IdempotencyRecord>> {
        let mut conn = self.connection();

        let data: Option<Vec<u8>> = conn
            .hget(self.build_key(key), "record")
            .await
            .context("Failed to get idempotency record from Redis")?;

        match data {
            Some(bytes) => {
                let record = decode(&bytes)?;
                Ok((!record.is_expired(now_ms)).then_some(record))
            }
            None => Ok(None),
        }
    }

    #[tracing::instrument(
        skip(self, record),
        fields(ledger_key = %key, expected = %expected.as_str())
    )]
    async fn replace_if(
        &self,
        key: &str,
        expected: RecordStatus,
        record: IdempotencyRecord,
        now_ms: u64,
    ) -> Result<bool> {
        let mut conn = self.connection();

        let replaced: i64 = self
            .replace_if
            .key(self.build_key(key))
            .arg(now_ms)
            .arg(expected.as_str())
            .arg(record.status.as_str())
            .arg(encode(&record)?)
            .arg(record.expires_at_ms)
            .arg(remaining_ttl_ms(&record, now_ms))
            .invoke_async(&mut conn)
            .await
            .context("Failed to replace idempotency record in Redis")?;

        Ok(replaced == 1)
    }

    #[tracing::instrument(skip(self), fields(ledger_key = %key, expected = %expected.as_str()))]
    async fn remove_if(&self, key: &str, expected: RecordStatus, now_ms: u64) -> Result<bool> {
        let mut conn = self.connection();

        let removed: i64 = self
            .remove_if
            .key(self.build_key(key))
            .arg(now_ms)
            .arg(expected.as_str())
            .invoke_async(&mut conn)
            .await
            .context("Failed to remove idempotency record from Redis")?;

        Ok(removed > 0)
    }

    async fn purge_expired(&self, _now_ms: u64) -> Result<usize> {
        // PEXPIRE already removes records server-side
        Ok(0)
    }
}

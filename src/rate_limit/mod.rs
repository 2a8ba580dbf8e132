//! # Rate Limiting
//!
//! Per-key GCRA limiters from `governor`, kept in a sharded [`DashMap`]. Each
//! key owns a direct limiter whose state is a single atomic, so admission is
//! atomic per key and keys in different shards never contend.
//!
//! A quota of `capacity` tokens refilled at `refill_rate_per_second` maps to
//! one token every `1 / refill_rate_per_second` seconds with a burst of
//! `capacity`. A new key starts with its full burst available.
//!
//! ## Example
//!
//! ```rust
//! use lighter_resilience::clock::SystemClock;
//! use lighter_resilience::config::RateLimitConfig;
//! use lighter_resilience::rate_limit::RateLimiter;
//! use std::sync::Arc;
//!
//! let limiter = RateLimiter::new(RateLimitConfig::new(5.0, 1.0), Arc::new(SystemClock)).unwrap();
//! assert!(limiter.admit("inventory-service"));
//! ```

use dashmap::DashMap;
use governor::Quota;
use governor::middleware::NoOpMiddleware;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::{ConfigError, RateLimitConfig, Validate};

/// Adapts the injected [`Clock`] to `governor`'s clock trait
#[derive(Debug, Clone)]
struct LimiterClock(Arc<dyn Clock>);

impl governor::clock::Clock for LimiterClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        self.0.now()
    }
}

type DirectLimiter =
    governor::RateLimiter<NotKeyed, InMemoryState, LimiterClock, NoOpMiddleware<Instant>>;

struct KeyLimiter {
    limiter: DirectLimiter,
    last_seen: Instant,
}

/// Read-only view of a key's limiter
#[derive(Debug, Clone, PartialEq)]
pub struct BucketSnapshot {
    /// Burst size, the whole tokens a full bucket holds
    pub capacity: u32,
    /// Time to replenish one token
    pub refill_period: Duration,
    /// Time since the key was last checked
    pub idle_for: Duration,
}

/// Keyed token bucket rate limiter
pub struct RateLimiter {
    limiters: DashMap<String, KeyLimiter>,
    quota: Quota,
    config: RateLimitConfig,
    clock: LimiterClock,
}

impl RateLimiter {
    /// Create a limiter, rejecting a non-positive capacity or refill rate
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        let quota = quota(&config)?;

        Ok(Self {
            limiters: DashMap::with_shard_amount((num_cpus::get() * 4).next_power_of_two()),
            quota,
            config,
            clock: LimiterClock(clock),
        })
    }

    /// Check whether one unit of work for `key` may proceed
    ///
    /// Never blocks. A key seen for the first time starts with a full bucket.
    pub fn admit(&self, key: &str) -> bool {
        let now = self.clock.0.now();

        let admitted = match self.limiters.get_mut(key) {
            Some(mut entry) => {
                entry.last_seen = now;
                entry.limiter.check().is_ok()
            }
            None => {
                let mut entry = self
                    .limiters
                    .entry(key.to_string())
                    .or_insert_with(|| KeyLimiter {
                        limiter: DirectLimiter::direct_with_clock(self.quota, &self.clock),
                        last_seen: now,
                    });
                entry.last_seen = now;
                entry.limiter.check().is_ok()
            }
        };

        crate::metrics::record_rate_limit_decision(admitted);
        if admitted {
            tracing::trace!(rate_limit_key = %key, "Request admitted");
        } else {
            tracing::debug!(rate_limit_key = %key, "Rate limit exceeded");
        }

        admitted
    }

    /// Quota and idle time of a key, without taking a token
    pub fn snapshot(&self, key: &str) -> Option<BucketSnapshot> {
        let now = self.clock.0.now();
        self.limiters.get(key).map(|entry| BucketSnapshot {
            capacity: self.quota.burst_size().get(),
            refill_period: self.quota.replenish_interval(),
            idle_for: now.saturating_duration_since(entry.last_seen),
        })
    }

    /// Drop limiters that have been idle longer than the configured idle TTL
    ///
    /// Returns the number of keys removed. An evicted key starts over with
    /// a full bucket.
    pub fn evict_idle(&self) -> usize {
        let Some(idle_ttl) = self.config.idle_ttl() else {
            return 0;
        };

        let now = self.clock.0.now();
        let before = self.limiters.len();
        self.limiters.retain(|_, entry| now.saturating_duration_since(entry.last_seen) < idle_ttl);
        let evicted = before.saturating_sub(self.limiters.len());

        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle rate limit buckets");
        }
        evicted
    }

    /// Forget a single key
    pub fn clear_key(&self, key: &str) {
        self.limiters.remove(key);
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("keys", &self.limiters.len())
            .field("quota", &self.quota)
            .field("config", &self.config)
            .finish()
    }
}

/// Whole-token burst of `capacity`, one token per `1 / refill_rate_per_second`
fn quota(config: &RateLimitConfig) -> Result<Quota, ConfigError> {
    let burst = NonZeroU32::new(config.capacity.min(u32::MAX as f64) as u32).ok_or_else(|| {
        ConfigError::Validation("rate_limit.capacity must be a finite number >= 1".to_string())
    })?;

    let period = Duration::try_from_secs_f64(config.refill_rate_per_second.recip())
        .ok()
        .and_then(Quota::with_period)
        .ok_or_else(|| {
            ConfigError::Validation(
                "rate_limit.refill_rate_per_second is outside the supported range".to_string(),
            )
        })?;

    Ok(period.allow_burst(burst))
}

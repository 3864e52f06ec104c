//! Ephemeral key-value store
//!
//! All transient authentication state (lockout counters, OTP hashes, device
//! trust marks, sessions) lives behind this trait. Production uses
//! [`RedisStore`]; tests use [`MemoryStore`].

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set `key` to `value` with an expiry, replacing any previous value
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: i64) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Delete `key` only if its current value equals `expected`.
    /// Atomic; returns whether the delete happened.
    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool>;

    /// Replace the value of `key` with `new` only if its current value
    /// equals `expected`, refreshing the expiry. Atomic; returns whether
    /// the swap happened. The swap fails when the key is missing.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl_secs: i64,
    ) -> Result<bool>;

    /// Increment an integer counter, setting the expiry atomically when the
    /// counter is created. Existing counters keep their remaining TTL.
    async fn incr_ex(&self, key: &str, ttl_secs: i64) -> Result<i64>;

    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<()>;

    /// Remaining TTL in seconds, `None` when the key does not exist
    async fn ttl(&self, key: &str) -> Result<Option<i64>>;

    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
}

//! External counter stores backing the fixed-window limiter.
//!
//! A store provides two operations: an atomic increment that returns the
//! post-increment value, and a time-to-live on a key. The fixed-window
//! limiter relies on the increment being a single atomic operation so that
//! exactly one caller per window observes a count of 1.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

pub use self::memory::MemoryStore;
pub use self::redis_store::{RedisStore, DEFAULT_OP_TIMEOUT};
pub use crate::error::StoreError;

/// An atomic counter store shared by every limiter using the same key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter named `key` and return its new value.
    ///
    /// A missing or expired counter starts from zero, so the first increment
    /// of a window returns 1.
    async fn incr(&self, key: &str) -> Result<u64, StoreError>;

    /// Expire the counter named `key` after `ttl`.
    ///
    /// Setting a TTL on a missing key is a no-op.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
}

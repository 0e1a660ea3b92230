//! In-process counter store.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::{CounterStore, StoreError};
use crate::clock::{Clock, MonotonicClock};

/// A counter and its optional expiry deadline.
#[derive(Debug, Clone, Copy, Default)]
struct Counter {
    value: u64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// A process-local [`CounterStore`] with the same increment and expiry
/// semantics as Redis `INCR`/`PEXPIRE`.
///
/// Expired counters read as missing and are replaced on the next increment.
/// Every limiter holding the same `MemoryStore` shares its counters, which
/// makes it a stand-in for a networked store in tests and single-node setups.
#[derive(Debug)]
pub struct MemoryStore<C = MonotonicClock> {
    counters: DashMap<String, Counter>,
    clock: C,
}

impl MemoryStore {
    /// Create an empty store driven by the monotonic clock.
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryStore<C> {
    /// Create an empty store driven by the given clock.
    pub fn with_clock(clock: C) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
        }
    }
}

#[async_trait]
impl<C: Clock> CounterStore for MemoryStore<C> {
    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let now = self.clock.now();
        // The entry guard holds the shard lock, making the reset-and-increment atomic.
        let mut counter = self.counters.entry(key.to_string()).or_default();
        if counter.is_expired(now) {
            *counter = Counter::default();
        }
        counter.value += 1;

        trace!(key = %key, value = counter.value, "Incremented in-memory counter");
        Ok(counter.value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        if let Some(mut counter) = self.counters.get_mut(key) {
            if !counter.is_expired(now) {
                counter.expires_at = Some(now + ttl);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
impl<C: Clock> MemoryStore<C> {
    /// Current value of a counter, or 0 if it is missing or expired.
    pub(crate) fn get(&self, key: &str) -> u64 {
        let now = self.clock.now();
        self.counters
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .map(|counter| counter.value)
            .unwrap_or(0)
    }

    /// Time left before a counter expires, if it has a TTL.
    pub(crate) fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let counter = self.counters.get(key)?;
        if counter.is_expired(now) {
            return None;
        }
        counter
            .expires_at
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Number of counters held, expired ones included.
    fn len(&self) -> usize {
        self.counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_incr_starts_at_one() {
        let store = MemoryStore::new();

        assert_eq!(store.incr("a").await.unwrap(), 1);
        assert_eq!(store.incr("a").await.unwrap(), 2);
        assert_eq!(store.incr("b").await.unwrap(), 1);
        assert_eq!(store.get("a"), 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_counter_resets_after_ttl() {
        let clock = ManualClock::new();
        let store = MemoryStore::with_clock(clock.clone());

        store.incr("key").await.unwrap();
        store.incr("key").await.unwrap();
        store.expire("key", Duration::from_secs(2)).await.unwrap();
        assert_eq!(store.ttl("key"), Some(Duration::from_secs(2)));

        clock.advance(Duration::from_millis(1999));
        assert_eq!(store.get("key"), 2);

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.get("key"), 0);
        assert_eq!(store.ttl("key"), None);

        // A fresh counter has no TTL until one is set again
        assert_eq!(store.incr("key").await.unwrap(), 1);
        assert_eq!(store.ttl("key"), None);
    }

    #[tokio::test]
    async fn test_expire_on_missing_key_is_noop() {
        let store = MemoryStore::new();

        store.expire("missing", Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_expired_counter_is_replaced_in_place() {
        let clock = ManualClock::new();
        let store = MemoryStore::with_clock(clock.clone());

        store.incr("short").await.unwrap();
        store.expire("short", Duration::from_secs(1)).await.unwrap();
        store.incr("forever").await.unwrap();

        clock.advance(Duration::from_secs(5));
        assert_eq!(store.incr("short").await.unwrap(), 1);

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("forever"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.incr("shared").await.unwrap() })
            })
            .collect();

        let mut seen: Vec<u64> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        seen.sort_unstable();

        // Every caller observed a distinct post-increment value
        assert_eq!(seen, (1..=100).collect::<Vec<_>>());
    }
}

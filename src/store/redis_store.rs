//! Redis-backed counter store for limits shared across processes.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use tracing::{debug, info, trace};

use super::{CounterStore, StoreError};

/// Default bound on a single store round trip.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(500);

/// A [`CounterStore`] backed by Redis `INCR` and `PEXPIRE`.
///
/// The store holds a multiplexed connection manager that reconnects on its
/// own; cloning the manager per call lets many tasks share one connection.
/// Every command is bounded by an operation timeout so a slow or unreachable
/// server turns into a [`StoreError::Timeout`] instead of a hung caller.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    /// Prepended to every key, e.g. `"ratelimit:"`
    key_prefix: String,
    op_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect to the Redis server at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_timeout(url, DEFAULT_OP_TIMEOUT).await
    }

    /// Connect with a custom operation timeout, which also bounds the initial
    /// connection attempt.
    pub async fn connect_with_timeout(url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        info!(url = %url, timeout = ?op_timeout, "Connecting to Redis counter store");

        let client = Client::open(url)?;
        let conn = match tokio::time::timeout(op_timeout, ConnectionManager::new(client)).await {
            Ok(conn) => conn?,
            Err(_) => return Err(StoreError::Timeout(op_timeout)),
        };

        debug!(url = %url, "Redis counter store connected");

        Ok(Self {
            conn,
            key_prefix: String::new(),
            op_timeout,
        })
    }

    /// Prefix every key with `prefix`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn full_key(&self, key: &str) -> String {
        prefixed_key(&self.key_prefix, key)
    }

    /// Run one store operation, bounded by the operation timeout.
    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }
}

fn prefixed_key(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let key = self.full_key(key);
        let mut conn = self.conn.clone();

        let mut cmd = redis::cmd("INCR");
        cmd.arg(&key);
        let value: u64 = self.bounded(cmd.query_async(&mut conn)).await?;

        trace!(key = %key, value, "Incremented Redis counter");
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let key = self.full_key(key);
        let mut conn = self.conn.clone();
        // A zero TTL would delete the key outright.
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let mut cmd = redis::cmd("PEXPIRE");
        cmd.arg(&key).arg(ttl_ms);
        let applied: bool = self.bounded(cmd.query_async(&mut conn)).await?;

        trace!(key = %key, ttl_ms, applied, "Set Redis counter expiry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // The ignored tests need a running Redis server: run with `--ignored`
    // and either GATEKEEPER_TEST_REDIS_URL or a server on 127.0.0.1:6379.

    use super::*;
    use crate::ratelimit::FixedWindowLimiter;
    use std::sync::Arc;

    fn test_url() -> String {
        std::env::var("GATEKEEPER_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    fn test_prefix(name: &str) -> String {
        format!("gatekeeper-test:{}:{}:", std::process::id(), name)
    }

    async fn test_store(name: &str) -> RedisStore {
        RedisStore::connect(&test_url())
            .await
            .unwrap()
            .with_key_prefix(test_prefix(name))
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server_fails() {
        // Port 1 is reserved and closed on any sane test host.
        let timeout = Duration::from_millis(200);
        let result = RedisStore::connect_with_timeout("redis://127.0.0.1:1", timeout).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_prefixed_key() {
        assert_eq!(prefixed_key("", "api"), "api");
        assert_eq!(prefixed_key("ratelimit:", "api"), "ratelimit:api");
        assert_eq!(
            prefixed_key(&test_prefix("keys"), "api"),
            format!("gatekeeper-test:{}:keys:api", std::process::id())
        );
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let result = RedisStore::connect("not-a-redis-url").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_incr_and_expire() {
        let store = test_store("incr").await;

        assert_eq!(store.incr("counter").await.unwrap(), 1);
        assert_eq!(store.incr("counter").await.unwrap(), 2);
        store.expire("counter", Duration::from_millis(300)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.incr("counter").await.unwrap(), 1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_fixed_window() {
        let store = Arc::new(test_store("window").await);
        let limiter = FixedWindowLimiter::new(store, "test_key", 5, Duration::from_secs(2));

        for i in 1..=5 {
            assert!(limiter.allow().await, "Request {} should be admitted", i);
        }
        assert!(!limiter.allow().await);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(limiter.allow().await);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_multi_instance() {
        let prefix = test_prefix("multi");
        let store1 = Arc::new(
            RedisStore::connect(&test_url()).await.unwrap().with_key_prefix(prefix.clone()),
        );
        let store2 = Arc::new(
            RedisStore::connect(&test_url()).await.unwrap().with_key_prefix(prefix),
        );

        let limiter1 = FixedWindowLimiter::new(store1, "test_multi", 5, Duration::from_secs(2));
        let limiter2 = FixedWindowLimiter::new(store2, "test_multi", 5, Duration::from_secs(2));

        for i in 1..=5 {
            assert!(limiter1.allow().await, "Request {} should be admitted on instance 1", i);
        }

        // The second instance shares the exhausted budget
        assert!(!limiter2.allow().await);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(limiter1.allow().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn test_redis_under_load() {
        let store = Arc::new(test_store("load").await);
        let window = Duration::from_secs(3);
        let limiter = Arc::new(FixedWindowLimiter::new(store, "test_load", 10, window));

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.allow().await })
            })
            .collect();

        let admitted = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(admitted, 10);
    }
}

//! Admission decision trait shared by local and distributed limiters.

use async_trait::async_trait;

/// Trait for rate limiter implementations.
///
/// This trait abstracts over the local [`TokenBucket`](super::TokenBucket) and
/// the store-backed [`FixedWindowLimiter`](super::FixedWindowLimiter) so that
/// callers can hold either behind an `Arc<dyn RateLimiter>` and swap
/// strategies without code changes.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Decide whether one unit of work may proceed.
    ///
    /// Each call both inspects and consumes limiter budget. A `false` result
    /// means the request must be rejected; there is no error channel.
    async fn allow(&self) -> bool;
}

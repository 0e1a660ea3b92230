//! Local token bucket rate limiter.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock::{Clock, MonotonicClock};

use super::backend::RateLimiter;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Mutable bucket state guarded by the bucket's lock.
#[derive(Debug)]
struct BucketState {
    /// Tokens currently available, always within `[0, capacity]`
    tokens: u64,
    /// When tokens were last added
    last_refill: Instant,
}

/// An in-process token bucket.
///
/// The bucket starts full and refills lazily: every call to [`allow`](Self::allow)
/// credits `floor(elapsed * rate)` whole tokens. When that product is zero the
/// refill timestamp is left alone, so short intervals add up until they are
/// worth a whole token. When a refill does happen the timestamp jumps to the
/// current instant and the fractional remainder of that interval is dropped.
///
/// A single mutex serializes the refill-and-take sequence, so the bucket can be
/// shared freely across threads.
pub struct TokenBucket<C = MonotonicClock> {
    /// Tokens added per second
    rate: u64,
    /// Maximum number of tokens held
    capacity: u64,
    state: Mutex<BucketState>,
    clock: C,
}

impl TokenBucket {
    /// Create a full bucket driven by the monotonic clock.
    ///
    /// `rate` and `capacity` are expected to be positive; they are not
    /// revalidated per call.
    pub fn new(rate: u64, capacity: u64) -> Self {
        Self::with_clock(rate, capacity, MonotonicClock)
    }
}

impl<C: Clock> TokenBucket<C> {
    /// Create a full bucket driven by the given clock.
    pub fn with_clock(rate: u64, capacity: u64, clock: C) -> Self {
        let last_refill = clock.now();
        debug!(rate, capacity, "Creating token bucket");
        Self {
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill,
            }),
            clock,
        }
    }

    /// Take one token if available.
    ///
    /// Returns `true` if the request is admitted, `false` if the bucket is empty.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock();
        let now = self.clock.now();

        let to_add = self.tokens_earned(now.saturating_duration_since(state.last_refill));
        if to_add > 0 {
            state.tokens = state.tokens.saturating_add(to_add).min(self.capacity);
            state.last_refill = now;
        }

        if state.tokens > 0 {
            state.tokens -= 1;
            trace!(remaining = state.tokens, "Token bucket admitted request");
            true
        } else {
            trace!(rate = self.rate, "Token bucket empty, rejecting request");
            false
        }
    }

    /// Tokens that a call made right now would see, without taking one.
    pub fn available(&self) -> u64 {
        let state = self.state.lock();
        let elapsed = self.clock.now().saturating_duration_since(state.last_refill);
        state
            .tokens
            .saturating_add(self.tokens_earned(elapsed))
            .min(self.capacity)
    }

    /// Tokens added per second.
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Maximum number of tokens held.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Whole tokens earned over `elapsed`, i.e. `floor(elapsed * rate)`.
    fn tokens_earned(&self, elapsed: Duration) -> u64 {
        let earned = elapsed.as_nanos().saturating_mul(self.rate as u128) / NANOS_PER_SEC;
        u64::try_from(earned).unwrap_or(u64::MAX)
    }
}

impl<C> std::fmt::Debug for TokenBucket<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("rate", &self.rate)
            .field("capacity", &self.capacity)
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[async_trait]
impl<C: Clock> RateLimiter for TokenBucket<C> {
    async fn allow(&self) -> bool {
        TokenBucket::allow(self)
    }
}

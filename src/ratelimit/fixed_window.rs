//! Distributed fixed-window rate limiter.
//!
//! All state lives in an external [`CounterStore`]; the limiter itself only
//! holds its configuration. Every limiter built with the same key against the
//! same store draws from one shared budget, whichever process it runs in.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::store::{CounterStore, StoreError};

use super::backend::RateLimiter;

/// A fixed-window counter backed by an external store.
///
/// The first increment of a window (the caller that sees a count of 1) sets
/// the counter's expiry to the window length, so windows start on demand and
/// are defined by whichever instance got there first. A burst straddling the
/// end of one window and the start of the next can admit up to `2 * limit`
/// requests within one window length of wall-clock time.
///
/// Store failures fail closed: the request is rejected and the error is only
/// logged. Callers cannot tell throttling apart from an unreachable store.
pub struct FixedWindowLimiter<S: ?Sized> {
    /// The shared counter store.
    store: Arc<S>,
    /// Name of the counter in the store.
    key: String,
    /// Maximum admissions per window.
    limit: u64,
    /// Length of one window.
    window: Duration,
}

impl<S: CounterStore + ?Sized> FixedWindowLimiter<S> {
    /// Create a new fixed-window limiter.
    ///
    /// `key` scopes which callers share a budget and must be unique per
    /// logical rate-limited resource.
    pub fn new(store: Arc<S>, key: impl Into<String>, limit: u64, window: Duration) -> Self {
        let key = key.into();
        debug!(key = %key, limit, window = ?window, "Creating fixed-window limiter");
        Self {
            store,
            key,
            limit,
            window,
        }
    }

    /// Count one request against the current window.
    ///
    /// Returns `true` if the request is within the limit. Returns `false` if
    /// the limit is exceeded or the store could not be reached.
    pub async fn allow(&self) -> bool {
        match self.count_request().await {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!(
                    key = %self.key,
                    error = %e,
                    "Counter store unavailable, rejecting request"
                );
                false
            }
        }
    }

    async fn count_request(&self) -> Result<bool, StoreError> {
        let count = self.store.incr(&self.key).await?;

        if count == 1 {
            debug!(key = %self.key, window = ?self.window, "Starting new window");
            // The increment already happened, so the decision stands even if
            // the expiry could not be set.
            if let Err(e) = self.store.expire(&self.key, self.window).await {
                warn!(key = %self.key, error = %e, "Failed to set window expiry");
            }
        }

        let admitted = count <= self.limit;
        if admitted {
            trace!(key = %self.key, count, limit = self.limit, "Fixed window admitted request");
        } else {
            debug!(
                key = %self.key,
                count,
                limit = self.limit,
                "Fixed window limit exceeded"
            );
        }

        Ok(admitted)
    }

    /// Name of the shared counter.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Maximum admissions per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Length of one window.
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl<S: ?Sized> std::fmt::Debug for FixedWindowLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("key", &self.key)
            .field("limit", &self.limit)
            .field("window", &self.window)
            .finish()
    }
}

#[async_trait]
impl<S: CounterStore + ?Sized + 'static> RateLimiter for FixedWindowLimiter<S> {
    async fn allow(&self) -> bool {
        FixedWindowLimiter::allow(self).await
    }
}

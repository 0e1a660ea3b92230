//! Gatekeeper - Request Admission Control
//!
//! This crate decides, for each incoming unit of work, whether it may proceed.
//! Two interchangeable strategies implement the same [`RateLimiter`] trait:
//! a local token bucket with burst capacity, and a fixed-window counter whose
//! state lives in an external counter store shared by every process that
//! uses the same key.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use ratelimit::{FixedWindowLimiter, RateLimiter, TokenBucket};

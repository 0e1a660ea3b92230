//! Rate limiting strategies and the admission trait they share.

mod backend;
mod fixed_window;
mod token_bucket;

pub use backend::RateLimiter;
pub use fixed_window::FixedWindowLimiter;
pub use token_bucket::TokenBucket;

//! # bucket-limit
//!
//! `bucket-limit` provides per-client rate limiting with full-reset token buckets.
//!
//! ## Core Philosophy
//!
//! Each client identifier owns one [`TokenBucket`]. A bucket holds up to
//! `token_limit` tokens, spends one per admitted request, and snaps back to full
//! once its refill interval has elapsed. There is no fractional refill.
//!
//! ## Key Concepts
//!
//! * **Lock-Free Buckets**: A bucket's token count and refill timestamp share one
//!   atomic word, updated with a Compare-And-Swap loop.
//! * **Lazy Evaluation**: Refills are applied at the moment of the request. There
//!   are no background threads or timers.
//! * **Sharded Registry**: [`RateLimiterRegistry`] creates buckets on first sight of
//!   a client, exactly once, without a global lock across clients.
//! * **Strategy Trait**: A single bucket can be used directly as a keyless limiter.
//!
//! ## Example
//!
//! ```rust
//! use bucket_limit::RateLimiterRegistry;
//! use std::time::Duration;
//!
//! let registry = RateLimiterRegistry::new(Duration::from_secs(2), 2)?;
//!
//! assert!(registry.allow("203.0.113.7")?);
//! assert!(registry.allow("203.0.113.7")?);
//! assert!(!registry.allow("203.0.113.7")?);
//!
//! // Other clients are unaffected
//! assert!(registry.allow("198.51.100.4")?);
//! # Ok::<(), bucket_limit::LimitError>(())
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

mod config;
mod error;
mod metrics;
mod registry;
mod token_bucket;


pub use config::BucketConfig;
pub use error::LimitError;
pub use registry::RateLimiterRegistry;
pub use token_bucket::MAX_TOKEN_LIMIT;
pub use token_bucket::TokenBucket;

/// Reasons why a request might be rejected by a strategy.
#[derive(Debug, PartialEq)]
pub enum Reason {
    Overloaded { retry_after: Duration },
}

/// The core trait for keyless rate-limiting algorithms.
///
/// Strategies must be `Send` and `Sync` to allow sharing across thread boundaries
/// via `Arc`.
pub trait Strategy: Debug {
    /// Attempts to process a single request.
    ///
    /// This method is non-blocking and uses atomic operations to update
    /// internal state.
    ///
    /// # Errors
    ///
    /// Returns `Reason` if the rate limit has been reached.
    fn process(&self) -> ControlFlow<Reason>;
}

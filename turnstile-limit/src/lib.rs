//! # turnstile-limit
//!
//! `turnstile-limit` provides the local, in-memory half of request admission:
//! per-key token buckets held in a [`RateLimiterRegistry`].
//!
//! ## Core Philosophy
//!
//! Burst protection only needs to be "good enough" per node, so nothing here
//! coordinates across instances. A registry owns every bucket it creates,
//! behind a single lock, and a background [`Sweeper`] evicts keys that have
//! gone idle so that high key cardinality (many client addresses) cannot grow
//! memory without bound.
//!
//! ## Key Concepts
//!
//! * **Continuous Refill**: Tokens are recalculated lazily at the moment of the
//!   request from the elapsed time, never by a timer.
//! * **Idle Eviction**: A bucket untouched for longer than the idle TTL is
//!   dropped. The next request for that key starts from a full bucket.
//! * **Validated Configuration**: Non-positive rates and bursts are rejected when
//!   a [`LimiterConfig`] is built, never at request time.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use turnstile_limit::LimiterConfig;
//! use turnstile_limit::RateLimiterRegistry;
//!
//! let config = LimiterConfig::new(20.0, 40, Duration::from_secs(180)).unwrap();
//! let registry = RateLimiterRegistry::new(config);
//!
//! if registry.admit("ip:10.0.0.1").is_continue() {
//!     // Request allowed
//! }
//! ```

use std::ops::ControlFlow;
use std::time::Duration;

mod config;
mod error;
mod registry;
mod token_bucket;

pub use config::LimiterConfig;
pub use error::ConfigError;
pub use registry::RateLimiterRegistry;
pub use registry::Sweeper;
pub use token_bucket::TokenBucket;

/// Reasons why a request might be rejected by a limiter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reason {
    Overloaded { retry_after: Duration },
}

/// Outcome of a single admission check.
///
/// `Continue` admits the request, `Break` carries the reason it was refused.
pub type Admission = ControlFlow<Reason>;

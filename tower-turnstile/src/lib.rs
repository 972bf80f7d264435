//! # Tower Turnstile
//!
//! `tower-turnstile` protects an HTTP service built on
//! [Tower](https://github.com/tower-rs/tower) with three independent stages:
//!
//! 1. **Burst control**: [`RateLimitLayer`] admits requests through per-key
//!    token buckets held in a local [`turnstile_limit::RateLimiterRegistry`].
//!    Refused requests fail with [`TurnstileError::RateLimited`], which carries
//!    the time until the next token.
//! 2. **Usage quotas**: [`QuotaLayer`] counts requests per key over a long
//!    fixed window in a [`SharedStore`], so the cap holds across every server
//!    instance. Store outages let traffic through unless the rule says otherwise
//!    (see [`OutagePolicy`]).
//! 3. **Response caching**: [`ResponseCacheLayer`] replays stored `GET`
//!    responses and captures successful ones as they stream to the client.
//!    Mutating handlers keep it fresh through a [`CacheInvalidator`].
//!
//! The stages compose with [`ServiceBuilderExt`]; the first stage that refuses
//! a request short-circuits the rest. All errors are boxed as
//! [`tower::BoxError`] and turn into responses with [`error_response`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tower::ServiceBuilder;
//! use tower_turnstile::KeyFn;
//! use tower_turnstile::MemoryStore;
//! use tower_turnstile::QuotaAccountant;
//! use tower_turnstile::QuotaRule;
//! use tower_turnstile::ResponseCache;
//! use tower_turnstile::ServiceBuilderExt;
//! use turnstile_limit::LimiterConfig;
//! use turnstile_limit::RateLimiterRegistry;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let registry = Arc::new(RateLimiterRegistry::new(LimiterConfig::new(
//!     20.0,
//!     40,
//!     Duration::from_secs(180),
//! )?));
//! let _sweeper = registry.spawn_sweeper();
//!
//! let stack = ServiceBuilder::new()
//!     .keyed_rate_limit(registry, KeyFn::client_ip("ip"))
//!     .quota(
//!         QuotaAccountant::new(store.clone()),
//!         QuotaRule::new(1000, Duration::from_secs(86_400), KeyFn::user_daily_quota())?,
//!     )
//!     .response_cache(ResponseCache::new(store));
//! # let _ = stack;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`TurnstileError`] and reads route
//!   templates and client addresses from axum's request extensions.
//! - `redis`: Enables [`RedisStore`].
//! - `cli`: Builds the `stress_test` binary.

mod cache;
mod cache_body;
mod cache_entry;
mod cache_key;
mod cache_layer;
mod context;
mod error;
mod invalidate;
mod layer;
mod memory_store;
mod quota;
mod quota_layer;
#[cfg(feature = "redis")]
mod redis_store;
mod service;
mod store;
mod utils;


pub use cache::CacheTtls;
pub use cache::ResponseCache;
pub use cache_body::CacheBody;
pub use cache_entry::CacheEntry;
pub use cache_key::CacheKey;
pub use cache_key::Category;
pub use cache_layer::ResponseCacheLayer;
pub use cache_layer::ResponseCacheService;
pub use cache_layer::X_CACHE;
pub use context::ClientAddr;
pub use context::KeyFn;
pub use context::RequestContext;
pub use context::RouteTemplate;
pub use context::UserId;
pub use error::TurnstileError;
pub use error::error_response;
pub use invalidate::CacheInvalidator;
pub use layer::RateLimitLayer;
pub use memory_store::MemoryStore;
pub use quota::OutagePolicy;
pub use quota::QuotaAccountant;
pub use quota::QuotaDecision;
pub use quota::QuotaRule;
pub use quota::QuotaUsage;
pub use quota_layer::QuotaLayer;
pub use quota_layer::QuotaService;
pub use quota_layer::X_QUOTA_USED;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use service::RateLimitService;
pub use store::SharedStore;
pub use store::StoreError;
pub use store::StoreFuture;
pub use utils::ServiceBuilderExt;
pub use utils::make_pipeline_svc;

use std::sync::Arc;

use tower::Layer;
use turnstile_limit::RateLimiterRegistry;

use crate::context::KeyFn;
use crate::service::RateLimitService;

/// Applies a keyed rate limit to requests.
///
/// Several layers can be stacked (per address, per endpoint, per user); the
/// first one that refuses a request short-circuits the rest.
#[derive(Clone, Debug)]
pub struct RateLimitLayer {
    registry: Arc<RateLimiterRegistry>,
    key_fn: KeyFn,
}

impl RateLimitLayer {
    /// Create a RateLimitLayer
    pub fn new(registry: Arc<RateLimiterRegistry>, key_fn: KeyFn) -> Self {
        RateLimitLayer { registry, key_fn }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService::new(service, self.registry.clone(), self.key_fn.clone())
    }
}

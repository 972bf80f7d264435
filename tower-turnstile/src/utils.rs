use std::sync::Arc;

use bytes::Bytes;
use http::Request;
use http::Response;
use http_body::Body;
use tower::BoxError;
use tower::Service;
use tower::ServiceBuilder;
use tower::layer::util::Stack;
use tower::util::BoxCloneSyncService;

use turnstile_limit::RateLimiterRegistry;

use crate::CacheBody;
use crate::KeyFn;
use crate::QuotaAccountant;
use crate::QuotaLayer;
use crate::QuotaRule;
use crate::RateLimitLayer;
use crate::ResponseCache;
use crate::ResponseCacheLayer;

/// Rate limit, quota and cache in front of `svc`, in that order.
///
/// The authentication stage that sets [`UserId`](crate::UserId) belongs
/// between the rate limit and the quota; use [`ServiceBuilderExt`] directly to
/// place it there.
pub fn make_pipeline_svc<V, ReqBody, ResBody>(
    registry: Arc<RateLimiterRegistry>,
    key_fn: KeyFn,
    accountant: QuotaAccountant,
    rule: QuotaRule,
    cache: ResponseCache,
    svc: V,
) -> BoxCloneSyncService<Request<ReqBody>, Response<CacheBody<ResBody>>, BoxError>
where
    V: Service<Request<ReqBody>, Response = Response<ResBody>, Error = BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    V::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + 'static,
{
    BoxCloneSyncService::new(
        ServiceBuilder::new()
            .keyed_rate_limit(registry, key_fn)
            .quota(accountant, rule)
            .response_cache(cache)
            .service(svc),
    )
}

/// Service Builder Extension with additional useful functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Add a keyed rate limit layer
    fn keyed_rate_limit(
        self,
        registry: Arc<RateLimiterRegistry>,
        key_fn: KeyFn,
    ) -> ServiceBuilder<Stack<RateLimitLayer, L>>;

    /// Add a usage quota layer
    fn quota(self, accountant: QuotaAccountant, rule: QuotaRule)
    -> ServiceBuilder<Stack<QuotaLayer, L>>;

    /// Add a response cache layer
    fn response_cache(self, cache: ResponseCache) -> ServiceBuilder<Stack<ResponseCacheLayer, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn keyed_rate_limit(
        self,
        registry: Arc<RateLimiterRegistry>,
        key_fn: KeyFn,
    ) -> ServiceBuilder<Stack<RateLimitLayer, L>> {
        self.layer(RateLimitLayer::new(registry, key_fn))
    }

    fn quota(
        self,
        accountant: QuotaAccountant,
        rule: QuotaRule,
    ) -> ServiceBuilder<Stack<QuotaLayer, L>> {
        self.layer(QuotaLayer::new(accountant, rule))
    }

    fn response_cache(self, cache: ResponseCache) -> ServiceBuilder<Stack<ResponseCacheLayer, L>> {
        self.layer(ResponseCacheLayer::new(cache))
    }
}

use std::task::Context;
use std::task::Poll;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::HeaderName;
use http::HeaderValue;
use http::Request;
use http::Response;
use http_body::Body;
use tower::BoxError;
use tower::Layer;
use tower::Service;

use crate::cache::ResponseCache;
use crate::cache_body::CacheBody;
use crate::cache_body::Capture;
use crate::cache_key::CacheKey;
use crate::context::RequestContext;

/// `HIT` on responses replayed from the cache, `MISS` on responses that are
/// being stored. Absent on responses the cache did not handle.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Serves cacheable `GET` requests from a [`ResponseCache`].
#[derive(Clone, Debug)]
pub struct ResponseCacheLayer {
    cache: ResponseCache,
}

impl ResponseCacheLayer {
    pub fn new(cache: ResponseCache) -> Self {
        Self { cache }
    }
}

impl<S> Layer<S> for ResponseCacheLayer {
    type Service = ResponseCacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponseCacheService {
            inner,
            cache: self.cache.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResponseCacheService<S> {
    inner: S,
    cache: ResponseCache,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ResponseCacheService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + 'static,
{
    type Response = Response<CacheBody<ResBody>>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let key = CacheKey::derive(&RequestContext::from_request(&req));

        // Take the service that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let Some(key) = key else {
            let fut = inner.call(req);
            return Box::pin(async move {
                let response = fut.await.map_err(Into::into)?;
                Ok(response.map(CacheBody::passthrough))
            });
        };

        let cache = self.cache.clone();
        Box::pin(async move {
            if let Some(hit) = cache.lookup(&key).await {
                let (mut parts, body) = hit.into_parts();
                parts.headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
                return Ok(Response::from_parts(parts, CacheBody::cached(body)));
            }

            let response = inner.call(req).await.map_err(Into::into)?;
            if !response.status().is_success() {
                return Ok(response.map(CacheBody::passthrough));
            }

            let (mut parts, body) = response.into_parts();
            let capture = Capture {
                cache,
                key,
                status: parts.status,
                headers: parts.headers.clone(),
                skip: X_CACHE,
            };
            parts.headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
            Ok(Response::from_parts(parts, CacheBody::capturing(body, capture)))
        })
    }
}

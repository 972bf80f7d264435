use std::task::Context;
use std::task::Poll;

use futures::future::BoxFuture;
use http::HeaderName;
use http::Request;
use http::Response;
use tower::BoxError;
use tower::Layer;
use tower::Service;

use crate::context::RequestContext;
use crate::error::TurnstileError;
use crate::quota::QuotaAccountant;
use crate::quota::QuotaDecision;
use crate::quota::QuotaRule;

/// Set on metered responses as `used/limit`.
pub const X_QUOTA_USED: HeaderName = HeaderName::from_static("x-quota-used");

/// Charges every keyed request against a [`QuotaRule`].
#[derive(Clone, Debug)]
pub struct QuotaLayer {
    accountant: QuotaAccountant,
    rule: QuotaRule,
}

impl QuotaLayer {
    pub fn new(accountant: QuotaAccountant, rule: QuotaRule) -> Self {
        Self { accountant, rule }
    }
}

impl<S> Layer<S> for QuotaLayer {
    type Service = QuotaService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        QuotaService {
            inner,
            accountant: self.accountant.clone(),
            rule: self.rule.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct QuotaService<S> {
    inner: S,
    accountant: QuotaAccountant,
    rule: QuotaRule,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for QuotaService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let key = self.rule.key_fn().key(&RequestContext::from_request(&req));

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let Some(key) = key else {
            let fut = inner.call(req);
            return Box::pin(async move { fut.await.map_err(Into::into) });
        };

        let accountant = self.accountant.clone();
        let rule = self.rule.clone();
        Box::pin(async move {
            match accountant.charge(&key, &rule).await {
                QuotaDecision::Allowed(usage) => {
                    let mut response = inner.call(req).await.map_err(Into::into)?;
                    response
                        .headers_mut()
                        .insert(X_QUOTA_USED, usage.header_value());
                    Ok(response)
                }
                QuotaDecision::Unmetered => inner.call(req).await.map_err(Into::into),
                QuotaDecision::Denied(usage) => Err(Box::new(TurnstileError::QuotaExceeded {
                    used: usage.used,
                    limit: usage.limit,
                }) as BoxError),
                QuotaDecision::Unverified => {
                    Err(Box::new(TurnstileError::QuotaUnverified) as BoxError)
                }
            }
        })
    }
}

use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use http::Request;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;

use turnstile_limit::RateLimiterRegistry;
use turnstile_limit::Reason;

use crate::context::KeyFn;
use crate::context::RequestContext;
use crate::error::TurnstileError;

#[derive(Clone, Debug)]
struct RateLimitServiceMetrics {
    denied: Counter<u64>,
}

#[derive(Clone, Debug)]
pub struct RateLimitService<S> {
    inner: S,
    registry: Arc<RateLimiterRegistry>,
    key_fn: KeyFn,
    instruments: RateLimitServiceMetrics,
}

pin_project! {
    /// Either the inner service's future or an immediate refusal.
    #[project = ResponseFutureProj]
    pub enum ResponseFuture<F> {
        Called {
            #[pin]
            inner: F,
        },
        Rejected {
            error: TurnstileError,
        },
    }
}

impl<F, T, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    type Output = Result<T, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseFutureProj::Called { inner } => inner.poll(cx).map_err(Into::into),
            ResponseFutureProj::Rejected { error } => Poll::Ready(Err(Box::new(error.clone()))),
        }
    }
}

impl<S, ReqBody> Service<Request<ReqBody>> for RateLimitService<S>
where
    S: Service<Request<ReqBody>>,
    S::Error: Into<BoxError>,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // The bucket is only touched here; a request that never reaches
        // `call` costs no token.
        let key = self.key_fn.key(&RequestContext::from_request(&req));
        if let Some(key) = key
            && let ControlFlow::Break(reason) = self.registry.admit(&key)
        {
            let Reason::Overloaded { retry_after } = reason;
            tracing::warn!(key, ?retry_after, "rate limited");
            self.instruments
                .denied
                .add(1, &[KeyValue::new("reason", "burst")]);
            return ResponseFuture::Rejected {
                error: TurnstileError::RateLimited { retry_after },
            };
        }

        ResponseFuture::Called {
            inner: self.inner.call(req),
        }
    }
}

impl<S> RateLimitService<S> {
    pub fn new(inner: S, registry: Arc<RateLimiterRegistry>, key_fn: KeyFn) -> Self {
        let meter = global::meter("turnstile");
        let instruments = RateLimitServiceMetrics {
            denied: meter.u64_counter("turnstile.rate_limit.denied").build(),
        };

        Self {
            inner,
            registry,
            key_fn,
            instruments,
        }
    }
}

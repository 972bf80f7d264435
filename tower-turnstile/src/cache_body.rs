use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::task::ready;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::HeaderMap;
use http::HeaderName;
use http::StatusCode;
use http_body::Body;
use http_body::Frame;
use http_body::SizeHint;
use pin_project_lite::pin_project;

use crate::cache::ResponseCache;
use crate::cache_entry::CacheEntry;
use crate::cache_key::CacheKey;

/// What a captured response is stored as once its body has been read in full.
pub(crate) struct Capture {
    pub(crate) cache: ResponseCache,
    pub(crate) key: CacheKey,
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) skip: HeaderName,
}

pin_project! {
    /// Response body produced by the cache layer.
    ///
    /// Either replayed from the store, streamed from the handler while a
    /// copy is kept for the store, or forwarded untouched.
    pub struct CacheBody<B> {
        #[pin]
        kind: Kind<B>,
    }
}

pin_project! {
    #[project = KindProj]
    enum Kind<B> {
        Cached { data: Option<Bytes> },
        Capturing {
            #[pin]
            inner: B,
            buffer: Vec<u8>,
            capture: Option<Capture>,
            storing: Option<BoxFuture<'static, ()>>,
            done: bool,
        },
        Passthrough {
            #[pin]
            inner: B,
        },
    }
}

impl<B> CacheBody<B> {
    pub(crate) fn cached(data: Bytes) -> Self {
        Self {
            kind: Kind::Cached {
                data: (!data.is_empty()).then_some(data),
            },
        }
    }

    pub(crate) fn capturing(inner: B, capture: Capture) -> Self {
        Self {
            kind: Kind::Capturing {
                inner,
                buffer: Vec::new(),
                capture: Some(capture),
                storing: None,
                done: false,
            },
        }
    }

    pub(crate) fn passthrough(inner: B) -> Self {
        Self {
            kind: Kind::Passthrough { inner },
        }
    }
}

impl<B> Body for CacheBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project().kind.project() {
            KindProj::Cached { data } => Poll::Ready(data.take().map(|data| Ok(Frame::data(data)))),
            KindProj::Passthrough { inner } => inner.poll_frame(cx),
            KindProj::Capturing {
                mut inner,
                buffer,
                capture,
                storing,
                done,
            } => loop {
                if *done {
                    return Poll::Ready(None);
                }
                // End of stream is reported only once the entry is stored.
                if let Some(fut) = storing.as_mut() {
                    ready!(fut.as_mut().poll(cx));
                    *storing = None;
                    *done = true;
                    return Poll::Ready(None);
                }
                match ready!(inner.as_mut().poll_frame(cx)) {
                    Some(Ok(frame)) => {
                        if let (Some(data), Some(pending)) = (frame.data_ref(), capture.as_ref()) {
                            if buffer.len() + data.len() > pending.cache.max_entry_bytes() {
                                // Too large to cache; keep streaming without a copy.
                                *capture = None;
                                *buffer = Vec::new();
                            } else {
                                buffer.extend_from_slice(data);
                            }
                        }
                        return Poll::Ready(Some(Ok(frame)));
                    }
                    Some(Err(err)) => {
                        // A truncated body must never be cached.
                        *capture = None;
                        buffer.clear();
                        return Poll::Ready(Some(Err(err)));
                    }
                    None => match capture.take() {
                        Some(capture) => {
                            let entry = CacheEntry::from_parts(
                                capture.status,
                                &capture.headers,
                                buffer,
                                std::slice::from_ref(&capture.skip),
                            );
                            buffer.clear();
                            *storing = Some(capture.cache.store_detached(capture.key, entry));
                        }
                        None => {
                            *done = true;
                            return Poll::Ready(None);
                        }
                    },
                }
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            Kind::Cached { data } => data.is_none(),
            Kind::Passthrough { inner } => inner.is_end_stream(),
            Kind::Capturing {
                inner,
                capture,
                storing,
                done,
                ..
            } => *done || (capture.is_none() && storing.is_none() && inner.is_end_stream()),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Cached { data } => {
                SizeHint::with_exact(data.as_ref().map_or(0, |data| data.len() as u64))
            }
            Kind::Passthrough { inner } | Kind::Capturing { inner, .. } => inner.size_hint(),
        }
    }
}

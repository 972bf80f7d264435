use std::time::Duration;

use http::HeaderValue;
use http::Response;
use http::StatusCode;
use http::header;
use tower::BoxError;

/// Errors produced by the Turnstile middleware stack.
///
/// Admission denials are expected outcomes, not faults: they surface as
/// `429 Too Many Requests` with a JSON `{"message": ...}` body. Store
/// outages never appear here; each component degrades on its own instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TurnstileError {
    /// The caller exceeded its burst allowance.
    ///
    /// Converts to `429 Too Many Requests` with a `Retry-After` header.
    #[error("Too many requests. Please try again later.")]
    RateLimited {
        /// The duration to wait before retrying.
        retry_after: Duration,
    },

    /// The caller used up its quota for the current window.
    ///
    /// Converts to `429 Too Many Requests`.
    #[error("Usage quota exceeded. Please try again later.")]
    QuotaExceeded { used: u64, limit: u64 },

    /// The quota store could not be reached and the rule is configured to
    /// refuse traffic it cannot account for.
    ///
    /// Converts to `429 Too Many Requests`.
    #[error("Usage quota could not be verified. Please try again later.")]
    QuotaUnverified,

    /// An error raised further down the handler chain.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// Converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl TurnstileError {
    /// Recovers a `TurnstileError` from a boxed middleware error, wrapping
    /// anything else as [`TurnstileError::Inner`].
    pub fn from_boxed(err: BoxError) -> Self {
        match err.downcast::<TurnstileError>() {
            Ok(err) => *err,
            Err(other) => TurnstileError::Inner(other.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::RateLimited { .. } | Self::QuotaExceeded { .. } | Self::QuotaUnverified => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::Inner(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whole seconds for the `Retry-After` header, rounded up and never below 1.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } => {
                let mut secs = retry_after.as_secs();
                if retry_after.subsec_nanos() > 0 {
                    secs = secs.saturating_add(1);
                }
                Some(secs.max(1))
            }
            _ => None,
        }
    }

    /// Builds the HTTP response this error stands for.
    pub fn to_http_response<B>(&self) -> Response<B>
    where
        B: From<String>,
    {
        let body = serde_json::json!({ "message": self.to_string() }).to_string();
        let mut response = Response::new(B::from(body));
        *response.status_mut() = self.status();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(secs) = self.retry_after_secs() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Converts any error raised by the stack into its HTTP response.
///
/// Suitable as the handler of axum's `HandleErrorLayer`, or for any tower
/// stack that needs an infallible service.
pub fn error_response<B>(err: BoxError) -> Response<B>
where
    B: From<String>,
{
    TurnstileError::from_boxed(err).to_http_response()
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for TurnstileError {
    fn into_response(self) -> axum::response::Response {
        self.to_http_response::<axum::body::Body>()
    }
}

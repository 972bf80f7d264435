use std::time::Duration;

/// Configuration faults, raised while a limiter, quota rule or cache is being built.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The refill rate must be a finite number of tokens per second above zero.
    #[error("rate must be a positive, finite number of tokens per second; got {0}")]
    Rate(f64),

    /// The burst capacity must allow at least one request.
    #[error("burst must be at least 1")]
    Burst,

    /// Idle buckets must have a non-zero eviction horizon.
    #[error("idle ttl must be greater than zero; got {0:?}")]
    IdleTtl(Duration),

    /// A quota must allow at least one request per window.
    #[error("quota limit must be at least 1")]
    QuotaLimit,

    /// A quota window must have a non-zero length.
    #[error("quota window must be greater than zero; got {0:?}")]
    QuotaWindow(Duration),

    /// Cached responses must live for a non-zero time.
    #[error("cache ttl must be greater than zero; got {0:?}")]
    CacheTtl(Duration),
}

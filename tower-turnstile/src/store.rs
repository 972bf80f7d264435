//! Shared store contract used by the quota accountant and the response cache.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by every [`SharedStore`] operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Key/value store shared by every server instance.
///
/// Per-key operations are expected to be linearizable. Nothing is assumed
/// about ordering across different keys.
pub trait SharedStore
where
    Self: Send + Sync,
{
    /// Fetches the value stored under `key`, if any.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>>;

    /// Stores `value` under `key`, expiring after `ttl`.
    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>, ttl: Duration) -> StoreFuture<'a, ()>;

    /// Atomically increments the integer under `key`, creating it at 0 first if absent.
    fn incr<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64>;

    /// Sets the expiry of an existing key. Returns `false` (and does nothing) if it is absent.
    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> StoreFuture<'a, bool>;

    /// Lists every live key starting with `prefix`.
    fn scan<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<String>>;

    /// Deletes `key`. Returns whether it existed.
    fn del<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;
}

/// Error type produced by [`SharedStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backend-level failure (connection refused, protocol error, wrong value type).
    #[error("store backend failure: {message}")]
    Backend { message: String },

    /// The operation did not complete within its time budget.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// A stored value could not be encoded or decoded.
    #[error("store value could not be (de)serialized: {message}")]
    Serialization { message: String },
}

/// Runs a store operation under a deadline.
pub(crate) async fn bounded<T>(limit: Duration, op: StoreFuture<'_, T>) -> Result<T, StoreError> {
    tokio::time::timeout(limit, op)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

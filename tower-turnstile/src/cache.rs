//! Read-through response cache over a [`SharedStore`].
//!
//! The cache never fails a request. A store that errors or times out, an
//! entry that no longer decodes, and a key that is simply absent all look the
//! same from outside: a miss, after which the handler runs as usual.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::Response;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use serde::Deserialize;
use turnstile_limit::ConfigError;

use crate::cache_entry::CacheEntry;
use crate::cache_key::CacheKey;
use crate::cache_key::Category;
use crate::invalidate::CacheInvalidator;
use crate::store::SharedStore;
use crate::store::StoreError;
use crate::store::bounded;

const DEFAULT_TTL: Duration = Duration::from_secs(30);
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(100);
const DEFAULT_MAX_ENTRY_BYTES: usize = 1024 * 1024;

/// Time-to-live for each cache category.
///
/// ```rust
/// # use std::time::Duration;
/// # use tower_turnstile::CacheTtls;
/// # use tower_turnstile::Category;
/// let ttls: CacheTtls = serde_json::from_str(r#"{ "item_secs": 300 }"#).unwrap();
/// assert_eq!(ttls.get(Category::Item), Duration::from_secs(300));
/// assert_eq!(ttls.get(Category::List), Duration::from_secs(30));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawCacheTtls")]
pub struct CacheTtls {
    list: Duration,
    item: Duration,
    generic: Duration,
}

#[derive(Deserialize)]
#[serde(default)]
struct RawCacheTtls {
    list_secs: u64,
    item_secs: u64,
    generic_secs: u64,
}

impl Default for RawCacheTtls {
    fn default() -> Self {
        let secs = DEFAULT_TTL.as_secs();
        Self {
            list_secs: secs,
            item_secs: secs,
            generic_secs: secs,
        }
    }
}

impl TryFrom<RawCacheTtls> for CacheTtls {
    type Error = ConfigError;

    fn try_from(raw: RawCacheTtls) -> Result<Self, Self::Error> {
        CacheTtls::new(
            Duration::from_secs(raw.list_secs),
            Duration::from_secs(raw.item_secs),
            Duration::from_secs(raw.generic_secs),
        )
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            list: DEFAULT_TTL,
            item: DEFAULT_TTL,
            generic: DEFAULT_TTL,
        }
    }
}

impl CacheTtls {
    /// # Errors
    ///
    /// Returns [`ConfigError::CacheTtl`] if any of the durations is zero.
    pub fn new(list: Duration, item: Duration, generic: Duration) -> Result<Self, ConfigError> {
        for ttl in [list, item, generic] {
            if ttl.is_zero() {
                return Err(ConfigError::CacheTtl(ttl));
            }
        }
        Ok(Self {
            list,
            item,
            generic,
        })
    }

    pub fn get(&self, category: Category) -> Duration {
        match category {
            Category::List => self.list,
            Category::Item => self.item,
            Category::Generic => self.generic,
        }
    }

    fn set(&mut self, category: Category, ttl: Duration) {
        match category {
            Category::List => self.list = ttl,
            Category::Item => self.item = ttl,
            Category::Generic => self.generic = ttl,
        }
    }
}

#[derive(Clone, Debug)]
struct CacheMetrics {
    hit: Counter<u64>,
    miss: Counter<u64>,
    store_error: Counter<u64>,
}

/// Response cache shared by every clone of the cache layer.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn SharedStore>,
    ttls: CacheTtls,
    timeout: Duration,
    max_entry_bytes: usize,
    instruments: CacheMetrics,
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttls", &self.ttls)
            .field("timeout", &self.timeout)
            .field("max_entry_bytes", &self.max_entry_bytes)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        let meter = global::meter("turnstile");
        let instruments = CacheMetrics {
            hit: meter.u64_counter("turnstile.cache.hit").build(),
            miss: meter.u64_counter("turnstile.cache.miss").build(),
            store_error: meter.u64_counter("turnstile.cache.store_error").build(),
        };
        Self {
            store,
            ttls: CacheTtls::default(),
            timeout: DEFAULT_STORE_TIMEOUT,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            instruments,
        }
    }

    pub fn with_ttls(mut self, ttls: CacheTtls) -> Self {
        self.ttls = ttls;
        self
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::CacheTtl`] if `ttl` is zero.
    pub fn with_ttl(mut self, category: Category, ttl: Duration) -> Result<Self, ConfigError> {
        if ttl.is_zero() {
            return Err(ConfigError::CacheTtl(ttl));
        }
        self.ttls.set(category, ttl);
        Ok(self)
    }

    /// Time budget for each store operation; slower lookups are misses.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Largest body, in bytes, that is copied into the store (default 1 MiB).
    /// Bigger responses are still served, just never cached.
    pub fn with_max_entry_bytes(mut self, max: usize) -> Self {
        self.max_entry_bytes = max;
        self
    }

    pub fn max_entry_bytes(&self) -> usize {
        self.max_entry_bytes
    }

    pub fn ttls(&self) -> CacheTtls {
        self.ttls
    }

    /// An invalidator working on the same store.
    pub fn invalidator(&self) -> CacheInvalidator {
        CacheInvalidator::new(self.store.clone()).with_timeout(self.timeout)
    }

    /// Returns the stored response for `key`, or `None` on any kind of miss.
    pub async fn lookup(&self, key: &CacheKey) -> Option<Response<Bytes>> {
        let category = KeyValue::new("category", key.category().as_str());
        let bytes = match bounded(self.timeout, self.store.get(key.as_str())).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(%key, "cache miss");
                self.instruments.miss.add(1, &[category]);
                return None;
            }
            Err(error) => {
                tracing::warn!(%key, %error, "cache lookup failed; treating as miss");
                self.instruments
                    .store_error
                    .add(1, &[KeyValue::new("op", "get")]);
                self.instruments.miss.add(1, &[category]);
                return None;
            }
        };

        match CacheEntry::decode(&bytes).and_then(CacheEntry::into_response) {
            Ok(response) => {
                tracing::debug!(%key, "cache hit");
                self.instruments.hit.add(1, &[category]);
                Some(response)
            }
            Err(error) => {
                tracing::debug!(%key, %error, "cached entry unreadable; treating as miss");
                self.instruments.miss.add(1, &[category]);
                None
            }
        }
    }

    /// Stores `entry` under `key` with the TTL of the key's category.
    pub async fn store(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), StoreError> {
        let bytes = entry.encode()?;
        let ttl = self.ttls.get(key.category());
        bounded(self.timeout, self.store.set(key.as_str(), bytes, ttl)).await
    }

    /// Owned version of [`store`](Self::store) for use outside the request
    /// future. Failures are logged and dropped.
    pub(crate) fn store_detached(&self, key: CacheKey, entry: CacheEntry) -> BoxFuture<'static, ()> {
        let cache = self.clone();
        Box::pin(async move {
            match cache.store(&key, &entry).await {
                Ok(()) => tracing::debug!(%key, "cached response"),
                Err(error) => {
                    tracing::warn!(%key, %error, "could not cache response");
                    cache
                        .instruments
                        .store_error
                        .add(1, &[KeyValue::new("op", "set")]);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderMap;
    use http::StatusCode;
    use tokio::time::advance;
    use tokio::time::pause;

    use super::*;
    use crate::MemoryStore;
    use crate::store::test_support::FailingStore;
    use crate::store::test_support::HangingStore;

    fn entry(body: &str) -> CacheEntry {
        CacheEntry::from_parts(StatusCode::OK, &HeaderMap::new(), body.as_bytes(), &[])
    }

    #[test]
    fn ttls_default_to_thirty_seconds_and_reject_zero() {
        let ttls = CacheTtls::default();
        assert_eq!(ttls.get(Category::List), Duration::from_secs(30));
        assert_eq!(ttls.get(Category::Generic), Duration::from_secs(30));

        assert!(matches!(
            CacheTtls::new(Duration::from_secs(1), Duration::ZERO, Duration::from_secs(1)),
            Err(ConfigError::CacheTtl(_))
        ));
        assert!(serde_json::from_str::<CacheTtls>(r#"{ "list_secs": 0 }"#).is_err());

        let cache = ResponseCache::new(Arc::new(MemoryStore::new()));
        assert!(cache.with_ttl(Category::Item, Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn stored_entry_is_served_until_its_ttl() {
        pause();
        let store = MemoryStore::new();
        let cache = ResponseCache::new(Arc::new(store.clone()))
            .with_ttl(Category::List, Duration::from_secs(10))
            .unwrap();
        let key = CacheKey::list("events", "");

        assert!(cache.lookup(&key).await.is_none());
        cache.store(&key, &entry("[]")).await.unwrap();
        assert_eq!(store.ttl(key.as_str()), Some(Duration::from_secs(10)));

        let hit = cache.lookup(&key).await.unwrap();
        assert_eq!(hit.body().as_ref(), b"[]");

        advance(Duration::from_secs(11)).await;
        assert!(cache.lookup(&key).await.is_none());
    }

    #[tokio::test]
    async fn unreadable_entry_is_a_miss() {
        let store = MemoryStore::new();
        let cache = ResponseCache::new(Arc::new(store.clone()));
        let key = CacheKey::item("events", "/events/1");
        store
            .set(key.as_str(), b"\x01\x02garbage".to_vec(), Duration::ZERO)
            .await
            .unwrap();

        assert!(cache.lookup(&key).await.is_none());
    }

    #[tokio::test]
    async fn store_outage_is_a_miss() {
        let cache = ResponseCache::new(Arc::new(FailingStore));
        let key = CacheKey::list("events", "");

        assert!(cache.lookup(&key).await.is_none());
        assert!(cache.store(&key, &entry("[]")).await.is_err());
        // Detached stores swallow the failure.
        cache.store_detached(key, entry("[]")).await;
    }

    #[tokio::test]
    async fn slow_store_is_a_miss() {
        pause();
        let cache = ResponseCache::new(Arc::new(HangingStore));

        assert!(cache.lookup(&CacheKey::list("events", "")).await.is_none());
    }
}

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cache_key::CacheKey;
use crate::cache_key::Category;
use crate::cache_key::prefix;
use crate::store::SharedStore;
use crate::store::StoreError;
use crate::store::bounded;

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(100);

/// Drops cached responses after a write.
///
/// Mutating handlers call the relevant purge once their write has succeeded
/// and before they respond. Every purge returns the number of entries it
/// removed; a store failure is logged and counts as zero.
#[derive(Clone)]
pub struct CacheInvalidator {
    store: Arc<dyn SharedStore>,
    timeout: Duration,
}

impl fmt::Debug for CacheInvalidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheInvalidator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CacheInvalidator {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Every list page of `resource`.
    pub async fn purge_list(&self, resource: &str) -> usize {
        self.purge_prefix(&prefix(resource, Category::List)).await
    }

    /// Every item entry of `resource`.
    pub async fn purge_items(&self, resource: &str) -> usize {
        self.purge_prefix(&prefix(resource, Category::Item)).await
    }

    /// The single item entry for `/{resource}/{id}`.
    pub async fn purge_item(&self, resource: &str, id: &str) -> usize {
        let key = CacheKey::item(resource, &format!("/{resource}/{id}"));
        match bounded(self.timeout, self.store.del(key.as_str())).await {
            Ok(removed) => usize::from(removed),
            Err(error) => {
                tracing::warn!(%key, %error, "cache purge failed");
                0
            }
        }
    }

    async fn purge_prefix(&self, prefix: &str) -> usize {
        match self.try_purge_prefix(prefix).await {
            Ok(removed) => {
                tracing::debug!(prefix, removed, "purged cache entries");
                removed
            }
            Err(error) => {
                tracing::warn!(prefix, %error, "cache purge failed");
                0
            }
        }
    }

    async fn try_purge_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let keys = bounded(self.timeout, self.store.scan(prefix)).await?;
        let mut removed = 0;
        for key in &keys {
            if bounded(self.timeout, self.store.del(key)).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

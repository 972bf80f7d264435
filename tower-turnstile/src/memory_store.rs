//! In-process [`SharedStore`] for tests, demos and single-instance deployments.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::store::SharedStore;
use crate::store::StoreError;
use crate::store::StoreFuture;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

type StoreMap = Arc<RwLock<HashMap<String, Entry>>>;

/// Thread-safe store that keeps values in-process.
///
/// Expiry deadlines use the tokio clock, so paused-time tests can move past a
/// TTL with `tokio::time::advance`. Expired entries are invisible to every
/// operation and dropped the next time they are written or scanned.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining lifetime of `key`; `None` if absent, expired or without expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let map = self.0.read();
        let entry = map.get(key).filter(|e| e.is_live(now))?;
        entry.expires_at.map(|deadline| deadline - now)
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .0
            .read()
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn get_now(map: &StoreMap, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        map.read()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone())
    }

    fn set_now(map: &StoreMap, key: &str, value: Vec<u8>, ttl: Duration) {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        map.write()
            .insert(key.to_owned(), Entry { value, expires_at });
    }

    fn incr_now(map: &StoreMap, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut guard = map.write();
        let entry = guard
            .entry(key.to_owned())
            .and_modify(|e| {
                if !e.is_live(now) {
                    *e = Entry {
                        value: b"0".to_vec(),
                        expires_at: None,
                    };
                }
            })
            .or_insert_with(|| Entry {
                value: b"0".to_vec(),
                expires_at: None,
            });

        let current: i64 = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::Backend {
                message: format!("value at {key} is not an integer"),
            })?;
        let next = current.checked_add(1).ok_or_else(|| StoreError::Backend {
            message: format!("increment at {key} would overflow"),
        })?;
        entry.value = next.to_string().into_bytes();
        Ok(next)
    }

    fn expire_now(map: &StoreMap, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut guard = map.write();
        match guard.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            _ => false,
        }
    }

    fn scan_now(map: &StoreMap, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let mut guard = map.write();
        guard.retain(|_, e| e.is_live(now));
        guard
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn del_now(map: &StoreMap, key: &str) -> bool {
        let now = Instant::now();
        map.write().remove(key).is_some_and(|e| e.is_live(now))
    }
}

impl SharedStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move { Ok(Self::get_now(&self.0, key)) })
    }

    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            Self::set_now(&self.0, key, value, ttl);
            Ok(())
        })
    }

    fn incr<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64> {
        Box::pin(async move { Self::incr_now(&self.0, key) })
    }

    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(Self::expire_now(&self.0, key, ttl)) })
    }

    fn scan<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move { Ok(Self::scan_now(&self.0, prefix)) })
    }

    fn del<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(Self::del_now(&self.0, key)) })
    }
}

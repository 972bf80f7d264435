//! [`SharedStore`] backed by Redis, shared by every server instance.

use std::time::Duration;

use redis::aio::ConnectionManager;

use crate::store::SharedStore;
use crate::store::StoreError;
use crate::store::StoreFuture;

const SCAN_BATCH: usize = 100;

/// Redis-backed store over a reconnecting [`ConnectionManager`].
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend {
            message: err.to_string(),
        }
    }
}

impl RedisStore {
    /// Connects to the server at `url` (for example `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

// SCAN MATCH takes a glob; the prefix itself must match literally.
fn glob_escape(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl SharedStore for RedisStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            Ok(value)
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>, ttl: Duration) -> StoreFuture<'a, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if !ttl.is_zero() {
                cmd.arg("PX").arg(millis(ttl));
            }
            let _: () = cmd.query_async(&mut conn).await?;
            Ok(())
        })
    }

    fn incr<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let value: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
            Ok(value)
        })
    }

    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> StoreFuture<'a, bool> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let updated: bool = redis::cmd("PEXPIRE")
                .arg(key)
                .arg(millis(ttl))
                .query_async(&mut conn)
                .await?;
            Ok(updated)
        })
    }

    fn scan<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<String>> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let pattern = glob_escape(prefix);
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok(keys)
        })
    }

    fn del<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
            Ok(removed > 0)
        })
    }
}

//! Key/value stores for rendered waiting-room pages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::Row;
use tracing::{debug, instrument};

use super::CacheError;
use crate::clock::{Clock, duration_millis};
use crate::db::Database;

/// Storage seam for rendered pages.
///
/// Writers for the same key are expected to store equivalent bytes, so stores
/// only need last-writer-wins semantics.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the unexpired body stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores `body` under `key` for `ttl`, replacing any previous entry.
    async fn put(&self, key: &str, body: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Drops the entry under `key`. Returns whether an entry existed.
    ///
    /// Invalidating a missing key is not an error.
    async fn invalidate(&self, key: &str) -> Result<bool, CacheError>;
}

/// Page cache backed by the `page_cache` table.
#[derive(Debug, Clone)]
pub struct SqliteCacheStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SqliteCacheStore {
    /// Creates a store over `db`.
    #[must_use]
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Deletes expired rows and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn prune_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM page_cache WHERE expires_at <= ?")
            .bind(self.clock.now_millis())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let row = sqlx::query("SELECT body FROM page_cache WHERE cache_key = ? AND expires_at > ?")
            .bind(key)
            .bind(self.clock.now_millis())
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(|row| row.get("body")))
    }

    #[instrument(skip(self, body), fields(bytes = body.len()))]
    async fn put(&self, key: &str, body: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let now = self.clock.now_millis();
        sqlx::query(
            r"INSERT INTO page_cache (cache_key, body, stored_at, expires_at)
              VALUES (?, ?, ?, ?)
              ON CONFLICT(cache_key) DO UPDATE SET
                  body = excluded.body,
                  stored_at = excluded.stored_at,
                  expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(body)
        .bind(now)
        .bind(now.saturating_add(duration_millis(ttl)))
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM page_cache WHERE cache_key = ?")
            .bind(key)
            .execute(self.db.pool())
            .await?;
        let existed = result.rows_affected() > 0;
        debug!(existed, "invalidated page cache entry");
        Ok(existed)
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    body: Vec<u8>,
    expires_at: i64,
}

/// Process-local page cache, for single-instance deployments and tests.
#[derive(Debug)]
pub struct MemoryCacheStore {
    entries: DashMap<String, MemoryEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops expired entries and returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        debug!(removed, "pruned memory page cache");
        removed
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = self.clock.now_millis();
        // Clone out of the shard guard before touching the map again
        let entry = self.entries.get(key).map(|entry| entry.value().clone());
        match entry {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.body)),
            Some(_) => {
                self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, body: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let expires_at = self.clock.now_millis().saturating_add(duration_millis(ttl));
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                body: body.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }
}

//! TTL cache for the remote-backfilled chapter list of a content item.

use crate::clock::Clock;
use crate::error::StoreError;
use crate::model::Chapter;
use crate::store::{self, Decoded, KeyValueStore, Record};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Key namespace of cached chapter lists.
const KEY_PREFIX: &str = "chapters:";

/// The single cached secondary-language chapter list of a content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterCacheEntry {
    pub content_id: String,
    pub chapters: Vec<Chapter>,
    /// Unix timestamp in milliseconds of when the list was fetched.
    pub timestamp: u64,
}

impl Record for ChapterCacheEntry {
    const SCHEMA_VERSION: u32 = 1;
}

impl ChapterCacheEntry {
    /// Fresh iff it belongs to `content_id` and `now - timestamp < ttl`.
    pub fn is_fresh(&self, content_id: &str, now_ms: u64, ttl: Duration) -> bool {
        self.content_id == content_id
            && u128::from(now_ms.saturating_sub(self.timestamp)) < ttl.as_millis()
    }
}

/// Reads and writes [`ChapterCacheEntry`] records.
#[derive(Clone)]
pub struct ChapterCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl std::fmt::Debug for ChapterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChapterCache").field("ttl", &self.ttl).finish()
    }
}

impl ChapterCache {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    fn key(content_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, content_id)
    }

    /// Returns the cached entry only if it is fresh.
    ///
    /// Corrupt or unreadable-version entries are purged and reported as a miss.
    pub async fn load_fresh(&self, content_id: &str) -> Option<ChapterCacheEntry> {
        let key = Self::key(content_id);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(content_id, "chapter cache miss");
                return None;
            }
            Err(err) => {
                warn!(content_id, error = %err, "chapter cache read failed");
                return None;
            }
        };

        let entry = match store::decode::<ChapterCacheEntry>(&raw) {
            Decoded::Current(entry) | Decoded::Migrated { record: entry, .. } => entry,
            Decoded::Discarded { version } => {
                debug!(content_id, version, "purging chapter cache entry with foreign schema");
                self.purge(&key).await;
                return None;
            }
            Decoded::Corrupt(reason) => {
                warn!(content_id, reason = %reason, "purging corrupt chapter cache entry");
                self.purge(&key).await;
                return None;
            }
        };

        if entry.is_fresh(content_id, self.clock.now_ms(), self.ttl) {
            debug!(content_id, chapters = entry.chapters.len(), "chapter cache hit");
            Some(entry)
        } else {
            debug!(content_id, timestamp = entry.timestamp, "chapter cache entry stale");
            None
        }
    }

    /// Replaces the cached entry for `content_id` with a fresh one.
    pub async fn save(&self, content_id: &str, chapters: &[Chapter]) -> Result<(), StoreError> {
        let entry = ChapterCacheEntry {
            content_id: content_id.to_string(),
            chapters: chapters.to_vec(),
            timestamp: self.clock.now_ms(),
        };
        let encoded = store::encode(&entry)?;
        self.store.set(&Self::key(content_id), encoded).await
    }

    /// Drops the cached entry for `content_id`.
    pub async fn invalidate(&self, content_id: &str) -> Result<(), StoreError> {
        self.store.remove(&Self::key(content_id)).await
    }

    async fn purge(&self, key: &str) {
        if let Err(err) = self.store.remove(key).await {
            warn!(key, error = %err, "failed to purge chapter cache entry");
        }
    }
}

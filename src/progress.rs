//! Reading progress persistence.
//!
//! One record per content item, always overwritten. Writes are debounced
//! so rapid paging or strip scrolling collapses into a single write.

use crate::error::StoreError;
use crate::model::ReadingProgress;
use crate::store::{self, CoalescingWriter, Decoded, KeyValueStore, Record};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Key namespace of progress records.
const KEY_PREFIX: &str = "progress:";

/// Default debounce window for progress writes.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

impl Record for ReadingProgress {
    const SCHEMA_VERSION: u32 = 1;
}

/// Store of the single current progress record per content item.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    writer: CoalescingWriter,
    debounce: Duration,
}

impl ProgressStore {
    pub fn new(store: Arc<dyn KeyValueStore>, debounce: Duration) -> Self {
        Self {
            writer: CoalescingWriter::new(store),
            debounce,
        }
    }

    fn key(content_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, content_id)
    }

    /// Replaces the record for `progress.content_id` once the debounce window passes.
    pub fn upsert(&self, progress: &ReadingProgress) -> Result<(), StoreError> {
        let encoded = store::encode(progress)?;
        self.writer
            .schedule(&Self::key(&progress.content_id), encoded, self.debounce);
        Ok(())
    }

    /// Returns the current record, including a write still waiting in the debounce window.
    pub async fn read(&self, content_id: &str) -> Result<Option<ReadingProgress>, StoreError> {
        let key = Self::key(content_id);
        let raw = match self.writer.pending_value(&key) {
            Some(pending) => Some(pending),
            None => self.writer.store().get(&key).await?,
        };

        let Some(raw) = raw else {
            return Ok(None);
        };

        match store::decode::<ReadingProgress>(&raw) {
            Decoded::Current(progress) | Decoded::Migrated { record: progress, .. } => {
                Ok(Some(progress))
            }
            Decoded::Discarded { version } => {
                debug!(content_id, version, "ignoring progress record with foreign schema");
                Ok(None)
            }
            Decoded::Corrupt(reason) => {
                warn!(content_id, reason = %reason, "ignoring corrupt progress record");
                Ok(None)
            }
        }
    }

    /// Completion of `chapter_id` in percent, or 0 when the stored record is for another chapter.
    pub async fn completion_percent(
        &self,
        content_id: &str,
        chapter_id: &str,
    ) -> Result<u8, StoreError> {
        Ok(self
            .read(content_id)
            .await?
            .filter(|progress| progress.chapter_id == chapter_id)
            .map(|progress| progress.percent())
            .unwrap_or(0))
    }

    /// Persists any debounced write immediately.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.writer.flush().await
    }

    /// Deletes the record for `content_id`, including a pending write.
    pub async fn clear(&self, content_id: &str) -> Result<(), StoreError> {
        self.writer.remove(&Self::key(content_id)).await
    }
}

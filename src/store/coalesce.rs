//! Debounced writes over a [`KeyValueStore`].
//!
//! Each `schedule` call replaces any pending write for the same key and
//! restarts its timer, so only the latest value inside the window is
//! ever persisted. Writes to one key are serialized: a flush or removal
//! waits for a timer write that is already in flight.

use super::KeyValueStore;
use crate::error::StoreError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct PendingWrite {
    generation: u64,
    value: String,
    /// `None` for values put back after a failed write.
    timer: Option<JoinHandle<()>>,
}

impl PendingWrite {
    fn abort(self) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
    }
}

struct Shared {
    store: Arc<dyn KeyValueStore>,
    pending: Mutex<HashMap<String, PendingWrite>>,
    write_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    generation: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingWrite>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Per-key lock held for the duration of every store write.
    fn write_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.write_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Puts a value whose write failed back, unless a newer one is pending.
    fn restore(&self, key: &str, generation: u64, value: String) {
        self.lock()
            .entry(key.to_string())
            .or_insert(PendingWrite {
                generation,
                value,
                timer: None,
            });
    }
}

/// Cancel-and-reschedule writer. Must be used inside a tokio runtime.
#[derive(Clone)]
pub struct CoalescingWriter {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CoalescingWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoalescingWriter")
            .field("pending", &self.pending_keys())
            .finish()
    }
}

impl CoalescingWriter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                pending: Mutex::new(HashMap::new()),
                write_locks: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// The store this writer persists into.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.shared.store
    }

    /// Schedules `value` to be written under `key` after `delay`.
    ///
    /// A pending write for the same key is cancelled.
    pub fn schedule(&self, key: &str, value: String, delay: Duration) {
        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let mut pending = self.shared.lock();

        if let Some(previous) = pending.remove(key) {
            previous.abort();
            debug!(key, "coalesced pending write");
        }

        let shared = Arc::clone(&self.shared);
        let timer_key = key.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let write_lock = shared.write_lock(&timer_key);
            let _guard = write_lock.lock().await;

            let value = {
                let mut pending = shared.lock();
                match pending.get(&timer_key) {
                    Some(entry) if entry.generation == generation => {
                        pending.remove(&timer_key).map(|entry| entry.value)
                    }
                    _ => None,
                }
            };
            if let Some(value) = value {
                if let Err(err) = shared.store.set(&timer_key, value.clone()).await {
                    warn!(key = %timer_key, error = %err, "debounced write failed, keeping value pending");
                    shared.restore(&timer_key, generation, value);
                }
            }
        });

        pending.insert(
            key.to_string(),
            PendingWrite {
                generation,
                value,
                timer: Some(timer),
            },
        );
    }

    /// Returns the value waiting to be written under `key`, if any.
    pub fn pending_value(&self, key: &str) -> Option<String> {
        self.shared.lock().get(key).map(|entry| entry.value.clone())
    }

    /// Drops a pending write without persisting it.
    pub fn cancel(&self, key: &str) -> bool {
        match self.shared.lock().remove(key) {
            Some(entry) => {
                entry.abort();
                true
            }
            None => false,
        }
    }

    /// Drops any pending write for `key` and deletes the stored value,
    /// after a write already in flight has landed.
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let write_lock = self.shared.write_lock(key);
        let _guard = write_lock.lock().await;
        self.cancel(key);
        self.shared.store.remove(key).await
    }

    /// Keys with a write still pending.
    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.shared.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Persists every pending write immediately.
    ///
    /// Every key is attempted. Values that fail to write stay pending and
    /// the first error is returned.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let keys = self.pending_keys();
        let mut first_error = None;

        for key in keys {
            let write_lock = self.shared.write_lock(&key);
            let _guard = write_lock.lock().await;

            let entry = self.shared.lock().remove(&key);
            let Some(entry) = entry else {
                continue;
            };
            let PendingWrite {
                generation,
                value,
                timer,
            } = entry;
            if let Some(timer) = timer {
                timer.abort();
            }

            if let Err(err) = self.shared.store.set(&key, value.clone()).await {
                warn!(key = %key, error = %err, "flush failed, keeping value pending");
                self.shared.restore(&key, generation, value);
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Memory store counting `set` calls.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl KeyValueStore for CountingStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key).await
        }
    }

    const WINDOW: Duration = Duration::from_millis(500);

    #[tokio::test(start_paused = true)]
    async fn test_rapid_calls_coalesce_into_one_write() {
        let store = Arc::new(CountingStore::default());
        let writer = CoalescingWriter::new(store.clone());

        for page in 1..=10 {
            writer.schedule("progress:m1", format!("page {}", page), WINDOW);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
        assert_eq!(writer.pending_value("progress:m1"), Some("page 10".to_string()));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get("progress:m1").await.unwrap(),
            Some("page 10".to_string())
        );
        assert!(writer.pending_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_write_independently() {
        let store = Arc::new(CountingStore::default());
        let writer = CoalescingWriter::new(store.clone());

        writer.schedule("a", "1".to_string(), WINDOW);
        writer.schedule("b", "2".to_string(), WINDOW);
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.get("b").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_immediately() {
        let store = Arc::new(CountingStore::default());
        let writer = CoalescingWriter::new(store.clone());

        writer.schedule("a", "1".to_string(), WINDOW);
        writer.flush().await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_write() {
        let store = Arc::new(CountingStore::default());
        let writer = CoalescingWriter::new(store.clone());

        writer.schedule("a", "1".to_string(), WINDOW);
        assert!(writer.cancel("a"));
        assert!(!writer.cancel("a"));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    /// Memory store whose writes take time and can fail for one key.
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
        failing_key: Option<&'static str>,
    }

    impl SlowStore {
        fn new(delay: Duration, failing_key: Option<&'static str>) -> Self {
            Self {
                inner: MemoryStore::new(),
                delay,
                failing_key,
            }
        }
    }

    #[async_trait]
    impl KeyValueStore for SlowStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            if self.failing_key == Some(key) {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_lands_after_in_flight_write() {
        let store = Arc::new(SlowStore::new(Duration::from_millis(100), None));
        let writer = CoalescingWriter::new(store.clone());

        writer.schedule("k", "old".to_string(), WINDOW);
        // the timer fired and its write is still running
        tokio::time::sleep(Duration::from_millis(510)).await;

        writer.schedule("k", "new".to_string(), WINDOW);
        writer.flush().await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("new".to_string()));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), Some("new".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_waits_for_in_flight_write() {
        let store = Arc::new(SlowStore::new(Duration::from_millis(100), None));
        let writer = CoalescingWriter::new(store.clone());

        writer.schedule("k", "v".to_string(), WINDOW);
        tokio::time::sleep(Duration::from_millis(510)).await;

        writer.remove("k").await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_failure_keeps_value_and_writes_the_rest() {
        let store = Arc::new(SlowStore::new(Duration::ZERO, Some("bad")));
        let writer = CoalescingWriter::new(store.clone());

        writer.schedule("bad", "1".to_string(), WINDOW);
        writer.schedule("good", "2".to_string(), WINDOW);
        writer.schedule("other", "3".to_string(), WINDOW);

        assert!(writer.flush().await.is_err());
        assert_eq!(store.get("good").await.unwrap(), Some("2".to_string()));
        assert_eq!(store.get("other").await.unwrap(), Some("3".to_string()));
        assert_eq!(writer.pending_keys(), vec!["bad".to_string()]);
        assert_eq!(writer.pending_value("bad"), Some("1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_timer_write_stays_pending() {
        let store = Arc::new(SlowStore::new(Duration::ZERO, Some("bad")));
        let writer = CoalescingWriter::new(store.clone());

        writer.schedule("bad", "1".to_string(), WINDOW);
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(writer.pending_value("bad"), Some("1".to_string()));
        assert!(writer.flush().await.is_err());
        assert_eq!(writer.pending_keys(), vec!["bad".to_string()]);
    }
}

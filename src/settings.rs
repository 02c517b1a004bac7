//! Reader preference persistence.
//!
//! Settings are saved as one whole object, never as a diff. This assumes a
//! single logical writer: two interleaved `update` calls would lose one of
//! the changes.

use crate::error::StoreError;
use crate::model::ReaderSettings;
use crate::store::{self, Decoded, KeyValueStore, Record};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, warn};

/// Storage key of the settings record.
const SETTINGS_KEY: &str = "reader:settings";

impl Record for ReaderSettings {
    const SCHEMA_VERSION: u32 = 1;

    /// Older records are re-read with defaults filling any missing field.
    fn migrate(from_version: u32, mut raw: JsonValue) -> Option<Self> {
        if from_version > Self::SCHEMA_VERSION {
            return None;
        }
        if let Some(object) = raw.as_object_mut() {
            object.remove(store::SCHEMA_VERSION_FIELD);
        }
        serde_json::from_value(raw).ok()
    }
}

/// Loads and saves [`ReaderSettings`].
#[derive(Clone)]
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore").finish_non_exhaustive()
    }
}

impl SettingsStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Returns the persisted settings merged over the defaults.
    ///
    /// Unreadable records fall back to the defaults.
    pub async fn load(&self) -> Result<ReaderSettings, StoreError> {
        let Some(raw) = self.store.get(SETTINGS_KEY).await? else {
            return Ok(ReaderSettings::default());
        };

        let settings = match store::decode::<ReaderSettings>(&raw) {
            Decoded::Current(settings) => settings,
            Decoded::Migrated {
                from_version,
                record,
            } => {
                debug!(from_version, "migrated reader settings");
                record
            }
            Decoded::Discarded { version } => {
                warn!(version, "reader settings from a newer schema, using defaults");
                ReaderSettings::default()
            }
            Decoded::Corrupt(reason) => {
                warn!(reason = %reason, "corrupt reader settings, using defaults");
                ReaderSettings::default()
            }
        };
        Ok(settings.normalized())
    }

    /// Persists the entire settings object.
    pub async fn save(&self, next: &ReaderSettings) -> Result<(), StoreError> {
        let encoded = store::encode(&next.clone().normalized())?;
        self.store.set(SETTINGS_KEY, encoded).await
    }

    /// Loads, applies `change`, and saves the whole object back.
    pub async fn update<F>(&self, change: F) -> Result<ReaderSettings, StoreError>
    where
        F: FnOnce(&mut ReaderSettings),
    {
        let mut settings = self.load().await?;
        change(&mut settings);
        let settings = settings.normalized();
        self.save(&settings).await?;
        Ok(settings)
    }

    /// Removes persisted settings so the defaults apply again.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.store.remove(SETTINGS_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FitMode, ReadingDirection, ReadingMode};
    use crate::store::MemoryStore;

    fn settings_store() -> (Arc<MemoryStore>, SettingsStore) {
        let memory = Arc::new(MemoryStore::new());
        (memory.clone(), SettingsStore::new(memory))
    }

    #[tokio::test]
    async fn test_first_load_returns_defaults() {
        let (_memory, store) = settings_store();
        assert_eq!(store.load().await.unwrap(), ReaderSettings::default());
    }

    #[tokio::test]
    async fn test_save_persists_whole_object() {
        let (memory, store) = settings_store();
        let settings = ReaderSettings {
            mode: ReadingMode::LongStrip,
            direction: ReadingDirection::Rtl,
            fit: FitMode::Cover,
            auto_scroll_speed: 2.5,
            ..ReaderSettings::default()
        };
        store.save(&settings).await.unwrap();

        let raw = memory.get(SETTINGS_KEY).await.unwrap().unwrap();
        let value: JsonValue = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["schema_version"], 1);
        assert_eq!(value["mode"], "longStrip");
        assert_eq!(value["showPageNumbers"], true);

        assert_eq!(store.load().await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_partial_record_merges_over_defaults() {
        let (memory, store) = settings_store();
        memory
            .set(
                SETTINGS_KEY,
                r#"{"schema_version":1,"direction":"rtl"}"#.to_string(),
            )
            .await
            .unwrap();

        let settings = store.load().await.unwrap();
        assert_eq!(settings.direction, ReadingDirection::Rtl);
        assert_eq!(settings.mode, ReadingMode::SinglePage);
        assert_eq!(settings.auto_scroll_speed, 1.0);
    }

    #[tokio::test]
    async fn test_older_schema_is_migrated() {
        let (memory, store) = settings_store();
        memory
            .set(
                SETTINGS_KEY,
                r#"{"schema_version":0,"mode":"doublePage"}"#.to_string(),
            )
            .await
            .unwrap();

        assert_eq!(store.load().await.unwrap().mode, ReadingMode::DoublePage);
    }

    #[tokio::test]
    async fn test_newer_schema_and_corruption_fall_back_to_defaults() {
        let (memory, store) = settings_store();
        memory
            .set(
                SETTINGS_KEY,
                r#"{"schema_version":5,"mode":"doublePage"}"#.to_string(),
            )
            .await
            .unwrap();
        assert_eq!(store.load().await.unwrap(), ReaderSettings::default());

        memory.set(SETTINGS_KEY, "{".to_string()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), ReaderSettings::default());
    }

    #[tokio::test]
    async fn test_update_clamps_speed() {
        let (_memory, store) = settings_store();
        let updated = store
            .update(|settings| settings.auto_scroll_speed = 12.0)
            .await
            .unwrap();
        assert_eq!(updated.auto_scroll_speed, 5.0);
        assert_eq!(store.load().await.unwrap().auto_scroll_speed, 5.0);

        store.reset().await.unwrap();
        assert_eq!(store.load().await.unwrap(), ReaderSettings::default());
    }
}

//! Persistent key-value storage and the versioned record codec.
//!
//! Chapter cache entries, progress records and settings all live in one
//! key-value store, each under its own key namespace. Every value is a JSON
//! object carrying an explicit `schema_version` field next to the record's
//! own fields.

pub mod coalesce;

pub use coalesce::CoalescingWriter;

use crate::error::StoreError;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;

/// Field name carrying the record schema version.
pub const SCHEMA_VERSION_FIELD: &str = "schema_version";

/// Asynchronous key-value store holding serialized records.
///
/// Writes replace the whole value; a failed write leaves the previous value intact.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the serialized value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replaces the value stored under `key`.
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Deletes `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store, used for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns all keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }
}

/// Store keeping one JSON file per key inside a directory.
///
/// Writes go to a uniquely named temporary file in the same directory which
/// is then persisted over the target, so readers never observe a
/// half-written value.
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `directory`. The directory is created lazily.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("empty key".to_string()));
        }
        Ok(self.directory.join(format!("{}.json", escape_key(key))))
    }
}

/// Writes `data` to a fresh temporary file in `directory` and persists it
/// over `target`. Each write owns its temporary file, so concurrent writes
/// of one key cannot clobber each other's staging data.
fn write_atomic(directory: &Path, target: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut temp = NamedTempFile::new_in(directory)?;
    temp.write_all(data)?;
    temp.flush()?;
    temp.persist(target).map_err(|err| err.error)?;
    Ok(())
}

/// Maps a key onto a portable file name. Injective: `%` itself is escaped.
fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                escaped.push(byte as char)
            }
            _ => escaped.push_str(&format!("%{:02X}", byte)),
        }
    }
    escaped
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.directory).await?;

        let directory = self.directory.clone();
        tokio::task::spawn_blocking(move || write_atomic(&directory, &path, value.as_bytes()))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// A typed record persisted with an explicit schema version.
pub trait Record: Serialize + DeserializeOwned {
    /// Version written alongside every new record.
    const SCHEMA_VERSION: u32;

    /// Upgrades a record stored under an older (or unknown) version.
    ///
    /// `raw` still contains the `schema_version` field. Returning `None`
    /// discards the stored value.
    fn migrate(_from_version: u32, _raw: JsonValue) -> Option<Self> {
        None
    }
}

/// Outcome of decoding a stored value.
#[derive(Debug)]
pub enum Decoded<T> {
    /// Stored under the current schema version.
    Current(T),
    /// Stored under another version and upgraded by [`Record::migrate`].
    Migrated { from_version: u32, record: T },
    /// Stored under another version that cannot be upgraded.
    Discarded { version: u32 },
    /// Not a valid record at all.
    Corrupt(String),
}

impl<T> Decoded<T> {
    /// The usable record, if any.
    pub fn into_record(self) -> Option<T> {
        match self {
            Decoded::Current(record) | Decoded::Migrated { record, .. } => Some(record),
            Decoded::Discarded { .. } | Decoded::Corrupt(_) => None,
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    schema_version: u32,
    #[serde(flatten)]
    record: &'a T,
}

/// Serializes a record with its schema version.
pub fn encode<T: Record>(record: &T) -> Result<String, StoreError> {
    let envelope = Envelope {
        schema_version: T::SCHEMA_VERSION,
        record,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Deserializes a stored value, applying the version policy of `T`.
pub fn decode<T: Record>(raw: &str) -> Decoded<T> {
    let mut value: JsonValue = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => return Decoded::Corrupt(err.to_string()),
    };

    let version = match value
        .get(SCHEMA_VERSION_FIELD)
        .and_then(JsonValue::as_u64)
        .and_then(|v| u32::try_from(v).ok())
    {
        Some(version) => version,
        None => return Decoded::Corrupt(format!("missing {}", SCHEMA_VERSION_FIELD)),
    };

    if version != T::SCHEMA_VERSION {
        return match T::migrate(version, value) {
            Some(record) => Decoded::Migrated {
                from_version: version,
                record,
            },
            None => Decoded::Discarded { version },
        };
    }

    if let Some(object) = value.as_object_mut() {
        object.remove(SCHEMA_VERSION_FIELD);
    }
    match serde_json::from_value(value) {
        Ok(record) => Decoded::Current(record),
        Err(err) => Decoded::Corrupt(err.to_string()),
    }
}

//! Local key-value persistence
//!
//! Stand-in for browser `localStorage`: string values by key, with the JSON
//! codec applied at the [`LocalStore`] boundary. Two backends:
//! - [`FileStore`]: one JSON object on disk (`store.json` in the data dir)
//! - [`MemoryStore`]: process-local, for tests and ephemeral sessions

use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

const STORE_FILE: &str = "store.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("value for key {key:?} could not be encoded/decoded: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage lock poisoned")]
    Poisoned,
}

/// Raw string key-value backend
pub trait KeyValueStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_raw(&self, key: &str, value: String) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// =============================================================================
// MemoryStore
// =============================================================================

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

// =============================================================================
// FileStore
// =============================================================================

/// JSON file backend. The whole map is loaded at open and rewritten on every
/// mutation; values are small (schedule, counters, preferences).
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open `store.json` inside `data_dir`. A missing or unreadable file
    /// starts an empty store.
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        let path = data_dir.as_ref().join(STORE_FILE);
        let entries = Self::load_from_disk(&path);
        tracing::debug!("Opened local store at {} ({} keys)", path.display(), entries.len());
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> BTreeMap<String, String> {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Ignoring corrupt store {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        }
    }

    fn save_to_disk(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries).map_err(|source| StorageError::Codec {
            key: STORE_FILE.to_string(),
            source,
        })?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        let mut next = entries.clone();
        next.insert(key.to_string(), value);
        self.save_to_disk(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        if entries.remove(key).is_some() {
            self.save_to_disk(&entries)?;
        }
        Ok(())
    }
}

// =============================================================================
// LocalStore - typed facade
// =============================================================================

/// Typed handle over a [`KeyValueStore`]. Cheap to clone.
#[derive(Clone)]
pub struct LocalStore {
    backend: Arc<dyn KeyValueStore>,
}

impl LocalStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn open_file(data_dir: impl AsRef<Path>) -> Self {
        Self::new(Arc::new(FileStore::open(data_dir)))
    }

    /// Load a value. Missing key is `Ok(None)`; an undecodable value is an error.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.backend.get_raw(key)? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|source| StorageError::Codec {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Load a value, falling back to `T::default()` when missing or corrupt.
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.load(key) {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(e) => {
                tracing::warn!("Discarding stored {}: {}", key, e);
                T::default()
            }
        }
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let json = serde_json::to_string(value).map_err(|source| StorageError::Codec {
            key: key.to_string(),
            source,
        })?;
        self.backend.set_raw(key, json)
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.remove(key)
    }

    pub fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.backend.get_raw(key)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize, Default)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn memory_store_round_trip() {
        let store = LocalStore::in_memory();
        let value = Sample {
            name: "fajr".to_string(),
            count: 2,
        };
        store.save("sample", &value).unwrap();
        assert_eq!(store.load::<Sample>("sample").unwrap(), Some(value));
        store.remove("sample").unwrap();
        assert!(!store.contains("sample").unwrap());
    }

    #[test]
    fn missing_key_is_none() {
        let store = LocalStore::in_memory();
        assert_eq!(store.load::<Sample>("nope").unwrap(), None);
    }

    #[test]
    fn corrupt_value_is_codec_error() {
        let backend = Arc::new(MemoryStore::new());
        backend.set_raw("sample", "{not json".to_string()).unwrap();
        let store = LocalStore::new(backend);

        let err = store.load::<Sample>("sample").unwrap_err();
        assert!(matches!(err, StorageError::Codec { ref key, .. } if key == "sample"));
        assert_eq!(store.load_or_default::<Sample>("sample"), Sample::default());
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalStore::open_file(dir.path());
            store.save("theme", &"dark").unwrap();
        }
        let reopened = LocalStore::open_file(dir.path());
        assert_eq!(
            reopened.load::<String>("theme").unwrap().as_deref(),
            Some("dark")
        );
    }

    #[test]
    fn file_store_tolerates_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(STORE_FILE), "garbage").unwrap();
        let store = FileStore::open(dir.path());
        assert_eq!(store.get_raw("anything").unwrap(), None);
    }

    #[test]
    fn file_store_creates_missing_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let store = FileStore::open(&nested);
        store.set_raw("k", "\"v\"".to_string()).unwrap();
        assert!(nested.join(STORE_FILE).exists());
    }
}

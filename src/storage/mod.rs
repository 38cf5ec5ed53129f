//! Local key-value storage
//!
//! Conversations and the analytics aggregate are kept as JSON text under
//! two well-known keys. The default backend is an embedded `sled` database
//! in the platform data directory; an in-memory map stands in when the
//! database cannot be opened so the chat keeps working without persistence.

use crate::config::StorageConfig;
use crate::error::{HelpdeskError, Result};
use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Key holding the serialized conversation list and active conversation id
pub const CONVERSATIONS_KEY: &str = "chat_conversations";

/// Key holding the serialized analytics aggregate
pub const ANALYTICS_KEY: &str = "support_analytics";

/// Attempts made while another handle still holds the database lock
const LOCK_RETRY_ATTEMPTS: u32 = 9;

/// First backoff delay; doubled after each attempt
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(10);

/// String-keyed store of UTF-8 text values
#[cfg_attr(test, mockall::automock)]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// `sled`-backed store
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open (or create) a database at `path`
    ///
    /// sled releases its file lock shortly after the last handle drops, so a
    /// locked database is retried with a bounded backoff before giving up.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use helpdesk::storage::{KeyValueStore, SledStore};
    ///
    /// # fn main() -> helpdesk::error::Result<()> {
    /// let store = SledStore::open("/tmp/helpdesk-state")?;
    /// store.set("greeting", "hello")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    HelpdeskError::Storage(format!("Failed to create data directory: {}", e))
                })?;
            }
        }

        let mut delay = LOCK_RETRY_DELAY;
        let mut attempt = 1;
        loop {
            match sled::open(path) {
                Ok(db) => return Ok(Self { db }),
                Err(e) if attempt < LOCK_RETRY_ATTEMPTS && is_lock_contention(&e) => {
                    tracing::debug!(attempt, ?delay, "State database locked, retrying");
                    std::thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(
                        HelpdeskError::Storage(format!("Failed to open database: {}", e)).into(),
                    )
                }
            }
        }
    }
}

fn is_lock_contention(err: &sled::Error) -> bool {
    match err {
        sled::Error::Io(io) => {
            io.kind() == std::io::ErrorKind::WouldBlock
                || io.to_string().contains("could not acquire lock")
        }
        _ => false,
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self
            .db
            .get(key.as_bytes())
            .map_err(|e| HelpdeskError::Storage(format!("Get failed: {}", e)))?
        {
            Some(bytes) => {
                let text = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    HelpdeskError::Storage(format!("Stored value is not UTF-8: {}", e))
                })?;
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| HelpdeskError::Storage(format!("Insert failed: {}", e)))?;

        self.db
            .flush()
            .map_err(|e| HelpdeskError::Storage(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| HelpdeskError::Storage(format!("Remove failed: {}", e)))?;

        self.db
            .flush()
            .map_err(|e| HelpdeskError::Storage(format!("Flush failed: {}", e)))?;

        Ok(())
    }
}

/// Process-local store; contents are lost on exit
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| HelpdeskError::Storage("Memory store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| HelpdeskError::Storage("Memory store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| HelpdeskError::Storage("Memory store lock poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// Default database location in the user's data directory
pub fn default_db_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "helpdesk", "helpdesk")
        .ok_or_else(|| HelpdeskError::Storage("Could not determine data directory".into()))?;
    Ok(proj_dirs.data_dir().join("state.db"))
}

/// Open the configured store, falling back to memory on failure
pub fn open_store(config: &StorageConfig) -> Arc<dyn KeyValueStore> {
    let path = match &config.path {
        Some(path) => Ok(path.clone()),
        None => default_db_path(),
    };

    match path.and_then(|p| SledStore::open(p)) {
        Ok(store) => {
            tracing::debug!("Opened local state database");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                "Local state unavailable (is another helpdesk running?), nothing will persist: {}",
                e
            );
            Arc::new(MemoryStore::new())
        }
    }
}

/// Read and decode a JSON value
pub fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(text) => {
            let value = serde_json::from_str(&text).map_err(|e| {
                HelpdeskError::Storage(format!("Deserialization of '{}' failed: {}", key, e))
            })?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Encode and write a JSON value
pub fn save_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let text = serde_json::to_string(value)
        .map_err(|e| HelpdeskError::Storage(format!("Serialization failed: {}", e)))?;
    store.set(key, &text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    fn create_test_store() -> (SledStore, tempfile::TempDir) {
        let dir = tempdir().expect("failed to create tempdir");
        let store = SledStore::open(dir.path().join("state.db")).expect("failed to open store");
        (store, dir)
    }

    #[test]
    fn test_sled_store_set_and_get() {
        let (store, _dir) = create_test_store();
        store.set(CONVERSATIONS_KEY, "[]").expect("set failed");
        assert_eq!(
            store.get(CONVERSATIONS_KEY).expect("get failed"),
            Some("[]".to_string())
        );
    }

    #[test]
    fn test_sled_store_missing_key_is_none() {
        let (store, _dir) = create_test_store();
        assert!(store.get("absent").expect("get failed").is_none());
    }

    #[test]
    fn test_sled_store_remove_is_idempotent() {
        let (store, _dir) = create_test_store();
        store.set(ANALYTICS_KEY, "{}").expect("set failed");
        store.remove(ANALYTICS_KEY).expect("remove failed");
        store.remove(ANALYTICS_KEY).expect("second remove failed");
        assert!(store.get(ANALYTICS_KEY).expect("get failed").is_none());
    }

    #[test]
    fn test_sled_store_survives_reopen() {
        let dir = tempdir().expect("failed to create tempdir");
        let path = dir.path().join("state.db");
        {
            let store = SledStore::open(&path).expect("open failed");
            store.set("k", "persisted").expect("set failed");
        }
        let store = SledStore::open(&path).expect("reopen failed");
        assert_eq!(store.get("k").expect("get failed"), Some("persisted".into()));
    }

    #[test]
    fn test_sled_store_reopens_right_after_drop() {
        let dir = tempdir().expect("failed to create tempdir");
        let path = dir.path().join("state.db");
        for round in 0..20 {
            let store = SledStore::open(&path).expect("reopen failed");
            if round > 0 {
                assert_eq!(
                    store.get("round").expect("get failed"),
                    Some((round - 1).to_string())
                );
            }
            store.set("round", &round.to_string()).expect("set failed");
        }
    }

    #[test]
    fn test_sled_store_waits_for_held_lock() {
        let dir = tempdir().expect("failed to create tempdir");
        let path = dir.path().join("state.db");
        let holder = SledStore::open(&path).expect("open failed");
        holder.set("k", "from holder").expect("set failed");

        let release = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            drop(holder);
        });
        let store = SledStore::open(&path).expect("open after release failed");
        release.join().unwrap();
        assert_eq!(store.get("k").expect("get failed"), Some("from holder".into()));
    }

    #[test]
    fn test_lock_contention_detection() {
        let locked = sled::Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "could not acquire lock on \"state.db/db\": WouldBlock",
        ));
        let would_block = sled::Error::Io(std::io::ErrorKind::WouldBlock.into());
        let missing = sled::Error::Io(std::io::ErrorKind::NotFound.into());
        assert!(is_lock_contention(&locked));
        assert!(is_lock_contention(&would_block));
        assert!(!is_lock_contention(&missing));
        assert!(!is_lock_contention(&sled::Error::Unsupported("x".into())));
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v".to_string()));
        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_json_helpers() {
        let store = MemoryStore::new();
        let sample = Sample {
            name: "printer".into(),
            count: 3,
        };
        save_json(&store, "sample", &sample).unwrap();
        let loaded: Option<Sample> = load_json(&store, "sample").unwrap();
        assert_eq!(loaded, Some(sample));
    }

    #[test]
    fn test_load_json_rejects_malformed_text() {
        let store = MemoryStore::new();
        store.set("sample", "{not json").unwrap();
        let result: Result<Option<Sample>> = load_json(&store, "sample");
        assert!(result.is_err());
    }

    #[test]
    fn test_open_store_with_explicit_path() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            path: Some(dir.path().join("nested").join("state.db")),
        };
        let store = open_store(&config);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn test_mock_store_failure_surfaces_as_error() {
        let mut mock = MockKeyValueStore::new();
        mock.expect_get()
            .returning(|_| Err(HelpdeskError::Storage("disk gone".into()).into()));
        let result: Result<Option<Sample>> = load_json(&mock, "sample");
        assert!(result.is_err());
    }
}

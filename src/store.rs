//! Local key-value store
//!
//! Every piece of persisted state lives under a single key as one JSON
//! document in a SQLite table. Reads never fail from the caller's point of
//! view: a missing or malformed value yields the caller's fallback, and a
//! failed write is logged rather than raised. Keys are always written
//! wholesale.

use crate::error::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Keys of the persisted records
pub mod keys {
    pub const CREDENTIALS: &str = "credentials";
    pub const SESSION: &str = "session";
    pub const HABITS: &str = "habits";
    pub const ENTRIES: &str = "entries";
    pub const SYNC_CONFIG: &str = "sync_config";
    pub const PENDING_DAYS: &str = "pending_days";
}

/// File name of the store inside the data directory
pub const DB_FILE: &str = "habits.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

/// Shared handle to the local store. Cloning is cheap; all clones share
/// one connection.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl LocalStore {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        log::debug!("Opened local store at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open the store file inside a data directory
    pub fn open_in_dir(data_dir: &Path) -> Result<Self> {
        Self::open(&data_dir.join(DB_FILE))
    }

    /// Create a throwaway in-memory store
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Path of the backing file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read_text(&self, key: &str) -> Option<String> {
        let conn = self.conn.lock();
        let result = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional();

        match result {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Failed to read '{}' from local store: {}", key, e);
                None
            }
        }
    }

    fn write_text(&self, key: &str, text: &str) {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, text, chrono::Utc::now().timestamp_millis()],
        );

        if let Err(e) = result {
            log::error!("Failed to write '{}' to local store: {}", key, e);
        }
    }

    /// Raw JSON under `key`, or `None` when absent or unparsable
    pub fn load_raw(&self, key: &str) -> Option<Value> {
        let text = self.read_text(key)?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Corrupt JSON under '{}', using fallback: {}", key, e);
                None
            }
        }
    }

    /// Typed value under `key`, or `fallback` when absent or malformed
    pub fn load<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        let Some(raw) = self.load_raw(key) else {
            return fallback;
        };

        match serde_json::from_value(raw) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Unexpected shape under '{}', using fallback: {}", key, e);
                fallback
            }
        }
    }

    /// Overwrite `key` with `value`
    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(text) => self.write_text(key, &text),
            Err(e) => log::error!("Failed to serialize '{}': {}", key, e),
        }
    }

    /// Delete `key` if present
    pub fn remove(&self, key: &str) {
        let conn = self.conn.lock();
        if let Err(e) = conn.execute("DELETE FROM kv WHERE key = ?1", params![key]) {
            log::error!("Failed to remove '{}' from local store: {}", key, e);
        }
    }

    /// Whether anything is stored under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.read_text(key).is_some()
    }

    #[cfg(test)]
    pub(crate) fn write_raw_text(&self, key: &str, text: &str) {
        self.write_text(key, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_save_and_load() {
        let store = LocalStore::in_memory().unwrap();
        let sample = Sample {
            name: "walk".to_string(),
            count: 3,
        };
        store.save("sample", &sample);

        let loaded: Sample = store.load(
            "sample",
            Sample {
                name: String::new(),
                count: 0,
            },
        );
        assert_eq!(loaded, sample);
    }

    #[test]
    fn test_missing_key_returns_fallback() {
        let store = LocalStore::in_memory().unwrap();
        let loaded: Vec<String> = store.load("nothing", vec!["x".to_string()]);
        assert_eq!(loaded, vec!["x".to_string()]);
        assert!(!store.contains("nothing"));
    }

    #[test]
    fn test_corrupt_json_returns_fallback() {
        let store = LocalStore::in_memory().unwrap();
        store.write_raw_text("broken", "{not json");

        assert!(store.load_raw("broken").is_none());
        let loaded: Vec<u32> = store.load("broken", vec![7]);
        assert_eq!(loaded, vec![7]);
    }

    #[test]
    fn test_wrong_shape_returns_fallback() {
        let store = LocalStore::in_memory().unwrap();
        store.save("numbers", &serde_json::json!({"a": 1}));

        let loaded: Vec<u32> = store.load("numbers", Vec::new());
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_overwrite_and_remove() {
        let store = LocalStore::in_memory().unwrap();
        store.save("k", &1);
        store.save("k", &2);
        assert_eq!(store.load("k", 0), 2);

        store.remove("k");
        assert_eq!(store.load("k", 0), 0);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalStore::open_in_dir(dir.path()).unwrap();
            store.save("days", &vec!["2024-01-05"]);
        }

        let store = LocalStore::open_in_dir(dir.path()).unwrap();
        let days: Vec<String> = store.load("days", Vec::new());
        assert_eq!(days, vec!["2024-01-05".to_string()]);
        assert_eq!(store.path(), Some(dir.path().join(DB_FILE).as_path()));
    }
}

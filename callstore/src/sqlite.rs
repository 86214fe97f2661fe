//! SQLite store backend

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::{KvStore, StoreError, StoreResult, now_ms};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    key        TEXT PRIMARY KEY,
    value      BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);
";

/// Persistent store backed by a single SQLite table
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given database file
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "Opened call store");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl KvStore for SqliteStore {
    fn has(&self, key: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM records WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM records WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        debug!(%key, len = value.len(), "SqliteStore::put: called");
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO records (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now_ms()],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        debug!(%key, "SqliteStore::delete: called");
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM records WHERE key = ?1", params![key])?;
        Ok(changed > 0)
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT key FROM records WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_roundtrip_in_memory() {
        let store = SqliteStore::open_in_memory().unwrap();

        store.put("sector/1", b"{}").unwrap();
        assert!(store.has("sector/1").unwrap());
        assert_eq!(store.get("sector/1").unwrap(), Some(b"{}".to_vec()));
        assert_eq!(store.get("sector/2").unwrap(), None);

        store.put("sector/1", b"[]").unwrap();
        assert_eq!(store.get("sector/1").unwrap(), Some(b"[]".to_vec()));

        assert!(store.delete("sector/1").unwrap());
        assert!(!store.has("sector/1").unwrap());
    }

    #[test]
    fn test_survives_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("calls.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put("call/a", b"running").unwrap();
            store.put("call/b", b"running").unwrap();
            store.put("sector/9", b"w").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.list("call/").unwrap(),
            vec!["call/a".to_string(), "call/b".to_string()]
        );
        assert_eq!(store.list("sector/").unwrap().len(), 1);
    }
}

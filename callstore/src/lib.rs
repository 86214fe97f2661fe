//! CallStore - key-value record store for scheduler call tracking
//!
//! The scheduler treats persistence as an opaque collaborator: records are
//! addressed by string keys and stored as bytes. Two backends are provided:
//!
//! - [`MemoryStore`] - process-local, used by tests and ephemeral runs
//! - [`SqliteStore`] - single-table SQLite database that survives restarts
//!
//! Typed access goes through [`KvStoreExt`], which (de)serializes JSON.

mod error;
mod memory;
mod sqlite;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Current time as unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Byte-oriented key-value store
///
/// Implementations must be safe to share between tasks; every method takes
/// `&self` and serializes internally.
pub trait KvStore: Send + Sync {
    /// Check whether a key exists
    fn has(&self, key: &str) -> StoreResult<bool>;

    /// Fetch the value stored under a key
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Insert or overwrite a value
    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove a key, returning whether it existed
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// List keys starting with `prefix`, in ascending key order
    fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// JSON helpers available on every [`KvStore`]
pub trait KvStoreExt: KvStore {
    /// Fetch and deserialize a JSON record
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Serialize and store a JSON record
    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, &bytes)
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        worker: String,
        count: u32,
    }

    #[test]
    fn test_json_helpers_on_trait_object() {
        let store: Box<dyn KvStore> = Box::new(MemoryStore::new());

        let sample = Sample {
            worker: "w-1".to_string(),
            count: 3,
        };
        store.put_json("sector/7", &sample).unwrap();

        let loaded: Option<Sample> = store.get_json("sector/7").unwrap();
        assert_eq!(loaded, Some(sample));

        let missing: Option<Sample> = store.get_json("sector/8").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_get_json_rejects_garbage() {
        let store = MemoryStore::new();
        store.put("bad", b"not json").unwrap();

        let result: StoreResult<Option<Sample>> = store.get_json("bad");
        assert!(matches!(result, Err(StoreError::Json(_))));
    }
}

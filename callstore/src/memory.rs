//! In-memory store backend

use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::debug;

use crate::{KvStore, StoreError, StoreResult};

/// Process-local store backed by an ordered map
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    fn has(&self, key: &str) -> StoreResult<bool> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.contains_key(key))
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        debug!(%key, len = value.len(), "MemoryStore::put: called");
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        records.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        debug!(%key, "MemoryStore::delete: called");
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        Ok(records.remove(key).is_some())
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let store = MemoryStore::new();
        assert!(!store.has("a").unwrap());

        store.put("a", b"1").unwrap();
        assert!(store.has("a").unwrap());
        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));

        // Overwrite
        store.put("a", b"2").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.len(), 1);

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_list_by_prefix() {
        let store = MemoryStore::new();
        store.put("call/2", b"x").unwrap();
        store.put("call/1", b"x").unwrap();
        store.put("sector/1", b"x").unwrap();
        store.put("calm", b"x").unwrap();

        let calls = store.list("call/").unwrap();
        assert_eq!(calls, vec!["call/1".to_string(), "call/2".to_string()]);

        let all = store.list("").unwrap();
        assert_eq!(all.len(), 4);
    }
}

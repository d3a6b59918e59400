//! In-memory local store for testing.

use crate::error::{StorageError, StorageResult};
use crate::store::{EntityKey, LocalStore, LocalType};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory local store.
///
/// This store keeps all records in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral sessions that don't need persistence
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use strata_storage::{EntityKey, InMemoryLocalStore, LocalStore, LocalType};
///
/// let store = InMemoryLocalStore::new();
/// let key = EntityKey::new("story-1").unwrap();
/// store.put(LocalType::Cache, &key, b"digest").unwrap();
/// assert_eq!(store.len(), 1);
/// assert!(store.delete(LocalType::Cache, &key).unwrap());
/// assert!(store.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryLocalStore {
    records: RwLock<BTreeMap<(LocalType, EntityKey), Vec<u8>>>,
    closed: AtomicBool,
}

impl InMemoryLocalStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records across both namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if neither namespace holds a record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Clears both namespaces.
    pub fn clear(&self) {
        self.records.write().clear();
    }

    /// Closes the store; every later operation fails with [`StorageError::Closed`].
    ///
    /// Useful for exercising local-tier failure paths.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

impl LocalStore for InMemoryLocalStore {
    fn get(&self, local_type: LocalType, key: &EntityKey) -> StorageResult<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.records.read().get(&(local_type, key.clone())).cloned())
    }

    fn put(&self, local_type: LocalType, key: &EntityKey, data: &[u8]) -> StorageResult<()> {
        self.check_open()?;
        self.records
            .write()
            .insert((local_type, key.clone()), data.to_vec());
        Ok(())
    }

    fn delete(&self, local_type: LocalType, key: &EntityKey) -> StorageResult<bool> {
        self.check_open()?;
        Ok(self
            .records
            .write()
            .remove(&(local_type, key.clone()))
            .is_some())
    }

    fn keys(&self, local_type: LocalType) -> StorageResult<Vec<EntityKey>> {
        self.check_open()?;
        Ok(self
            .records
            .read()
            .keys()
            .filter(|(lt, _)| *lt == local_type)
            .map(|(_, key)| key.clone())
            .collect())
    }

    fn delete_all(&self, local_type: LocalType) -> StorageResult<usize> {
        self.check_open()?;
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|(lt, _), _| *lt != local_type);
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(s: &str) -> EntityKey {
        EntityKey::new(s).unwrap()
    }

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryLocalStore::new();
        assert!(store.is_empty());
        assert!(store.keys(LocalType::Draft).unwrap().is_empty());
    }

    #[test]
    fn memory_put_then_get() {
        let store = InMemoryLocalStore::new();
        store.put(LocalType::Draft, &key("a"), b"hello").unwrap();
        assert_eq!(
            store.get(LocalType::Draft, &key("a")).unwrap(),
            Some(b"hello".to_vec())
        );
    }

    #[test]
    fn memory_namespaces_are_independent() {
        let store = InMemoryLocalStore::new();
        store.put(LocalType::Draft, &key("a"), b"draft").unwrap();
        store.put(LocalType::Cache, &key("a"), b"cache").unwrap();

        assert!(store.delete(LocalType::Draft, &key("a")).unwrap());
        assert_eq!(store.get(LocalType::Draft, &key("a")).unwrap(), None);
        assert_eq!(
            store.get(LocalType::Cache, &key("a")).unwrap(),
            Some(b"cache".to_vec())
        );
    }

    #[test]
    fn memory_delete_missing_returns_false() {
        let store = InMemoryLocalStore::new();
        assert!(!store.delete(LocalType::Cache, &key("missing")).unwrap());
    }

    #[test]
    fn memory_put_replaces() {
        let store = InMemoryLocalStore::new();
        store.put(LocalType::Cache, &key("a"), b"one").unwrap();
        store.put(LocalType::Cache, &key("a"), b"two").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(LocalType::Cache, &key("a")).unwrap(),
            Some(b"two".to_vec())
        );
    }

    #[test]
    fn memory_delete_all_only_touches_one_namespace() {
        let store = InMemoryLocalStore::new();
        for name in ["a", "b", "c"] {
            store.put(LocalType::Draft, &key(name), b"x").unwrap();
        }
        store.put(LocalType::Cache, &key("a"), b"y").unwrap();

        assert_eq!(store.delete_all(LocalType::Draft).unwrap(), 3);
        assert!(store.keys(LocalType::Draft).unwrap().is_empty());
        assert_eq!(store.keys(LocalType::Cache).unwrap(), vec![key("a")]);
    }

    #[test]
    fn memory_closed_store_fails() {
        let store = InMemoryLocalStore::new();
        store.close();
        assert!(matches!(
            store.get(LocalType::Draft, &key("a")),
            Err(StorageError::Closed)
        ));
        assert!(matches!(
            store.put(LocalType::Draft, &key("a"), b"x"),
            Err(StorageError::Closed)
        ));
    }

    proptest! {
        #[test]
        fn memory_keys_are_sorted_and_scoped(names in prop::collection::btree_set("[a-z]{1,8}", 0..20)) {
            let store = InMemoryLocalStore::new();
            for name in &names {
                store.put(LocalType::Cache, &key(name), name.as_bytes()).unwrap();
            }
            let listed: Vec<String> = store
                .keys(LocalType::Cache)
                .unwrap()
                .into_iter()
                .map(String::from)
                .collect();
            let expected: Vec<String> = names.into_iter().collect();
            prop_assert_eq!(listed, expected);
            prop_assert!(store.keys(LocalType::Draft).unwrap().is_empty());
        }
    }
}

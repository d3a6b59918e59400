//! File-based local store for persistent storage.

use crate::error::{StorageError, StorageResult};
use crate::store::{EntityKey, LocalStore, LocalType};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::trace;

const LOCK_FILE: &str = "LOCK";
const RECORD_EXT: &str = "rec";
const TEMP_EXT: &str = "tmp";

/// A file-based local store.
///
/// Each record is one file, `<root>/<namespace>/<key>.rec`. Writes go to a
/// temporary sibling first and are renamed into place, so a reader never
/// observes a half-written record.
///
/// # Layout
///
/// ```text
/// root/
///   LOCK
///   draft/<key>.rec
///   cache/<key>.rec
/// ```
///
/// # Durability
///
/// With `sync_writes` enabled every `put` calls `File::sync_all()` before
/// the rename.
///
/// # Thread Safety
///
/// The root directory is locked exclusively for the lifetime of the store,
/// so only one process at a time can open it. Within the process, writes are
/// serialized by an internal lock.
///
/// # Example
///
/// ```no_run
/// use strata_storage::{EntityKey, FileLocalStore, LocalStore, LocalType};
/// use std::path::Path;
///
/// let store = FileLocalStore::open(Path::new("strata-data")).unwrap();
/// let key = EntityKey::new("moment-1").unwrap();
/// store.put(LocalType::Draft, &key, b"persistent data").unwrap();
/// ```
#[derive(Debug)]
pub struct FileLocalStore {
    root: PathBuf,
    sync_writes: bool,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileLocalStore {
    /// Opens or creates a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the
    /// directory, or an I/O error if it cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        for local_type in LocalType::ALL {
            fs::create_dir_all(root.join(local_type.as_str()))?;
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            root: root.to_path_buf(),
            sync_writes: false,
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Enables or disables fsync on every write.
    #[must_use]
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    /// Returns the root directory of the store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, local_type: LocalType) -> PathBuf {
        self.root.join(local_type.as_str())
    }

    fn record_path(&self, local_type: LocalType, key: &EntityKey) -> PathBuf {
        self.namespace_dir(local_type)
            .join(format!("{}.{RECORD_EXT}", key.as_str()))
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self, local_type: LocalType, key: &EntityKey) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(self.record_path(local_type, key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, local_type: LocalType, key: &EntityKey, data: &[u8]) -> StorageResult<()> {
        let path = self.record_path(local_type, key);
        let temp = path.with_extension(TEMP_EXT);

        let _guard = self.write_lock.lock();
        {
            let mut file = File::create(&temp)?;
            file.write_all(data)?;
            if self.sync_writes {
                file.sync_all()?;
            }
        }
        fs::rename(&temp, &path)?;
        trace!(%local_type, %key, len = data.len(), "record written");
        Ok(())
    }

    fn delete(&self, local_type: LocalType, key: &EntityKey) -> StorageResult<bool> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.record_path(local_type, key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self, local_type: LocalType) -> StorageResult<Vec<EntityKey>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(self.namespace_dir(local_type))? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                return Err(StorageError::Corrupted(format!(
                    "non UTF-8 record name in {}",
                    path.display()
                )));
            };
            keys.push(EntityKey::new(stem)?);
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(s: &str) -> EntityKey {
        EntityKey::new(s).unwrap()
    }

    #[test]
    fn file_open_creates_layout() {
        let dir = tempdir().unwrap();
        let store = FileLocalStore::open(dir.path()).unwrap();
        assert!(store.path().join("draft").is_dir());
        assert!(store.path().join("cache").is_dir());
        assert!(store.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn file_put_and_get() {
        let dir = tempdir().unwrap();
        let store = FileLocalStore::open(dir.path()).unwrap();

        store.put(LocalType::Draft, &key("a"), b"hello").unwrap();
        assert_eq!(
            store.get(LocalType::Draft, &key("a")).unwrap(),
            Some(b"hello".to_vec())
        );
        assert_eq!(store.get(LocalType::Cache, &key("a")).unwrap(), None);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        {
            let store = FileLocalStore::open(dir.path())
                .unwrap()
                .with_sync_writes(true);
            store.put(LocalType::Cache, &key("a"), b"durable").unwrap();
        }

        let store = FileLocalStore::open(dir.path()).unwrap();
        assert_eq!(
            store.get(LocalType::Cache, &key("a")).unwrap(),
            Some(b"durable".to_vec())
        );
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _store = FileLocalStore::open(dir.path()).unwrap();
        assert!(matches!(
            FileLocalStore::open(dir.path()),
            Err(StorageError::Locked)
        ));
    }

    #[test]
    fn file_delete() {
        let dir = tempdir().unwrap();
        let store = FileLocalStore::open(dir.path()).unwrap();
        store.put(LocalType::Draft, &key("a"), b"x").unwrap();

        assert!(store.delete(LocalType::Draft, &key("a")).unwrap());
        assert!(!store.delete(LocalType::Draft, &key("a")).unwrap());
        assert_eq!(store.get(LocalType::Draft, &key("a")).unwrap(), None);
    }

    #[test]
    fn file_keys_ignore_temporaries() {
        let dir = tempdir().unwrap();
        let store = FileLocalStore::open(dir.path()).unwrap();
        store.put(LocalType::Cache, &key("b"), b"x").unwrap();
        store.put(LocalType::Cache, &key("a"), b"x").unwrap();
        fs::write(dir.path().join("cache").join("c.tmp"), b"partial").unwrap();

        assert_eq!(
            store.keys(LocalType::Cache).unwrap(),
            vec![key("a"), key("b")]
        );
    }

    #[test]
    fn file_delete_all() {
        let dir = tempdir().unwrap();
        let store = FileLocalStore::open(dir.path()).unwrap();
        store.put(LocalType::Draft, &key("a"), b"x").unwrap();
        store.put(LocalType::Draft, &key("b"), b"x").unwrap();
        store.put(LocalType::Cache, &key("a"), b"x").unwrap();

        assert_eq!(store.delete_all(LocalType::Draft).unwrap(), 2);
        assert!(store.contains(LocalType::Cache, &key("a")).unwrap());
    }
}

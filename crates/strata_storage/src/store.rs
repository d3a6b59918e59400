//! Local store trait definition and addressing types.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of an [`EntityKey`] in bytes.
pub const MAX_KEY_LEN: usize = 128;

/// One of the two independent local namespaces.
///
/// A draft holds an in-progress edit, a cache holds a synced copy of remote
/// data. The same logical entity may live in both at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LocalType {
    /// In-progress edits that have not been published.
    Draft,
    /// Synced copies of remote data.
    Cache,
}

impl LocalType {
    /// Both namespaces, in a stable order.
    pub const ALL: [LocalType; 2] = [LocalType::Draft, LocalType::Cache];

    /// Directory-safe name of the namespace.
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalType::Draft => "draft",
            LocalType::Cache => "cache",
        }
    }
}

impl fmt::Display for LocalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The storage address of an entity within a namespace.
///
/// Keys are restricted to `[A-Za-z0-9._-]`, must not start with a dot and
/// must be at most [`MAX_KEY_LEN`] bytes long, so that every key maps to a
/// plain file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKey(String);

impl EntityKey {
    /// Creates a validated key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the key is empty, too long,
    /// starts with a dot, or contains characters outside `[A-Za-z0-9._-]`.
    pub fn new(key: impl Into<String>) -> StorageResult<Self> {
        let key = key.into();
        let reason = if key.is_empty() {
            Some("key is empty")
        } else if key.len() > MAX_KEY_LEN {
            Some("key is too long")
        } else if key.starts_with('.') {
            Some("key starts with a dot")
        } else if !key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        {
            Some("key contains characters outside [A-Za-z0-9._-]")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(StorageError::InvalidKey { key, reason }),
            None => Ok(Self(key)),
        }
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EntityKey {
    type Error = StorageError;

    fn try_from(value: String) -> StorageResult<Self> {
        Self::new(value)
    }
}

impl From<EntityKey> for String {
    fn from(key: EntityKey) -> Self {
        key.0
    }
}

/// The local storage tier.
///
/// Local stores are **opaque record stores**: they map `(LocalType, EntityKey)`
/// to bytes and never interpret what they keep.
///
/// # Invariants
///
/// - `get` after a successful `put` returns exactly the bytes written
/// - The two namespaces never observe each other's records
/// - `delete` reports whether a record was actually removed
/// - Implementations must be `Send + Sync`; callers share one store across
///   all worker tasks
///
/// # Implementors
///
/// - [`super::InMemoryLocalStore`] - For testing
/// - [`super::FileLocalStore`] - For persistent storage
pub trait LocalStore: Send + Sync {
    /// Reads the record stored under `key` in `local_type`.
    ///
    /// Returns `Ok(None)` on a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    fn get(&self, local_type: LocalType, key: &EntityKey) -> StorageResult<Option<Vec<u8>>>;

    /// Writes (or replaces) the record stored under `key` in `local_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn put(&self, local_type: LocalType, key: &EntityKey, data: &[u8]) -> StorageResult<()>;

    /// Removes the record stored under `key` in `local_type`.
    ///
    /// Returns `true` if a record was removed, `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be removed.
    fn delete(&self, local_type: LocalType, key: &EntityKey) -> StorageResult<bool>;

    /// Lists every key stored in `local_type`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be listed.
    fn keys(&self, local_type: LocalType) -> StorageResult<Vec<EntityKey>>;

    /// Returns true if a record exists under `key` in `local_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn contains(&self, local_type: LocalType, key: &EntityKey) -> StorageResult<bool> {
        Ok(self.get(local_type, key)?.is_some())
    }

    /// Removes every record in `local_type` and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; records removed before the error
    /// stay removed.
    fn delete_all(&self, local_type: LocalType) -> StorageResult<usize> {
        let mut removed = 0;
        for key in self.keys(local_type)? {
            if self.delete(local_type, &key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

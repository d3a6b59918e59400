//! # Strata Storage
//!
//! The local storage tier of the Strata persistence engine.
//!
//! Local stores are **opaque record stores** partitioned into two independent
//! namespaces ([`LocalType::Draft`] and [`LocalType::Cache`]). A record is
//! addressed by `(LocalType, EntityKey)`; the same key may exist in both
//! namespaces with independent lifecycles.
//!
//! ## Design Principles
//!
//! - Stores keep raw bytes and never interpret them
//! - Every operation is short and synchronous; the engine never calls a store
//!   while holding an entity's critical section
//! - Must be `Send + Sync` for concurrent access from worker tasks
//!
//! ## Available Stores
//!
//! - [`InMemoryLocalStore`] - For testing and ephemeral sessions
//! - [`FileLocalStore`] - One file per record under a locked directory
//!
//! ## Example
//!
//! ```rust
//! use strata_storage::{EntityKey, InMemoryLocalStore, LocalStore, LocalType};
//!
//! let store = InMemoryLocalStore::new();
//! let key = EntityKey::new("moment-1").unwrap();
//! store.put(LocalType::Draft, &key, b"hello").unwrap();
//! assert_eq!(store.get(LocalType::Draft, &key).unwrap(), Some(b"hello".to_vec()));
//! assert_eq!(store.get(LocalType::Cache, &key).unwrap(), None);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileLocalStore;
pub use memory::InMemoryLocalStore;
pub use store::{EntityKey, LocalStore, LocalType, MAX_KEY_LEN};

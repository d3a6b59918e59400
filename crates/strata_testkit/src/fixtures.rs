//! Test fixtures and engine helpers.
//!
//! Provides convenience functions for setting up test engines
//! and common entity trees.

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{
    Engine, EngineConfig, Entity, EntityKey, EntityKind, LocalType, MemoryRemoteStore,
    RetrieveOptions, RetryConfig, StorageLocation, WriteOptions,
};
use strata_storage::{FileLocalStore, InMemoryLocalStore, LocalStore};
use tempfile::TempDir;

/// Retry settings that keep tests fast: three attempts, one millisecond apart.
pub fn fast_retry() -> RetryConfig {
    RetryConfig::fixed(3, Duration::from_millis(1))
}

/// An engine wired to an inspectable local and remote tier.
///
/// Must be created inside a Tokio runtime.
pub struct TestEngine {
    /// The engine under test.
    pub engine: Engine,
    /// The local tier.
    pub local: Arc<dyn LocalStore>,
    /// The remote tier.
    pub remote: Arc<MemoryRemoteStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Creates an engine over an in-memory local tier.
    pub fn memory() -> Self {
        Self::memory_with_config(EngineConfig::new().with_retry(fast_retry()))
    }

    /// Creates an engine over an in-memory local tier with `config`.
    pub fn memory_with_config(config: EngineConfig) -> Self {
        Self::build(config, Arc::new(InMemoryLocalStore::new()), None)
    }

    /// Creates an engine over a file-backed local tier in a temporary
    /// directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let local = FileLocalStore::open(temp_dir.path()).expect("Failed to open file store");
        Self::build(
            EngineConfig::new().with_retry(fast_retry()),
            Arc::new(local),
            Some(temp_dir),
        )
    }

    fn build(config: EngineConfig, local: Arc<dyn LocalStore>, temp_dir: Option<TempDir>) -> Self {
        let remote = Arc::new(MemoryRemoteStore::new());
        let engine = Engine::new(config, Arc::clone(&local), remote.clone())
            .expect("Test engines must be created inside a runtime");
        Self {
            engine,
            local,
            remote,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the local directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }

    /// Returns the number of records in one local namespace.
    pub fn local_count(&self, local_type: LocalType) -> usize {
        self.local
            .keys(local_type)
            .expect("Failed to list local keys")
            .len()
    }

    /// Returns true if the local namespace holds a record for `key`.
    pub fn has_local(&self, local_type: LocalType, key: &str) -> bool {
        self.local
            .contains(local_type, &self::key(key))
            .expect("Failed to read local store")
    }

    /// Waits until every dispatched operation has been counted as
    /// completed, or panics after `timeout`.
    pub async fn settle(&self, timeout: Duration) {
        let settled = tokio::time::timeout(timeout, async {
            while self.engine.stats().in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        assert!(
            settled.is_ok(),
            "operations still in flight: {:?}",
            self.engine.stats()
        );
    }
}

impl Deref for TestEngine {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Parses a key, panicking on invalid input.
pub fn key(s: &str) -> EntityKey {
    EntityKey::new(s).expect("Invalid test key")
}

/// Whole save to both tiers, drafts namespace.
pub fn draft_both() -> WriteOptions {
    WriteOptions::new(StorageLocation::Both, LocalType::Draft)
}

/// Whole save to the local tier only, drafts namespace.
pub fn draft_local() -> WriteOptions {
    WriteOptions::new(StorageLocation::Local, LocalType::Draft)
}

/// Recursive retrieve from either tier, cache namespace.
pub fn cache_both() -> RetrieveOptions {
    RetrieveOptions::new(StorageLocation::Both, LocalType::Cache)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates an unsaved moment owning `media` media entities keyed
    /// `<moment>-media-<i>`.
    pub fn moment_with_media(engine: &Engine, moment: &str, media: usize) -> Arc<Entity> {
        let parent = engine.new_entity(EntityKind::Moment, key(moment));
        parent.set_payload(Some(format!("moment {moment}").into_bytes()));
        for i in 0..media {
            let child = engine.new_entity(EntityKind::Media, key(&format!("{moment}-media-{i}")));
            child.set_payload(Some(format!("media {i} of {moment}").into_bytes()));
            parent.add_child(child).expect("Moments may own media");
        }
        parent
    }

    /// Creates an unsaved story owning `moments` moments with
    /// `media_per_moment` media each.
    pub fn story_tree(
        engine: &Engine,
        story: &str,
        moments: usize,
        media_per_moment: usize,
    ) -> Arc<Entity> {
        let root = engine.new_entity(EntityKind::Story, key(story));
        root.set_payload(Some(format!("story {story}").into_bytes()));
        for i in 0..moments {
            let moment = moment_with_media(engine, &format!("{story}-moment-{i}"), media_per_moment);
            root.add_child(moment).expect("Stories may own moments");
        }
        root
    }

    /// Stores every entity of the tree under `root` in the remote tier.
    pub fn seed_remote(remote: &MemoryRemoteStore, root: &Arc<Entity>) {
        remote.insert(root.to_document());
        for child in root.children() {
            seed_remote(remote, &child);
        }
    }

    /// Returns the number of entities in the tree under `root`.
    pub fn tree_size(root: &Entity) -> usize {
        1 + root
            .children()
            .iter()
            .map(|child| tree_size(child))
            .sum::<usize>()
    }

    /// Returns every key in the tree under `root`, parents before children.
    pub fn tree_keys(root: &Entity) -> Vec<EntityKey> {
        let mut keys = vec![root.key().clone()];
        for child in root.children() {
            keys.extend(tree_keys(&child));
        }
        keys
    }
}

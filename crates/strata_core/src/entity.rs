//! In-memory entities.

use crate::config::DEFAULT_MUTEX_HOLD_WARNING;
use crate::document::{ChildRef, Document};
use crate::error::{PersistError, PersistResult};
use crate::kind::EntityKind;
use crate::queue::TaskQueue;
use crate::sync::{EntityMutex, EntityMutexGuard};
use crate::tracker::ChildOperationTracker;
use crate::types::ObjectId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use strata_storage::EntityKey;
use tracing::trace;
use uuid::Uuid;

/// Whether an entity's data is available in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieveState {
    /// Only the key is known.
    NotAvailable,
    /// A retrieve is reading the tiers.
    Retrieving,
    /// Data is in memory.
    Retrieved,
}

#[derive(Debug)]
pub(crate) struct EntityState {
    pub(crate) payload: Option<Vec<u8>>,
    pub(crate) children: Vec<Arc<Entity>>,
    pub(crate) retrieve_state: RetrieveState,
    pub(crate) revision: Option<u64>,
    pub(crate) dirty: bool,
}

/// A persistable object and its ordered children.
///
/// Entities are shared as `Arc<Entity>`. A child may be owned by more than
/// one parent; the [`EntityKind`] schema guarantees no entity is its own
/// ancestor.
pub struct Entity {
    id: ObjectId,
    kind: EntityKind,
    key: EntityKey,
    hold_warning: Duration,
    state: EntityMutex<EntityState>,
    tracker: ChildOperationTracker,
    queue: TaskQueue,
}

impl Entity {
    /// Creates a new, unsaved entity.
    pub fn new(kind: EntityKind, key: EntityKey) -> Arc<Self> {
        Self::build(kind, key, RetrieveState::Retrieved, DEFAULT_MUTEX_HOLD_WARNING)
    }

    /// Creates a new, unsaved entity under a freshly generated key.
    pub fn with_generated_key(kind: EntityKind) -> PersistResult<Arc<Self>> {
        Ok(Self::new(kind, generate_key(kind)?))
    }

    /// Creates a reference to a stored entity whose data has not been
    /// retrieved yet.
    pub fn placeholder(kind: EntityKind, key: EntityKey) -> Arc<Self> {
        Self::build(kind, key, RetrieveState::NotAvailable, DEFAULT_MUTEX_HOLD_WARNING)
    }

    pub(crate) fn build(
        kind: EntityKind,
        key: EntityKey,
        retrieve_state: RetrieveState,
        hold_warning: Duration,
    ) -> Arc<Self> {
        let state = EntityState {
            payload: None,
            children: Vec::new(),
            retrieve_state,
            revision: None,
            dirty: retrieve_state == RetrieveState::Retrieved,
        };
        Arc::new(Self {
            id: Uuid::new_v4(),
            kind,
            key,
            hold_warning,
            state: EntityMutex::new(state, hold_warning),
            tracker: ChildOperationTracker::new(),
            queue: TaskQueue::new(),
        })
    }

    /// Returns the in-memory identity.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Returns the kind.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Returns the storage key.
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Returns a copy of the payload.
    pub fn payload(&self) -> Option<Vec<u8>> {
        self.lock().payload.clone()
    }

    /// Replaces the payload.
    pub fn set_payload(&self, payload: Option<Vec<u8>>) {
        let mut state = self.lock();
        state.payload = payload;
        state.dirty = true;
    }

    /// Returns the children, in order.
    pub fn children(&self) -> Vec<Arc<Entity>> {
        self.lock().children.clone()
    }

    /// Appends a child.
    ///
    /// The child's kind must be allowed by this entity's kind, and its key
    /// must not already be among the children.
    pub fn add_child(&self, child: Arc<Entity>) -> PersistResult<()> {
        if !self.kind.may_own(child.kind) {
            return Err(PersistError::inconsistent(format!(
                "{} {} cannot own {} {}",
                self.kind, self.key, child.kind, child.key
            )));
        }
        let mut state = self.lock();
        if state.children.iter().any(|c| c.key == child.key) {
            return Err(PersistError::inconsistent(format!(
                "{} already owns {}",
                self.key, child.key
            )));
        }
        state.children.push(child);
        state.dirty = true;
        Ok(())
    }

    /// Removes the child with `key`, returning it.
    pub fn remove_child(&self, key: &EntityKey) -> Option<Arc<Entity>> {
        let mut state = self.lock();
        let index = state.children.iter().position(|c| &c.key == key)?;
        state.dirty = true;
        Some(state.children.remove(index))
    }

    /// Returns the retrieve state.
    pub fn retrieve_state(&self) -> RetrieveState {
        self.lock().retrieve_state
    }

    /// Returns true if the data is in memory.
    pub fn is_retrieved(&self) -> bool {
        self.retrieve_state() == RetrieveState::Retrieved
    }

    /// Returns true if there are changes not yet saved.
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Returns true if the remote tier has never acknowledged this entity.
    pub fn is_new(&self) -> bool {
        self.lock().revision.is_none()
    }

    /// Returns the revision last acknowledged by the remote tier.
    pub fn revision(&self) -> Option<u64> {
        self.lock().revision
    }

    /// Returns the number of operations queued or running on this entity.
    pub fn outstanding_operations(&self) -> usize {
        self.queue.len()
    }

    /// Serializes the current state.
    pub fn to_document(&self) -> Document {
        let state = self.lock();
        Document {
            kind: self.kind,
            key: self.key.clone(),
            revision: state.revision,
            payload: state.payload.clone(),
            children: state
                .children
                .iter()
                .map(|c| ChildRef {
                    kind: c.kind,
                    key: c.key.clone(),
                })
                .collect(),
        }
    }

    /// Replaces the in-memory state with `document`.
    ///
    /// Children already in memory are kept when the document still refers to
    /// them; new references become placeholders.
    pub(crate) fn apply_document(&self, document: Document) -> PersistResult<()> {
        if document.kind != self.kind || document.key != self.key {
            return Err(PersistError::Codec(format!(
                "record for {} {} loaded into {} {}",
                document.kind, document.key, self.kind, self.key
            )));
        }
        document.validate()?;

        let mut state = self.lock();
        let children = document
            .children
            .into_iter()
            .map(|child_ref| {
                state
                    .children
                    .iter()
                    .find(|c| c.kind == child_ref.kind && c.key == child_ref.key)
                    .cloned()
                    .unwrap_or_else(|| {
                        Entity::build(
                            child_ref.kind,
                            child_ref.key,
                            RetrieveState::NotAvailable,
                            self.hold_warning,
                        )
                    })
            })
            .collect();
        state.children = children;
        state.payload = document.payload;
        state.revision = document.revision;
        state.retrieve_state = RetrieveState::Retrieved;
        state.dirty = false;
        trace!(kind = %self.kind, key = %self.key, children = state.children.len(), "document applied");
        Ok(())
    }

    /// Moves to `Retrieving`, returning the previous state.
    pub(crate) fn begin_retrieve(&self) -> RetrieveState {
        std::mem::replace(&mut self.lock().retrieve_state, RetrieveState::Retrieving)
    }

    /// Restores the state saved by [`begin_retrieve`](Self::begin_retrieve)
    /// after a failed retrieve.
    pub(crate) fn abort_retrieve(&self, previous: RetrieveState) {
        let mut state = self.lock();
        if state.retrieve_state == RetrieveState::Retrieving {
            state.retrieve_state = previous;
        }
    }

    /// Records a successful save. `revision` is the remote acknowledgement,
    /// if the remote tier took part.
    pub(crate) fn mark_saved(&self, revision: Option<u64>) {
        let mut state = self.lock();
        state.dirty = false;
        if revision.is_some() {
            state.revision = revision;
        }
    }

    /// Records a successful delete. The in-memory data survives as an unsaved
    /// entity.
    pub(crate) fn mark_deleted(&self, from_remote: bool) {
        let mut state = self.lock();
        state.dirty = true;
        if from_remote {
            state.revision = None;
        }
    }

    #[track_caller]
    pub(crate) fn lock(&self) -> EntityMutexGuard<'_, EntityState> {
        self.state.lock()
    }

    pub(crate) fn tracker(&self) -> &ChildOperationTracker {
        &self.tracker
    }

    pub(crate) fn queue(&self) -> &TaskQueue {
        &self.queue
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Generates a unique key for a new entity of `kind`.
pub fn generate_key(kind: EntityKind) -> PersistResult<EntityKey> {
    Ok(EntityKey::new(format!(
        "{}-{}",
        kind.as_str(),
        Uuid::new_v4().simple()
    ))?)
}

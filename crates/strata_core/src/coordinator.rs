//! The persistence coordinator.
//!
//! [`Engine`] runs retrieve, save and delete over an entity tree. Each call
//! creates a [`CancellableTask`] on the entity's own queue, so operations on
//! one entity run in submission order while operations on different entities
//! run in parallel on the runtime. Children are dispatched as independent
//! tasks registered under the parent's task, and their results flow back
//! through the parent's [`ChildOperationTracker`](crate::ChildOperationTracker).
//!
//! Ordering per granularity:
//!
//! | Operation | Whole                               | Recursive                          |
//! |-----------|-------------------------------------|------------------------------------|
//! | retrieve  | self, then children, one completion | self, then children; ready early   |
//! | save      | children first, self only if all ok | self alongside children            |
//! | delete    | self read, children, then self      | same, granularity passed down      |
//!
//! Entity state is only touched inside short critical sections. No storage
//! or network call happens while an entity's mutex is held, and no two
//! entities' mutexes are ever held together.

use crate::config::EngineConfig;
use crate::document::Document;
use crate::entity::{Entity, RetrieveState};
use crate::error::{PersistError, PersistResult};
use crate::handle::RetrieveHandle;
use crate::kind::EntityKind;
use crate::remote::{Ack, RemoteError, RemoteStore};
use crate::retry::RetryPolicy;
use crate::signal::{ready_channel, ReadyNotifier, ReadySignal};
use crate::stats::EngineStats;
use crate::task::{CancellableTask, TaskHandle};
use crate::tracker::FanIn;
use crate::types::{
    Granularity, LocalType, ObjectId, Operation, OperationKind, RetrieveOptions, StorageLocation,
    WriteOptions,
};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use strata_storage::{EntityKey, LocalStore, StorageResult};
use tokio::runtime::Handle;
use tracing::{debug, debug_span, info, trace, warn, Instrument};

struct EngineInner {
    config: EngineConfig,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    runtime: Handle,
    stats: RwLock<EngineStats>,
}

/// Coordinates persistence of entity trees across the local and remote
/// tiers.
///
/// Cheap to clone; clones share the same stores and runtime.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Creates an engine that runs its tasks on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::InconsistentState`] when called outside a
    /// runtime.
    pub fn new(
        config: EngineConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> PersistResult<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            PersistError::inconsistent(format!("engine created outside a runtime: {e}"))
        })?;
        Ok(Self::with_runtime(config, local, remote, runtime))
    }

    /// Creates an engine that runs its tasks on `runtime`.
    pub fn with_runtime(
        config: EngineConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                local,
                remote,
                runtime,
                stats: RwLock::new(EngineStats::default()),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Returns the local tier.
    pub fn local_store(&self) -> &Arc<dyn LocalStore> {
        &self.inner.local
    }

    /// Returns the remote tier.
    pub fn remote_store(&self) -> &Arc<dyn RemoteStore> {
        &self.inner.remote
    }

    /// Returns a snapshot of the operation counters.
    pub fn stats(&self) -> EngineStats {
        self.inner.stats.read().clone()
    }

    /// Resets the operation counters.
    pub fn reset_stats(&self) {
        *self.inner.stats.write() = EngineStats::default();
    }

    /// Creates a new, unsaved entity using this engine's mutex settings.
    pub fn new_entity(&self, kind: EntityKind, key: EntityKey) -> Arc<Entity> {
        Entity::build(
            kind,
            key,
            RetrieveState::Retrieved,
            self.inner.config.mutex_hold_warning,
        )
    }

    /// Creates a reference to a stored entity using this engine's mutex
    /// settings.
    pub fn placeholder(&self, kind: EntityKind, key: EntityKey) -> Arc<Entity> {
        Entity::build(
            kind,
            key,
            RetrieveState::NotAvailable,
            self.inner.config.mutex_hold_warning,
        )
    }

    /// Retrieves `entity` and its descendants.
    ///
    /// Reads the local tier first and falls back to the remote tier when the
    /// location allows it; records fetched remotely are cached locally under
    /// `options.local_type`. With `force_anyways` the in-memory copy is
    /// ignored, and with [`StorageLocation::Both`] so is the local tier.
    ///
    /// When `parent` is given the new task is registered as its child.
    pub fn retrieve(
        &self,
        entity: &Arc<Entity>,
        options: RetrieveOptions,
        parent: Option<&Arc<CancellableTask>>,
    ) -> RetrieveHandle {
        let operation = Operation {
            kind: OperationKind::Retrieve,
            granularity: options.granularity,
        };
        let (task, done) = self.prepare(entity, operation, parent);
        let (notifier, ready) = ready_channel(Some(Arc::clone(&task)));
        let work = self
            .clone()
            .retrieve_op(Arc::clone(entity), options, Arc::clone(&task), notifier);
        self.spawn(entity, operation, task, work);
        RetrieveHandle { ready, done }
    }

    /// Saves `entity` and its descendants.
    ///
    /// The local tier is always written. With [`Granularity::Whole`] a
    /// parent is only written once every child saved successfully.
    pub fn save(
        &self,
        entity: &Arc<Entity>,
        options: WriteOptions,
        parent: Option<&Arc<CancellableTask>>,
    ) -> TaskHandle {
        let operation = Operation {
            kind: OperationKind::Save,
            granularity: options.granularity,
        };
        let (task, done) = self.prepare(entity, operation, parent);
        let work = self
            .clone()
            .save_op(Arc::clone(entity), options, Arc::clone(&task));
        self.spawn(entity, operation, task, work);
        done
    }

    /// Deletes `entity` and its descendants.
    ///
    /// The stored record is read first so children known only to storage
    /// are deleted too. A missing record is not an error. Child failures
    /// other than cancellation are logged and the parent is deleted anyway.
    pub fn delete(
        &self,
        entity: &Arc<Entity>,
        options: WriteOptions,
        parent: Option<&Arc<CancellableTask>>,
    ) -> TaskHandle {
        let operation = Operation {
            kind: OperationKind::Delete,
            granularity: options.granularity,
        };
        let (task, done) = self.prepare(entity, operation, parent);
        let work = self
            .clone()
            .delete_op(Arc::clone(entity), options, Arc::clone(&task));
        self.spawn(entity, operation, task, work);
        done
    }

    /// Cancels every operation queued or running on `entity`.
    ///
    /// Returns how many were cancelled. Descendants are reached through
    /// each cancelled operation's child tasks.
    pub fn cancel_all(&self, entity: &Entity) -> usize {
        let cancelled = entity.queue().cancel_all();
        debug!(kind = %entity.kind(), key = %entity.key(), cancelled, "cancel all");
        cancelled
    }

    /// Removes every record from the local namespace `local_type`.
    pub async fn delete_all(&self, local_type: LocalType) -> PersistResult<usize> {
        let removed = self
            .local(move |store| store.delete_all(local_type))
            .await?;
        info!(%local_type, removed, "local namespace cleared");
        Ok(removed)
    }

    fn prepare(
        &self,
        entity: &Entity,
        operation: Operation,
        parent: Option<&Arc<CancellableTask>>,
    ) -> (Arc<CancellableTask>, TaskHandle) {
        let label = format!("{operation} {} {}", entity.kind(), entity.key());
        let (task, done) = CancellableTask::new(label);
        entity.queue().enqueue(&task);
        self.inner.stats.write().record_dispatch(operation.kind);
        if let Some(parent) = parent {
            if let Err(e) = parent.add(Arc::clone(&task)) {
                // A cancelled parent has already cancelled the child.
                if !e.is_cancelled() {
                    task.cancel();
                }
            }
        }
        (task, done)
    }

    fn spawn<F>(&self, entity: &Arc<Entity>, operation: Operation, task: Arc<CancellableTask>, work: F)
    where
        F: Future<Output = PersistResult<()>> + Send + 'static,
    {
        let span = debug_span!(
            "operation",
            %operation,
            kind = %entity.kind(),
            key = %entity.key(),
            object = %entity.id(),
            task = %task.id(),
        );
        let entity = Arc::clone(entity);
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(
            async move {
                let outcome = entity.queue().run(task, work).await;
                trace!(?outcome, "operation finished");
                inner.stats.write().record_outcome(operation.kind, outcome);
            }
            .instrument(span),
        );
    }

    /// Arms `entity`'s tracker and dispatches one operation per child.
    ///
    /// With `present_only`, children that were never brought into memory are
    /// left out. The cancellation check and the arm happen in one critical
    /// section. `extra` counts participants other than the children. `ready`
    /// is moved into the tracker when there is at least one participant, and
    /// left in place otherwise.
    fn fan_out<D>(
        &self,
        entity: &Arc<Entity>,
        task: &CancellableTask,
        extra: usize,
        present_only: bool,
        ready: &mut Option<ReadyNotifier>,
        dispatch: D,
    ) -> PersistResult<Option<FanIn>>
    where
        D: Fn(&Arc<Entity>) -> (Option<ReadySignal>, TaskHandle),
    {
        // Children's own state is read outside the parent's critical section.
        let absent: HashSet<ObjectId> = if present_only {
            entity
                .children()
                .iter()
                .filter(|child| !child.is_retrieved())
                .map(|child| {
                    trace!(child = %child.key(), "skipping child not in memory");
                    child.id()
                })
                .collect()
        } else {
            HashSet::new()
        };

        let (children, fan_in) = {
            let state = entity.lock();
            task.check_cancelled()?;
            let children: Vec<Arc<Entity>> = state
                .children
                .iter()
                .filter(|child| !absent.contains(&child.id()))
                .cloned()
                .collect();
            let count = children.len() + extra;
            if count == 0 {
                return Ok(None);
            }
            let fan_in = match ready.take() {
                Some(notifier) => entity.tracker().arm_with_ready(count, notifier)?,
                None => entity.tracker().arm(count)?,
            };
            (children, fan_in)
        };

        trace!(children = children.len(), extra, "dispatching children");
        for child in &children {
            let (child_ready, child_done) = dispatch(child);
            let parent = Arc::clone(entity);
            self.inner.runtime.spawn(
                async move {
                    if let Some(child_ready) = child_ready {
                        if child_ready.await.is_ready() {
                            // Failures are reported by the tracker itself.
                            let _ = parent.tracker().child_ready();
                        }
                    }
                    let result = child_done.await;
                    let _ = parent.tracker().child_completed(result);
                }
                .in_current_span(),
            );
        }
        Ok(Some(fan_in))
    }

    async fn retrieve_op(
        self,
        entity: Arc<Entity>,
        options: RetrieveOptions,
        task: Arc<CancellableTask>,
        ready: ReadyNotifier,
    ) -> PersistResult<()> {
        // Whole retrieves keep their notifier unfired until they end.
        let (mut ready, _never_ready) = match options.granularity {
            Granularity::Recursive => (Some(ready), None),
            Granularity::Whole => (None, Some(ready)),
        };

        let fetched = self
            .retrieve_self(
                &entity,
                options.location,
                options.local_type,
                options.force_anyways,
                &task,
            )
            .await?;

        let fan_in = self.fan_out(&entity, &task, 0, false, &mut ready, |child| {
            let (child_ready, child_done) = self.retrieve(child, options, Some(&task)).split();
            match options.granularity {
                Granularity::Recursive => (Some(child_ready), child_done),
                Granularity::Whole => (None, child_done),
            }
        })?;

        // No children: the entity alone decides readiness.
        if let Some(ready) = ready.take() {
            ready.notify();
        }

        let cached = match fetched {
            Some(document) => {
                let cached = self.write_local(options.local_type, &document).await;
                if let Err(e) = &cached {
                    warn!(error = %e, "failed to cache remote record");
                } else {
                    trace!(local_type = %options.local_type, "remote record cached");
                }
                cached
            }
            None => Ok(()),
        };

        // Children already dispatched must drain before the task ends.
        match fan_in {
            Some(fan_in) => {
                let children = fan_in.await;
                cached.and(children)
            }
            None => cached,
        }
    }

    async fn save_op(
        self,
        entity: Arc<Entity>,
        options: WriteOptions,
        task: Arc<CancellableTask>,
    ) -> PersistResult<()> {
        let dispatch = |child: &Arc<Entity>| (None, self.save(child, options, Some(&task)));
        match options.granularity {
            Granularity::Whole => {
                if let Some(fan_in) = self.fan_out(&entity, &task, 0, true, &mut None, dispatch)? {
                    fan_in.await?;
                }
                task.check_cancelled()?;
                self.persist_self(&entity, options, &task).await
            }
            Granularity::Recursive => {
                let fan_in = self.fan_out(&entity, &task, 1, true, &mut None, dispatch)?;
                let own = self.persist_self(&entity, options, &task).await;
                match fan_in {
                    Some(fan_in) => {
                        // An idle tracker has already resolved the fan-in.
                        let reported = entity.tracker().child_completed(own);
                        let children = fan_in.await;
                        reported.and(children)
                    }
                    None => own,
                }
            }
        }
    }

    async fn delete_op(
        self,
        entity: Arc<Entity>,
        options: WriteOptions,
        task: Arc<CancellableTask>,
    ) -> PersistResult<()> {
        match self
            .retrieve_self(&entity, options.location, options.local_type, false, &task)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!("no stored record, deleting children known in memory");
            }
            Err(e) => return Err(e),
        }

        let dispatch = |child: &Arc<Entity>| (None, self.delete(child, options, Some(&task)));
        if let Some(fan_in) = self.fan_out(&entity, &task, 0, false, &mut None, dispatch)? {
            match fan_in.await {
                Ok(()) => {}
                Err(e @ (PersistError::Cancelled | PersistError::InconsistentState(_))) => {
                    return Err(e)
                }
                Err(e) => warn!(error = %e, "child delete failed, deleting parent anyway"),
            }
        }

        task.check_cancelled()?;
        self.erase_self(&entity, options, &task).await
    }

    /// Brings `entity`'s own data into memory.
    ///
    /// Returns the document when it came from the remote tier, so the caller
    /// can cache it locally once readiness has been signalled.
    async fn retrieve_self(
        &self,
        entity: &Entity,
        location: StorageLocation,
        local_type: LocalType,
        force: bool,
        task: &CancellableTask,
    ) -> PersistResult<Option<Document>> {
        if !force && entity.is_retrieved() {
            trace!("already in memory");
            return Ok(None);
        }
        task.check_cancelled()?;

        let previous = entity.begin_retrieve();
        let result = self
            .read_tiers(entity, location, local_type, force, task)
            .await;
        if result.is_err() {
            entity.abort_retrieve(previous);
        }
        result
    }

    async fn read_tiers(
        &self,
        entity: &Entity,
        location: StorageLocation,
        local_type: LocalType,
        force: bool,
        task: &CancellableTask,
    ) -> PersistResult<Option<Document>> {
        let bypass_local = force && location.includes_remote();
        if !bypass_local {
            if let Some(document) = self.read_local(local_type, entity.key()).await? {
                entity.apply_document(document)?;
                debug!(%local_type, "retrieved from local tier");
                return Ok(None);
            }
            if !location.includes_remote() {
                return Err(PersistError::NotFound {
                    local_type: Some(local_type),
                    key: entity.key().clone(),
                });
            }
            debug!(%local_type, "local miss, fetching from remote");
        }

        task.check_cancelled()?;
        let document = self.fetch_remote(entity.key(), task).await?;
        entity.apply_document(document.clone())?;
        debug!(revision = ?document.revision, "retrieved from remote tier");
        Ok(Some(document))
    }

    async fn persist_self(
        &self,
        entity: &Entity,
        options: WriteOptions,
        task: &CancellableTask,
    ) -> PersistResult<()> {
        let mut document = entity.to_document();
        self.write_local(options.local_type, &document).await?;
        if !options.location.includes_remote() {
            entity.mark_saved(None);
            debug!(local_type = %options.local_type, "saved to local tier");
            return Ok(());
        }

        task.check_cancelled()?;
        let ack = self.push_remote(&document, task).await?;
        entity.mark_saved(Some(ack.revision));

        // Keep the local copy's revision in step with the remote tier.
        document.revision = Some(ack.revision);
        self.write_local(options.local_type, &document).await?;
        debug!(revision = ack.revision, "saved to both tiers");
        Ok(())
    }

    async fn erase_self(
        &self,
        entity: &Entity,
        options: WriteOptions,
        task: &CancellableTask,
    ) -> PersistResult<()> {
        let local_type = options.local_type;
        let key = entity.key().clone();
        let removed = self
            .local(move |store| store.delete(local_type, &key))
            .await?;
        if !removed {
            trace!(%local_type, "no local record to delete");
        }

        if options.location.includes_remote() {
            task.check_cancelled()?;
            self.remove_remote(entity.key(), task).await?;
        }
        entity.mark_deleted(options.location.includes_remote());
        debug!(location = %options.location, "deleted");
        Ok(())
    }

    async fn local<T, F>(&self, call: F) -> PersistResult<T>
    where
        F: FnOnce(&dyn LocalStore) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let local = Arc::clone(&self.inner.local);
        let result = self
            .inner
            .runtime
            .spawn_blocking(move || call(local.as_ref()))
            .await
            .map_err(|e| PersistError::inconsistent(format!("local store call aborted: {e}")))?;
        Ok(result?)
    }

    async fn read_local(
        &self,
        local_type: LocalType,
        key: &EntityKey,
    ) -> PersistResult<Option<Document>> {
        let key = key.clone();
        let bytes = self
            .local(move |store| store.get(local_type, &key))
            .await?;
        bytes.map(|bytes| Document::from_bytes(&bytes)).transpose()
    }

    async fn write_local(&self, local_type: LocalType, document: &Document) -> PersistResult<()> {
        let bytes = document.to_bytes()?;
        let key = document.key.clone();
        self.local(move |store| store.put(local_type, &key, &bytes))
            .await
    }

    async fn fetch_remote(&self, key: &EntityKey, task: &CancellableTask) -> PersistResult<Document> {
        let remote = &self.inner.remote;
        let policy = RetryPolicy::new(format!("fetch {key}"), self.inner.config.retry.clone());
        let document = policy
            .run(task.cancellation_token(), || async move {
                remote.fetch(key).await.map_err(PersistError::from)
            })
            .await;
        self.record_retries(&policy);
        let document = document?;
        if &document.key != key {
            return Err(PersistError::Codec(format!(
                "remote returned {} for {key}",
                document.key
            )));
        }
        Ok(document)
    }

    async fn push_remote(&self, document: &Document, task: &CancellableTask) -> PersistResult<Ack> {
        let remote = &self.inner.remote;
        let policy = RetryPolicy::new(
            format!("push {}", document.key),
            self.inner.config.retry.clone(),
        );
        let ack = policy
            .run(task.cancellation_token(), || async move {
                remote.push(document).await.map_err(PersistError::from)
            })
            .await;
        self.record_retries(&policy);
        ack
    }

    async fn remove_remote(&self, key: &EntityKey, task: &CancellableTask) -> PersistResult<()> {
        let remote = &self.inner.remote;
        let policy = RetryPolicy::new(format!("remove {key}"), self.inner.config.retry.clone());
        let removed = policy
            .run(task.cancellation_token(), || async move {
                match remote.remove(key).await {
                    Ok(()) => Ok(()),
                    Err(RemoteError::NotFound { .. }) => {
                        trace!(%key, "no remote record to delete");
                        Ok(())
                    }
                    Err(e) => Err(PersistError::from(e)),
                }
            })
            .await;
        self.record_retries(&policy);
        removed
    }

    fn record_retries(&self, policy: &RetryPolicy) {
        self.inner.stats.write().record_retries(policy.attempts());
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("stats", &*self.inner.stats.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::ErrorKind;
    use crate::remote::{Fault, MemoryRemoteStore, RemoteOp};
    use crate::signal::Readiness;
    use parking_lot::{Condvar, Mutex};
    use std::io;
    use std::time::Duration;
    use strata_storage::{InMemoryLocalStore, StorageError};

    /// Local tier that can fail one write or hold every write until opened.
    #[derive(Default)]
    struct ScriptedLocalStore {
        inner: InMemoryLocalStore,
        fail_put: Mutex<Option<EntityKey>>,
        closed: Mutex<bool>,
        opened: Condvar,
    }

    impl ScriptedLocalStore {
        fn fail_next_put(&self, key: EntityKey) {
            *self.fail_put.lock() = Some(key);
        }

        fn close_gate(&self) {
            *self.closed.lock() = true;
        }

        fn open_gate(&self) {
            *self.closed.lock() = false;
            self.opened.notify_all();
        }
    }

    impl LocalStore for ScriptedLocalStore {
        fn get(&self, local_type: LocalType, key: &EntityKey) -> StorageResult<Option<Vec<u8>>> {
            self.inner.get(local_type, key)
        }

        fn put(&self, local_type: LocalType, key: &EntityKey, data: &[u8]) -> StorageResult<()> {
            {
                let mut fail_put = self.fail_put.lock();
                if fail_put.as_ref() == Some(key) {
                    *fail_put = None;
                    return Err(StorageError::Io(io::Error::other("disk full")));
                }
            }
            let mut closed = self.closed.lock();
            while *closed {
                self.opened.wait(&mut closed);
            }
            drop(closed);
            self.inner.put(local_type, key, data)
        }

        fn delete(&self, local_type: LocalType, key: &EntityKey) -> StorageResult<bool> {
            self.inner.delete(local_type, key)
        }

        fn keys(&self, local_type: LocalType) -> StorageResult<Vec<EntityKey>> {
            self.inner.keys(local_type)
        }
    }

    fn key(s: &str) -> EntityKey {
        EntityKey::new(s).unwrap()
    }

    fn engine() -> (Engine, Arc<InMemoryLocalStore>, Arc<MemoryRemoteStore>) {
        let local = Arc::new(InMemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let config = EngineConfig::new()
            .with_retry(RetryConfig::fixed(3, Duration::from_millis(1)));
        let engine = Engine::new(config, local.clone(), remote.clone()).unwrap();
        (engine, local, remote)
    }

    fn moment_with_media(engine: &Engine, media: usize) -> Arc<Entity> {
        let moment = engine.new_entity(EntityKind::Moment, key("moment-1"));
        moment.set_payload(Some(b"moment".to_vec()));
        for i in 0..media {
            let child = engine.new_entity(EntityKind::Media, key(&format!("media-{i}")));
            child.set_payload(Some(format!("media {i}").into_bytes()));
            moment.add_child(child).unwrap();
        }
        moment
    }

    #[test]
    fn engine_requires_runtime() {
        let err = Engine::new(
            EngineConfig::default(),
            Arc::new(InMemoryLocalStore::new()),
            Arc::new(MemoryRemoteStore::new()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InconsistentState);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn save_then_retrieve_round_trip() {
        let (engine, local, remote) = engine();
        let moment = moment_with_media(&engine, 2);
        let options = WriteOptions::new(StorageLocation::Both, LocalType::Draft);

        engine.save(&moment, options, None).await.unwrap();
        assert_eq!(remote.len(), 3);
        assert_eq!(local.len(), 3);
        assert!(!moment.is_dirty());
        assert!(!moment.is_new());

        let restored = engine.placeholder(EntityKind::Moment, key("moment-1"));
        let options = RetrieveOptions::new(StorageLocation::Local, LocalType::Draft);
        let mut handle = engine.retrieve(&restored, options, None);
        assert_eq!(handle.ready().await, Readiness::Ready);
        handle.await.unwrap();

        let children = restored.children();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].payload(), Some(b"media 1".to_vec()));
        assert_eq!(restored.revision(), moment.revision());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn remote_fallback_caches_locally() {
        let (engine, local, remote) = engine();
        remote.insert(crate::document::Document {
            payload: Some(b"remote".to_vec()),
            ..crate::document::Document::new(EntityKind::Media, key("media-9"))
        });

        let media = engine.placeholder(EntityKind::Media, key("media-9"));
        let options = RetrieveOptions::new(StorageLocation::Both, LocalType::Cache);
        engine.retrieve(&media, options, None).await.unwrap();

        assert_eq!(media.payload(), Some(b"remote".to_vec()));
        assert!(local.contains(LocalType::Cache, &key("media-9")).unwrap());
        assert_eq!(remote.call_count(RemoteOp::Fetch, &key("media-9")), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn local_only_miss_is_not_found() {
        let (engine, _local, remote) = engine();
        let media = engine.placeholder(EntityKind::Media, key("media-1"));
        let options = RetrieveOptions::new(StorageLocation::Local, LocalType::Cache);

        let err = engine.retrieve(&media, options, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(media.retrieve_state(), RetrieveState::NotAvailable);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn whole_save_skips_parent_when_child_fails() {
        let (engine, local, remote) = engine();
        let moment = moment_with_media(&engine, 3);
        remote.fail_always(&key("media-1"), Fault::Rejected);

        let options = WriteOptions::new(StorageLocation::Both, LocalType::Draft);
        let err = engine.save(&moment, options, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteFailure);

        assert!(!remote.contains(&key("moment-1")));
        assert!(!local.contains(LocalType::Draft, &key("moment-1")).unwrap());
        assert!(remote.contains(&key("media-0")));
        assert!(moment.is_dirty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn save_leaves_unretrieved_children_alone() {
        let (engine, local, remote) = engine();
        let moment = moment_with_media(&engine, 1);
        let stored = engine.placeholder(EntityKind::Media, key("media-stored"));
        moment.add_child(Arc::clone(&stored)).unwrap();

        let options = WriteOptions::new(StorageLocation::Both, LocalType::Draft);
        engine.save(&moment, options, None).await.unwrap();

        assert!(!remote.contains(&key("media-stored")));
        assert!(!local.contains(LocalType::Draft, &key("media-stored")).unwrap());
        // The reference itself is still part of the parent's record.
        let document = remote.get(&key("moment-1")).unwrap();
        assert_eq!(document.children.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn delete_removes_tree_from_both_tiers() {
        let (engine, local, remote) = engine();
        let moment = moment_with_media(&engine, 2);
        let options = WriteOptions::new(StorageLocation::Both, LocalType::Draft);
        engine.save(&moment, options, None).await.unwrap();

        // A fresh placeholder learns its children from storage.
        let stored = engine.placeholder(EntityKind::Moment, key("moment-1"));
        engine.delete(&stored, options, None).await.unwrap();

        assert!(remote.is_empty());
        assert!(local.is_empty());
        assert!(stored.is_new());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn delete_all_clears_namespace() {
        let (engine, local, _remote) = engine();
        let moment = moment_with_media(&engine, 2);
        let options = WriteOptions::new(StorageLocation::Local, LocalType::Cache);
        engine.save(&moment, options, None).await.unwrap();

        assert_eq!(engine.delete_all(LocalType::Cache).await.unwrap(), 3);
        assert!(local.is_empty());
        assert_eq!(engine.delete_all(LocalType::Draft).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_all_cancels_queued_work() {
        let (engine, _local, remote) = engine();
        remote.hold();
        let media = engine.new_entity(EntityKind::Media, key("media-1"));
        let options = WriteOptions::new(StorageLocation::Both, LocalType::Draft);

        let first = engine.save(&media, options, None);
        let second = engine.save(&media, options, None);
        assert_eq!(engine.cancel_all(&media), 2);
        remote.release();

        assert!(first.await.unwrap_err().is_cancelled());
        assert!(second.await.unwrap_err().is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stats_count_every_participant() {
        let (engine, _local, remote) = engine();
        let moment = moment_with_media(&engine, 2);
        remote.fail_next(&key("media-0"), 1, Fault::Transient);

        let options = WriteOptions::new(StorageLocation::Both, LocalType::Draft);
        engine.save(&moment, options, None).await.unwrap();

        // The parent's handle resolves before its own counter is bumped.
        while engine.stats().in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let stats = engine.stats();
        assert_eq!(stats.saves.dispatched, 3);
        assert_eq!(stats.saves.succeeded, 3);
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.last_error, None);

        engine.reset_stats();
        assert_eq!(engine.stats(), EngineStats::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_cache_write_waits_for_children() {
        let (writer, _local, remote) = engine();
        let moment = moment_with_media(&writer, 2);
        let options = WriteOptions::new(StorageLocation::Both, LocalType::Draft);
        writer.save(&moment, options, None).await.unwrap();
        remote.set_latency(Duration::from_millis(50));

        let local = Arc::new(ScriptedLocalStore::default());
        local.fail_next_put(key("moment-1"));
        let config = EngineConfig::new().with_retry(RetryConfig::no_retry());
        let engine = Engine::new(config, local.clone(), remote.clone()).unwrap();

        let restored = engine.placeholder(EntityKind::Moment, key("moment-1"));
        let options = RetrieveOptions::new(StorageLocation::Both, LocalType::Cache);
        let err = engine.retrieve(&restored, options, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Local);

        // Every child finished before the parent reported.
        assert!(!restored.tracker().is_armed());
        let children = restored.children();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|child| child.is_retrieved()));
        assert!(local.contains(LocalType::Cache, &key("media-1")).unwrap());

        // The tracker can be armed again.
        engine.retrieve(&restored, options, None).await.unwrap();
        assert_eq!(remote.call_count(RemoteOp::Fetch, &key("media-0")), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ready_fires_before_completion() {
        let local = Arc::new(ScriptedLocalStore::default());
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.insert(crate::document::Document {
            payload: Some(b"remote".to_vec()),
            ..crate::document::Document::new(EntityKind::Media, key("media-9"))
        });
        let engine = Engine::new(EngineConfig::default(), local.clone(), remote.clone()).unwrap();

        local.close_gate();
        let media = engine.placeholder(EntityKind::Media, key("media-9"));
        let options = RetrieveOptions::new(StorageLocation::Both, LocalType::Cache);
        let (ready, mut done) = engine.retrieve(&media, options, None).split();

        let readiness = tokio::time::timeout(Duration::from_secs(5), ready)
            .await
            .unwrap();
        assert_eq!(readiness, Readiness::Ready);
        assert_eq!(media.payload(), Some(b"remote".to_vec()));

        // The local cache write is still held.
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut done)
            .await
            .is_err());
        assert!(!local.contains(LocalType::Cache, &key("media-9")).unwrap());

        local.open_gate();
        done.await.unwrap();
        assert!(local.contains(LocalType::Cache, &key("media-9")).unwrap());
    }
}

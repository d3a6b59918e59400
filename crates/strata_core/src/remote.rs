//! Remote tier abstraction.

use crate::document::Document;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use strata_storage::EntityKey;
use thiserror::Error;
use tokio::sync::watch;
use tracing::trace;

/// Result type for remote tier calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors reported by a [`RemoteStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The call did not reach the service or timed out.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether repeating the call may succeed.
        retryable: bool,
    },

    /// The service has no record for the key.
    #[error("{key} not found on remote")]
    NotFound {
        /// The missing key.
        key: EntityKey,
    },

    /// The service refused the call.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>, retryable: bool) -> Self {
        Self::Transport {
            message: message.into(),
            retryable,
        }
    }

    /// Returns true if repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transport { retryable: true, .. })
    }
}

/// Acknowledgement of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Revision the remote tier assigned to the pushed document.
    pub revision: u64,
}

/// The remote tier.
///
/// Implementations are called from many tasks concurrently. Calls may be
/// abandoned at any `.await` point when the owning operation is cancelled.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetches the document stored under `key`.
    async fn fetch(&self, key: &EntityKey) -> RemoteResult<Document>;

    /// Stores `document`, replacing any previous revision.
    async fn push(&self, document: &Document) -> RemoteResult<Ack>;

    /// Removes the document stored under `key`.
    ///
    /// Returns [`RemoteError::NotFound`] if there is none.
    async fn remove(&self, key: &EntityKey) -> RemoteResult<()>;
}

/// Failure injected into a [`MemoryRemoteStore`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// A retryable transport error.
    Transient,
    /// A non-retryable transport error.
    Fatal,
    /// A rejection by the service.
    Rejected,
}

impl Fault {
    fn into_error(self, key: &EntityKey) -> RemoteError {
        match self {
            Fault::Transient => RemoteError::transport(format!("injected timeout for {key}"), true),
            Fault::Fatal => RemoteError::transport(format!("injected reset for {key}"), false),
            Fault::Rejected => RemoteError::Rejected(format!("injected rejection for {key}")),
        }
    }
}

/// A remote call observed by a [`MemoryRemoteStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    /// [`RemoteStore::fetch`].
    Fetch,
    /// [`RemoteStore::push`].
    Push,
    /// [`RemoteStore::remove`].
    Remove,
}

#[derive(Debug, Default)]
struct Faults {
    scripted: HashMap<EntityKey, VecDeque<Fault>>,
    persistent: HashMap<EntityKey, Fault>,
}

/// An in-memory remote tier with fault injection, for tests and demos.
///
/// Every call is recorded, then waits while the store is [held](Self::hold),
/// then sleeps for the configured latency, then consults injected faults.
#[derive(Debug)]
pub struct MemoryRemoteStore {
    records: RwLock<BTreeMap<EntityKey, Document>>,
    next_revision: AtomicU64,
    connected: AtomicBool,
    latency: Mutex<Duration>,
    faults: Mutex<Faults>,
    calls: Mutex<Vec<(RemoteOp, EntityKey)>>,
    gate: watch::Sender<bool>,
}

impl MemoryRemoteStore {
    /// Creates an empty, connected store with no latency.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            records: RwLock::new(BTreeMap::new()),
            next_revision: AtomicU64::new(1),
            connected: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
            faults: Mutex::new(Faults::default()),
            calls: Mutex::new(Vec::new()),
            gate,
        }
    }

    /// Stores a document directly, bypassing faults and call recording.
    ///
    /// Returns the assigned revision.
    pub fn insert(&self, mut document: Document) -> u64 {
        let revision = self.next_revision.fetch_add(1, Ordering::SeqCst);
        document.revision = Some(revision);
        self.records.write().insert(document.key.clone(), document);
        revision
    }

    /// Returns the stored document for `key`, if any.
    pub fn get(&self, key: &EntityKey) -> Option<Document> {
        self.records.read().get(key).cloned()
    }

    /// Returns true if a document is stored under `key`.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.records.read().contains_key(key)
    }

    /// Returns the number of stored documents.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Makes the next `count` calls touching `key` fail with `fault`.
    pub fn fail_next(&self, key: &EntityKey, count: usize, fault: Fault) {
        let mut faults = self.faults.lock();
        let queue = faults.scripted.entry(key.clone()).or_default();
        queue.extend(std::iter::repeat(fault).take(count));
    }

    /// Makes every call touching `key` fail with `fault`.
    pub fn fail_always(&self, key: &EntityKey, fault: Fault) {
        self.faults.lock().persistent.insert(key.clone(), fault);
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        let mut faults = self.faults.lock();
        faults.scripted.clear();
        faults.persistent.clear();
    }

    /// Connects or disconnects the store. Calls on a disconnected store fail
    /// with a retryable transport error.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Sets the simulated latency of every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Makes calls wait on entry until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(true);
    }

    /// Lets held calls proceed.
    pub fn release(&self) {
        self.gate.send_replace(false);
    }

    /// Returns every call observed so far, in order.
    pub fn calls(&self) -> Vec<(RemoteOp, EntityKey)> {
        self.calls.lock().clone()
    }

    /// Returns how many `op` calls touched `key`.
    pub fn call_count(&self, op: RemoteOp, key: &EntityKey) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(o, k)| *o == op && k == key)
            .count()
    }

    async fn enter(&self, op: RemoteOp, key: &EntityKey) -> RemoteResult<()> {
        self.calls.lock().push((op, key.clone()));
        trace!(?op, %key, "remote call");

        let mut gate = self.gate.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = gate.wait_for(|held| !*held).await;

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if !self.connected.load(Ordering::SeqCst) {
            return Err(RemoteError::transport("not connected", true));
        }

        let mut faults = self.faults.lock();
        if let Some(fault) = faults.persistent.get(key) {
            return Err(fault.into_error(key));
        }
        if let Some(fault) = faults.scripted.get_mut(key).and_then(VecDeque::pop_front) {
            return Err(fault.into_error(key));
        }
        Ok(())
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch(&self, key: &EntityKey) -> RemoteResult<Document> {
        self.enter(RemoteOp::Fetch, key).await?;
        self.get(key)
            .ok_or_else(|| RemoteError::NotFound { key: key.clone() })
    }

    async fn push(&self, document: &Document) -> RemoteResult<Ack> {
        self.enter(RemoteOp::Push, &document.key).await?;
        let revision = self.insert(document.clone());
        Ok(Ack { revision })
    }

    async fn remove(&self, key: &EntityKey) -> RemoteResult<()> {
        self.enter(RemoteOp::Remove, key).await?;
        match self.records.write().remove(key) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound { key: key.clone() }),
        }
    }
}

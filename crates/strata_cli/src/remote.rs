//! A directory-backed stand-in for the remote tier.
//!
//! Records live as encoded documents in a directory of their own, so state
//! carries over between invocations. Calls can be slowed down and made to fail at
//! random to exercise the engine's retry and cancellation paths.

use async_trait::async_trait;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{Ack, Document, EntityKey, RemoteError, RemoteResult, RemoteStore};
use strata_storage::{FileLocalStore, LocalStore, LocalType, StorageResult};
use tracing::debug;

// The simulated service keeps a single namespace.
const NAMESPACE: LocalType = LocalType::Draft;

/// Remote tier simulated on the local file system.
#[derive(Debug)]
pub struct DirRemoteStore {
    records: Arc<FileLocalStore>,
    fail_rate: f64,
    latency: Duration,
}

impl DirRemoteStore {
    /// Opens the simulated service rooted at `root`.
    pub fn open(root: &Path) -> StorageResult<Self> {
        Ok(Self {
            records: Arc::new(FileLocalStore::open(root)?),
            fail_rate: 0.0,
            latency: Duration::ZERO,
        })
    }

    /// Fails each call with a retryable error with probability `rate`.
    pub fn with_fail_rate(mut self, rate: f64) -> Self {
        self.fail_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Returns every stored key.
    pub fn keys(&self) -> StorageResult<Vec<EntityKey>> {
        self.records.keys(NAMESPACE)
    }

    /// Reads one stored document without simulated latency or faults.
    pub fn peek(&self, key: &EntityKey) -> RemoteResult<Option<Document>> {
        read(&self.records, key)
    }

    async fn enter(&self, call: &str, key: &EntityKey) -> RemoteResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.fail_rate > 0.0 && rand::thread_rng().gen_bool(self.fail_rate) {
            debug!(call, %key, "simulated timeout");
            return Err(RemoteError::transport(format!("simulated timeout on {call} {key}"), true));
        }
        Ok(())
    }

    async fn blocking<T, F>(&self, call: F) -> RemoteResult<T>
    where
        F: FnOnce(&FileLocalStore) -> RemoteResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let records = Arc::clone(&self.records);
        tokio::task::spawn_blocking(move || call(&records))
            .await
            .map_err(transport)?
    }
}

fn read(records: &FileLocalStore, key: &EntityKey) -> RemoteResult<Option<Document>> {
    let bytes = records.get(NAMESPACE, key).map_err(transport)?;
    bytes
        .map(|bytes| Document::from_bytes(&bytes).map_err(transport))
        .transpose()
}

fn transport(error: impl std::fmt::Display) -> RemoteError {
    RemoteError::transport(error.to_string(), false)
}

#[async_trait]
impl RemoteStore for DirRemoteStore {
    async fn fetch(&self, key: &EntityKey) -> RemoteResult<Document> {
        self.enter("fetch", key).await?;
        let owned = key.clone();
        self.blocking(move |records| read(records, &owned))
            .await?
            .ok_or_else(|| RemoteError::NotFound { key: key.clone() })
    }

    async fn push(&self, document: &Document) -> RemoteResult<Ack> {
        self.enter("push", &document.key).await?;
        let mut document = document.clone();
        self.blocking(move |records| {
            let previous = read(records, &document.key)?.and_then(|stored| stored.revision);
            let revision = previous.unwrap_or(0) + 1;
            document.revision = Some(revision);
            let bytes = document.to_bytes().map_err(transport)?;
            records
                .put(NAMESPACE, &document.key, &bytes)
                .map_err(transport)?;
            Ok(Ack { revision })
        })
        .await
    }

    async fn remove(&self, key: &EntityKey) -> RemoteResult<()> {
        self.enter("remove", key).await?;
        let owned = key.clone();
        let removed = self
            .blocking(move |records| records.delete(NAMESPACE, &owned).map_err(transport))
            .await?;
        if removed {
            Ok(())
        } else {
            Err(RemoteError::NotFound { key: key.clone() })
        }
    }
}

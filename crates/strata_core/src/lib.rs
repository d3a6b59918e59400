//! # Strata Core
//!
//! Recursive, cancellable persistence for trees of entities stored across a
//! local tier and a remote tier.
//!
//! This crate provides:
//! - [`Engine`], which retrieves, saves and deletes entity trees
//! - [`CancellableTask`] and [`TaskHandle`] for cancelling in-flight work
//! - [`ChildOperationTracker`] for fan-in of child results
//! - [`RetryPolicy`] for bounded, cancellable retries of remote calls
//! - [`RemoteStore`], the remote tier abstraction, with an in-memory
//!   implementation for tests
//!
//! ## Architecture
//!
//! Every entity owns a serial queue: operations on one entity never overlap,
//! operations on different entities run in parallel on the Tokio runtime. A
//! parent dispatches one task per child, registers it as a child of its own
//! task, and waits on its tracker for the children to report back.
//!
//! ```text
//!   caller ── Engine::retrieve(story) ──> [story queue] ── retrieve self
//!                                              │
//!                 ┌────────────────────────────┼──────────────────┐
//!                 v                            v                  v
//!          [moment-1 queue]             [moment-2 queue]    [venue queue]
//!                 │                            │                  │
//!                 └──────── child_completed ───┴──────────────────┘
//!                                              │
//!                                     story tracker fan-in
//! ```
//!
//! ## Key Invariants
//!
//! - Every task completes exactly once: success, failure or cancellation
//! - Cancellation is distinct from failure and propagates to every child
//! - A recursive retrieve signals ready at most once, before completion
//! - A whole save writes a parent only after all its children succeeded
//! - No I/O happens while an entity's mutex is held
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata_core::{
//!     Engine, EngineConfig, EntityKey, EntityKind, LocalType, MemoryRemoteStore,
//!     StorageLocation, WriteOptions,
//! };
//! use strata_storage::InMemoryLocalStore;
//!
//! # async fn demo() -> strata_core::PersistResult<()> {
//! let engine = Engine::new(
//!     EngineConfig::default(),
//!     Arc::new(InMemoryLocalStore::new()),
//!     Arc::new(MemoryRemoteStore::new()),
//! )?;
//!
//! let moment = engine.new_entity(EntityKind::Moment, EntityKey::new("moment-1")?);
//! moment.set_payload(Some(b"sunset".to_vec()));
//!
//! let options = WriteOptions::new(StorageLocation::Both, LocalType::Draft);
//! engine.save(&moment, options, None).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod document;
mod entity;
mod error;
mod handle;
mod kind;
mod queue;
mod remote;
mod retry;
mod signal;
mod stats;
mod sync;
mod task;
mod tracker;
mod types;

pub use config::{EngineConfig, RetryConfig, DEFAULT_MUTEX_HOLD_WARNING};
pub use coordinator::Engine;
pub use document::{ChildRef, Document, FORMAT_VERSION};
pub use entity::{generate_key, Entity, RetrieveState};
pub use error::{ErrorKind, PersistError, PersistResult};
pub use handle::RetrieveHandle;
pub use kind::EntityKind;
pub use queue::TaskQueue;
pub use remote::{Ack, Fault, MemoryRemoteStore, RemoteError, RemoteOp, RemoteResult, RemoteStore};
pub use retry::RetryPolicy;
pub use signal::{ready_channel, Readiness, ReadyNotifier, ReadySignal};
pub use stats::{EngineStats, OperationCounts};
pub use sync::{EntityMutex, EntityMutexGuard};
pub use task::{CancellableTask, TaskHandle, TaskId, TaskState};
pub use tracker::{ChildOperationTracker, FanIn};
pub use types::{
    EntityKey, Granularity, LocalType, ObjectId, Operation, OperationKind, RetrieveOptions,
    StorageLocation, WriteOptions,
};

//! # Strata Testkit
//!
//! Test utilities for the Strata persistence engine.
//!
//! This crate provides:
//! - Test engines over in-memory or temporary-directory local stores
//! - Entity tree scenarios shared by integration tests
//! - Property-based test generators using proptest
//! - Concurrency stress helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_testkit::prelude::*;
//!
//! #[tokio::test(flavor = "multi_thread")]
//! async fn saves_a_moment() {
//!     let env = TestEngine::memory();
//!     let moment = scenarios::moment_with_media(&env, "moment-1", 3);
//!     env.save(&moment, draft_both(), None).await.unwrap();
//!     assert_eq!(env.remote.len(), 4);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use strata_core::{
        EntityKind, Fault, LocalType, Readiness, RemoteOp, RetrieveOptions, StorageLocation,
        WriteOptions,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;

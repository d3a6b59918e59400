//! Core types that parameterize every persistence operation.

use serde::{Deserialize, Serialize};
use std::fmt;
pub use strata_storage::{EntityKey, LocalType};
use uuid::Uuid;

/// Process-local identity of an in-memory entity.
///
/// Stable for the object's lifetime and used only to correlate log lines; it
/// never addresses storage.
pub type ObjectId = Uuid;

/// Which tiers an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageLocation {
    /// Only the local tier.
    Local,
    /// The local tier and the remote tier.
    Both,
}

impl StorageLocation {
    /// Returns true if the remote tier participates.
    pub fn includes_remote(&self) -> bool {
        matches!(self, StorageLocation::Both)
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::Local => f.write_str("local"),
            StorageLocation::Both => f.write_str("both"),
        }
    }
}

/// What an operation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Load an entity from the tiers.
    Retrieve,
    /// Persist an entity to the tiers.
    Save,
    /// Remove an entity from the tiers.
    Delete,
}

/// How an operation treats an entity's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    /// Self and children as one aggregate unit with a single completion and
    /// no early ready signal. Saves commit leaf-to-root.
    Whole,
    /// Self first, then children independently; retrieves may signal ready
    /// before they complete. Saves have no cross-branch commit order.
    Recursive,
}

/// An [`OperationKind`] at a [`Granularity`], used to label tasks and spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operation {
    /// What the operation does.
    pub kind: OperationKind,
    /// How it treats children.
    pub granularity: Granularity,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            OperationKind::Retrieve => "retrieve",
            OperationKind::Save => "save",
            OperationKind::Delete => "delete",
        };
        let granularity = match self.granularity {
            Granularity::Whole => "whole",
            Granularity::Recursive => "recursive",
        };
        write!(f, "{kind}-{granularity}")
    }
}

/// Options for [`Engine::retrieve`](crate::Engine::retrieve).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieveOptions {
    /// Tiers to read from.
    pub location: StorageLocation,
    /// Local namespace to read from and cache into.
    pub local_type: LocalType,
    /// Child handling.
    pub granularity: Granularity,
    /// Re-read the tiers even if the entity is already retrieved. With
    /// [`StorageLocation::Both`] this also bypasses the local tier.
    pub force_anyways: bool,
}

impl RetrieveOptions {
    /// A recursive, non-forced retrieve.
    pub fn new(location: StorageLocation, local_type: LocalType) -> Self {
        Self {
            location,
            local_type,
            granularity: Granularity::Recursive,
            force_anyways: false,
        }
    }

    /// Sets the granularity.
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Forces a re-read of the tiers.
    pub fn forced(mut self) -> Self {
        self.force_anyways = true;
        self
    }
}

/// Options for [`Engine::save`](crate::Engine::save) and
/// [`Engine::delete`](crate::Engine::delete).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Tiers to write to.
    pub location: StorageLocation,
    /// Local namespace to write to.
    pub local_type: LocalType,
    /// Child handling.
    pub granularity: Granularity,
}

impl WriteOptions {
    /// A whole-tree write.
    pub fn new(location: StorageLocation, local_type: LocalType) -> Self {
        Self {
            location,
            local_type,
            granularity: Granularity::Whole,
        }
    }

    /// Sets the granularity.
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_labels() {
        let op = Operation {
            kind: OperationKind::Save,
            granularity: Granularity::Whole,
        };
        assert_eq!(op.to_string(), "save-whole");

        let op = Operation {
            kind: OperationKind::Retrieve,
            granularity: Granularity::Recursive,
        };
        assert_eq!(op.to_string(), "retrieve-recursive");
    }

    #[test]
    fn option_builders() {
        let options = RetrieveOptions::new(StorageLocation::Both, LocalType::Cache)
            .with_granularity(Granularity::Whole)
            .forced();
        assert_eq!(options.granularity, Granularity::Whole);
        assert!(options.force_anyways);

        let options = WriteOptions::new(StorageLocation::Local, LocalType::Draft);
        assert_eq!(options.granularity, Granularity::Whole);
        assert!(!options.location.includes_remote());
    }
}

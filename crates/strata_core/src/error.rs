//! Error types for the persistence engine.

use crate::remote::RemoteError;
use strata_storage::{EntityKey, LocalType, StorageError};
use thiserror::Error;

/// Result type for persistence operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Copyable discriminant of a [`PersistError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A tier had no record for the key.
    NotFound,
    /// The remote tier failed.
    RemoteFailure,
    /// The operation was cancelled by its caller.
    Cancelled,
    /// An engine invariant was violated.
    InconsistentState,
    /// The local tier failed.
    Local,
    /// A stored record could not be decoded or encoded.
    Codec,
}

/// Errors that can occur during persistence operations.
///
/// `Cancelled` is never a flavour of `RemoteFailure`: callers can always tell
/// an aborted operation from a failed one.
#[derive(Error, Debug)]
pub enum PersistError {
    /// No record exists for the key.
    ///
    /// `local_type` is `None` when the miss came from the remote tier.
    #[error("{} not found{}", .key, namespace_suffix(.local_type))]
    NotFound {
        /// The namespace searched, if local.
        local_type: Option<LocalType>,
        /// The missing key.
        key: EntityKey,
    },

    /// The remote tier failed.
    #[error("remote failure: {message}")]
    RemoteFailure {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,

    /// An engine invariant was violated (double arm, over-completion,
    /// completion after finish). This is a programmer error.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    /// The local tier failed.
    #[error("local storage error: {0}")]
    Local(#[from] StorageError),

    /// A stored record could not be decoded or encoded.
    #[error("codec error: {0}")]
    Codec(String),
}

fn namespace_suffix(local_type: &Option<LocalType>) -> String {
    local_type.map(|lt| format!(" in {lt}")).unwrap_or_default()
}

impl PersistError {
    /// Creates a retryable remote failure.
    pub fn remote_retryable(message: impl Into<String>) -> Self {
        Self::RemoteFailure {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable remote failure.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        Self::RemoteFailure {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an [`PersistError::InconsistentState`] and reports it loudly.
    #[track_caller]
    pub fn inconsistent(message: impl Into<String>) -> Self {
        let message = message.into();
        let location = std::panic::Location::caller();
        tracing::error!(%location, "inconsistent state: {message}");
        Self::InconsistentState(message)
    }

    /// Returns the discriminant of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PersistError::NotFound { .. } => ErrorKind::NotFound,
            PersistError::RemoteFailure { .. } => ErrorKind::RemoteFailure,
            PersistError::Cancelled => ErrorKind::Cancelled,
            PersistError::InconsistentState(_) => ErrorKind::InconsistentState,
            PersistError::Local(_) => ErrorKind::Local,
            PersistError::Codec(_) => ErrorKind::Codec,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PersistError::RemoteFailure { retryable: true, .. })
    }

    /// Returns true if the operation was cancelled rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PersistError::Cancelled)
    }

    /// Returns true for a cache or remote miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PersistError::NotFound { .. })
    }
}

impl From<RemoteError> for PersistError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Transport { message, retryable } => {
                PersistError::RemoteFailure { message, retryable }
            }
            RemoteError::NotFound { key } => PersistError::NotFound {
                local_type: None,
                key,
            },
            RemoteError::Rejected(message) => PersistError::remote_fatal(message),
        }
    }
}

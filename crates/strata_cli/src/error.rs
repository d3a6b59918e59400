//! CLI error type.

use strata_core::PersistError;
use strata_storage::StorageError;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// An engine operation failed.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// The data directory could not be opened or read.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// The simulated remote tier failed outside an engine operation.
    #[error("remote: {0}")]
    Remote(#[from] strata_core::RemoteError),

    /// JSON output could not be produced.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

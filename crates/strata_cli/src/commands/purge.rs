//! Purge command implementation.

use super::Workspace;
use crate::error::CliResult;
use strata_core::LocalType;
use strata_storage::LocalStore;

/// Removes every record from one local namespace.
pub async fn run(workspace: &Workspace, local_type: LocalType, dry_run: bool) -> CliResult<()> {
    if dry_run {
        let count = workspace.local.keys(local_type)?.len();
        println!("Would remove {count} records from {local_type}");
        return Ok(());
    }
    let removed = workspace.engine.delete_all(local_type).await?;
    println!("Removed {removed} records from {local_type}");
    Ok(())
}

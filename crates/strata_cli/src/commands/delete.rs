//! Delete command implementation.

use super::Workspace;
use crate::error::CliResult;
use strata_core::{EntityKey, EntityKind, WriteOptions};

/// Runs the delete command.
///
/// Child delete failures are logged by the engine and do not fail the
/// command.
pub async fn run(
    workspace: &Workspace,
    kind: EntityKind,
    key: EntityKey,
    options: WriteOptions,
) -> CliResult<()> {
    let entity = workspace.engine.placeholder(kind, key);
    workspace.engine.delete(&entity, options, None).await?;
    println!(
        "Deleted {} {} from {} ({})",
        entity.kind(),
        entity.key(),
        options.location,
        options.local_type
    );
    Ok(())
}

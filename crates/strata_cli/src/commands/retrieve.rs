//! Retrieve command implementation.

use super::{print_tree, Workspace};
use crate::error::CliResult;
use std::time::Instant;
use strata_core::{EntityKey, EntityKind, RetrieveOptions};

/// Runs the retrieve command and prints the resulting tree.
pub async fn run(
    workspace: &Workspace,
    kind: EntityKind,
    key: EntityKey,
    options: RetrieveOptions,
) -> CliResult<()> {
    let entity = workspace.engine.placeholder(kind, key);
    let started = Instant::now();
    let mut handle = workspace.engine.retrieve(&entity, options, None);

    let readiness = handle.ready().await;
    if readiness.is_ready() {
        println!("Ready after {:?}", started.elapsed());
    }
    handle.await?;
    println!("Completed after {:?}", started.elapsed());

    print_tree(&entity);
    let stats = workspace.engine.stats();
    if stats.retries > 0 {
        println!("Remote retries: {}", stats.retries);
    }
    Ok(())
}

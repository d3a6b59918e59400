//! Save command implementation.

use super::{print_tree, Workspace};
use crate::error::CliResult;
use std::sync::Arc;
use std::time::Instant;
use strata_core::{
    Entity, EntityKey, EntityKind, Granularity, LocalType, RetrieveOptions, StorageLocation,
    WriteOptions,
};
use tracing::info;

/// What to save.
#[derive(Debug)]
pub struct SaveRequest {
    /// Kind of the entity.
    pub kind: EntityKind,
    /// Key of the entity.
    pub key: EntityKey,
    /// New payload, if any.
    pub payload: Option<String>,
    /// Children to attach.
    pub children: Vec<(EntityKind, EntityKey)>,
    /// Tiers to write.
    pub location: StorageLocation,
    /// Local namespace.
    pub local_type: LocalType,
    /// Save granularity.
    pub granularity: Granularity,
}

/// Runs the save command.
///
/// The entity and any named children are loaded first when they already
/// exist, so a save never overwrites stored data it did not read.
pub async fn run(workspace: &Workspace, request: SaveRequest) -> CliResult<()> {
    let entity = load_or_create(
        workspace,
        request.kind,
        request.key,
        request.location,
        request.local_type,
    )
    .await?;

    if let Some(payload) = request.payload {
        entity.set_payload(Some(payload.into_bytes()));
    }
    for (kind, key) in request.children {
        if entity.children().iter().any(|child| child.key() == &key) {
            continue;
        }
        let child =
            load_or_create(workspace, kind, key, request.location, request.local_type).await?;
        entity.add_child(child)?;
    }

    let options =
        WriteOptions::new(request.location, request.local_type).with_granularity(request.granularity);
    let started = Instant::now();
    workspace.engine.save(&entity, options, None).await?;
    info!(elapsed = ?started.elapsed(), "save finished");

    println!("Saved to {} ({}):", options.location, options.local_type);
    print_tree(&entity);
    Ok(())
}

/// Retrieves the stored entity, or creates a new one if nothing is stored.
pub async fn load_or_create(
    workspace: &Workspace,
    kind: EntityKind,
    key: EntityKey,
    location: StorageLocation,
    local_type: LocalType,
) -> CliResult<Arc<Entity>> {
    let stored = workspace.engine.placeholder(kind, key.clone());
    let options = RetrieveOptions::new(location, local_type);
    match workspace.engine.retrieve(&stored, options, None).await {
        Ok(()) => Ok(stored),
        Err(e) if e.is_not_found() && !stored.is_retrieved() => {
            info!(%kind, %key, "not stored yet, creating");
            Ok(workspace.engine.new_entity(kind, key))
        }
        Err(e) => Err(e.into()),
    }
}

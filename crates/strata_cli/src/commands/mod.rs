//! CLI command implementations.

pub mod delete;
pub mod inspect;
pub mod purge;
pub mod retrieve;
pub mod save;

use crate::error::CliResult;
use crate::remote::DirRemoteStore;
use clap::ValueEnum;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{
    Engine, EngineConfig, Entity, EntityKey, EntityKind, LocalType, RetryConfig, StorageLocation,
};
use strata_storage::FileLocalStore;

/// Where an operation reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Tier {
    /// The local tier only.
    Local,
    /// The local tier, then the remote tier.
    Both,
}

impl From<Tier> for StorageLocation {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Local => StorageLocation::Local,
            Tier::Both => StorageLocation::Both,
        }
    }
}

/// A local namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Namespace {
    /// Unpublished edits.
    Draft,
    /// Copies of remote data.
    Cache,
}

impl From<Namespace> for LocalType {
    fn from(namespace: Namespace) -> Self {
        match namespace {
            Namespace::Draft => LocalType::Draft,
            Namespace::Cache => LocalType::Cache,
        }
    }
}

/// Parses an entity kind by name.
pub fn parse_kind(s: &str) -> Result<EntityKind, String> {
    EntityKind::parse(s).ok_or_else(|| {
        let names: Vec<_> = EntityKind::ALL.iter().map(|k| k.as_str()).collect();
        format!("unknown kind {s:?}, expected one of {}", names.join(", "))
    })
}

/// Parses an entity key.
pub fn parse_key(s: &str) -> Result<EntityKey, String> {
    EntityKey::new(s).map_err(|e| e.to_string())
}

/// Parses a `kind:key` child reference.
pub fn parse_child(s: &str) -> Result<(EntityKind, EntityKey), String> {
    let (kind, key) = s
        .split_once(':')
        .ok_or_else(|| format!("expected kind:key, got {s:?}"))?;
    Ok((parse_kind(kind)?, parse_key(key)?))
}

/// Settings for the simulated remote tier and retries.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    /// Probability that a remote call fails transiently.
    pub fail_rate: f64,
    /// Delay added to every remote call.
    pub latency: Duration,
    /// Attempts per remote call.
    pub attempts: u32,
    /// Delay before the first retry.
    pub delay: Duration,
}

/// An engine over a data directory.
///
/// ```text
/// <path>/
///   local/    local tier (draft/ and cache/ namespaces)
///   remote/   simulated remote tier
/// ```
pub struct Workspace {
    /// The engine.
    pub engine: Engine,
    /// The local tier.
    pub local: Arc<FileLocalStore>,
    /// The simulated remote tier.
    pub remote: Arc<DirRemoteStore>,
}

impl Workspace {
    /// Opens or creates the data directory at `path`.
    pub fn open(path: &Path, settings: &RemoteSettings) -> CliResult<Self> {
        let local = Arc::new(FileLocalStore::open(&path.join("local"))?);
        let remote = Arc::new(
            DirRemoteStore::open(&path.join("remote"))?
                .with_fail_rate(settings.fail_rate)
                .with_latency(settings.latency),
        );
        let retry = RetryConfig::new(settings.attempts).with_initial_delay(settings.delay);
        let engine = Engine::new(
            EngineConfig::new().with_retry(retry),
            local.clone(),
            remote.clone(),
        )?;
        Ok(Self {
            engine,
            local,
            remote,
        })
    }
}

/// Prints the tree under `root`, one entity per line.
pub fn print_tree(root: &Entity) {
    print_node(root, 0);
}

fn print_node(entity: &Entity, depth: usize) {
    let payload = match entity.payload() {
        Some(bytes) => format!("{} bytes", bytes.len()),
        None => "no payload".to_string(),
    };
    let revision = entity
        .revision()
        .map_or_else(|| "unsynced".to_string(), |r| format!("rev {r}"));
    println!(
        "{:indent$}{} {} ({payload}, {revision}, {:?})",
        "",
        entity.kind(),
        entity.key(),
        entity.retrieve_state(),
        indent = depth * 2
    );
    for child in entity.children() {
        print_node(&child, depth + 1);
    }
}

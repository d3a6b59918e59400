//! Inspect command implementation.

use super::Workspace;
use crate::error::CliResult;
use serde::Serialize;
use strata_core::{Document, LocalType};
use strata_storage::LocalStore;

/// Contents of a data directory.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Local records per namespace.
    pub local: Vec<NamespaceSummary>,
    /// Records in the simulated remote tier.
    pub remote: Vec<RecordSummary>,
}

/// Records of one local namespace.
#[derive(Debug, Serialize)]
pub struct NamespaceSummary {
    /// Namespace name.
    pub namespace: String,
    /// Records in key order.
    pub records: Vec<RecordSummary>,
}

/// One stored record.
#[derive(Debug, Serialize)]
pub struct RecordSummary {
    /// Entity key.
    pub key: String,
    /// Entity kind.
    pub kind: String,
    /// Remote revision, if synced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    /// Payload size in bytes.
    pub payload_size: usize,
    /// Child keys.
    pub children: Vec<String>,
}

impl From<&Document> for RecordSummary {
    fn from(document: &Document) -> Self {
        Self {
            key: document.key.to_string(),
            kind: document.kind.to_string(),
            revision: document.revision,
            payload_size: document.payload.as_ref().map_or(0, Vec::len),
            children: document.children.iter().map(|c| c.key.to_string()).collect(),
        }
    }
}

/// Runs the inspect command.
pub fn run(workspace: &Workspace, namespace: Option<LocalType>, format: &str) -> CliResult<()> {
    let namespaces: Vec<LocalType> = match namespace {
        Some(local_type) => vec![local_type],
        None => LocalType::ALL.to_vec(),
    };

    let mut result = InspectResult {
        local: Vec::new(),
        remote: Vec::new(),
    };
    for local_type in namespaces {
        let mut records = Vec::new();
        for key in workspace.local.keys(local_type)? {
            if let Some(bytes) = workspace.local.get(local_type, &key)? {
                records.push(RecordSummary::from(&Document::from_bytes(&bytes)?));
            }
        }
        result.local.push(NamespaceSummary {
            namespace: local_type.to_string(),
            records,
        });
    }
    for key in workspace.remote.keys()? {
        if let Some(document) = workspace.remote.peek(&key)? {
            result.remote.push(RecordSummary::from(&document));
        }
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    for namespace in &result.local {
        println!("Local {} ({} records)", namespace.namespace, namespace.records.len());
        for record in &namespace.records {
            print_record(record);
        }
    }
    println!("Remote ({} records)", result.remote.len());
    for record in &result.remote {
        print_record(record);
    }
}

fn print_record(record: &RecordSummary) {
    let revision = record
        .revision
        .map_or_else(|| "-".to_string(), |r| r.to_string());
    println!(
        "  {:<32} {:<7} rev {:<4} {:>8} bytes  {} children",
        record.key,
        record.kind,
        revision,
        record.payload_size,
        record.children.len()
    );
}

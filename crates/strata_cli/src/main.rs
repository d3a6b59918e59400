//! Strata CLI
//!
//! Command-line tools for a Strata data directory: a file-backed local tier
//! plus a simulated remote tier.
//!
//! # Commands
//!
//! - `save` - Save an entity tree, creating or updating it
//! - `retrieve` - Retrieve an entity tree and print it
//! - `delete` - Delete an entity tree
//! - `purge` - Clear one local namespace
//! - `inspect` - List stored records

mod commands;
mod error;
mod remote;

use clap::{Parser, Subcommand};
use commands::{parse_child, parse_key, parse_kind, Namespace, RemoteSettings, Tier, Workspace};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use strata_core::{EntityKey, EntityKind, Granularity, RetrieveOptions, WriteOptions};
use tracing_subscriber::EnvFilter;

/// Strata command-line persistence tools.
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long, default_value = "strata-data")]
    path: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Probability that a remote call fails transiently
    #[arg(global = true, long, default_value_t = 0.0)]
    fail_rate: f64,

    /// Latency added to every remote call, in milliseconds
    #[arg(global = true, long, default_value_t = 0)]
    latency_ms: u64,

    /// Attempts per remote call
    #[arg(global = true, long, default_value_t = 3)]
    attempts: u32,

    /// Delay before the first retry, in milliseconds
    #[arg(global = true, long, default_value_t = 200)]
    delay_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save an entity, creating it if it does not exist
    Save {
        /// Entity kind (story, moment, media, markup, venue, user)
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,

        /// Entity key
        #[arg(value_parser = parse_key)]
        key: EntityKey,

        /// New payload
        #[arg(long)]
        payload: Option<String>,

        /// Child to attach, as kind:key (repeatable)
        #[arg(long = "child", value_parser = parse_child)]
        children: Vec<(EntityKind, EntityKey)>,

        /// Tiers to write
        #[arg(long, value_enum, default_value = "both")]
        to: Tier,

        /// Local namespace
        #[arg(long, value_enum, default_value = "draft")]
        namespace: Namespace,

        /// Save the entity alongside its children instead of after them
        #[arg(long)]
        recursive: bool,
    },

    /// Retrieve an entity tree and print it
    Retrieve {
        /// Entity kind
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,

        /// Entity key
        #[arg(value_parser = parse_key)]
        key: EntityKey,

        /// Tiers to read
        #[arg(long, value_enum, default_value = "both")]
        from: Tier,

        /// Local namespace
        #[arg(long, value_enum, default_value = "cache")]
        namespace: Namespace,

        /// Report completion only, without an early ready signal
        #[arg(long)]
        whole: bool,

        /// Skip the local tier when reading from both tiers
        #[arg(long)]
        force: bool,
    },

    /// Delete an entity tree
    Delete {
        /// Entity kind
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,

        /// Entity key
        #[arg(value_parser = parse_key)]
        key: EntityKey,

        /// Tiers to delete from
        #[arg(long, value_enum, default_value = "both")]
        from: Tier,

        /// Local namespace
        #[arg(long, value_enum, default_value = "draft")]
        namespace: Namespace,
    },

    /// Remove every record from one local namespace
    Purge {
        /// Local namespace
        #[arg(value_enum)]
        namespace: Namespace,

        /// Dry run - show what would be removed
        #[arg(short, long)]
        dry_run: bool,
    },

    /// List stored records
    Inspect {
        /// Only this local namespace
        #[arg(long, value_enum)]
        namespace: Option<Namespace>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> error::CliResult<()> {
    let settings = RemoteSettings {
        fail_rate: cli.fail_rate,
        latency: Duration::from_millis(cli.latency_ms),
        attempts: cli.attempts,
        delay: Duration::from_millis(cli.delay_ms),
    };
    let workspace = Workspace::open(&cli.path, &settings)?;

    match cli.command {
        Commands::Save {
            kind,
            key,
            payload,
            children,
            to,
            namespace,
            recursive,
        } => {
            let granularity = if recursive {
                Granularity::Recursive
            } else {
                Granularity::Whole
            };
            let request = commands::save::SaveRequest {
                kind,
                key,
                payload,
                children,
                location: to.into(),
                local_type: namespace.into(),
                granularity,
            };
            commands::save::run(&workspace, request).await?;
        }
        Commands::Retrieve {
            kind,
            key,
            from,
            namespace,
            whole,
            force,
        } => {
            let mut options = RetrieveOptions::new(from.into(), namespace.into());
            if whole {
                options = options.with_granularity(Granularity::Whole);
            }
            if force {
                options = options.forced();
            }
            commands::retrieve::run(&workspace, kind, key, options).await?;
        }
        Commands::Delete {
            kind,
            key,
            from,
            namespace,
        } => {
            let options = WriteOptions::new(from.into(), namespace.into());
            commands::delete::run(&workspace, kind, key, options).await?;
        }
        Commands::Purge { namespace, dry_run } => {
            commands::purge::run(&workspace, namespace.into(), dry_run).await?;
        }
        Commands::Inspect { namespace, format } => {
            commands::inspect::run(&workspace, namespace.map(Into::into), &format)?;
        }
    }

    Ok(())
}

//! Binary entry point for ttlstore.
//!
//! This binary runs garbage collection and inspects a filesystem-backed store.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use ttlstore::config::{StoreConfig, parse_resource_types};
use ttlstore::gc::{
    GcConfigOverrides, GcOrchestrator, GcService, GcStatus, ListedObject, ResourceType,
};
use ttlstore::observability::{self, InitOptions};
use ttlstore::storage::keys;
use ttlstore::storage::{FilesystemObjectStore, ListRequest, ObjectStore};

/// ttlstore - TTL-aware object storage with garbage collection.
#[derive(Parser)]
#[command(name = "ttlstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "TTLSTORE_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Store directory, overriding config.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Delete expired objects and print the operation result.
    Gc {
        /// Report what would be deleted without deleting.
        #[arg(long)]
        dry_run: bool,

        /// Types to sweep (comma-separated).
        #[arg(long, value_delimiter = ',')]
        resource_types: Option<Vec<String>>,

        /// Objects listed per page.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Cap on objects examined per type.
        #[arg(long)]
        max_objects_per_type: Option<usize>,

        /// Serve Prometheus metrics on this port while running.
        #[arg(long)]
        metrics_port: Option<u16>,
    },

    /// Run a JSON GC trigger, checking its admin key.
    Trigger {
        /// Request file, `-` for stdin.
        #[arg(default_value = "-")]
        request: PathBuf,
    },

    /// Count objects and expired objects per type.
    Stats,
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let metrics_port = match &cli.command {
        Commands::Gc { metrics_port, .. } => *metrics_port,
        _ => None,
    };
    let _observability = match observability::init_from_config(
        &config.observability,
        InitOptions {
            verbose: cli.verbose,
            metrics_port,
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Loads configuration: explicit file, else default location, then env.
fn load_config(path: Option<&Path>) -> anyhow::Result<StoreConfig> {
    let config = match path {
        Some(path) => StoreConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StoreConfig::load_default(),
    };
    Ok(config.with_env_overrides())
}

/// Runs the selected command.
async fn run_command(cli: Cli, mut config: StoreConfig) -> anyhow::Result<()> {
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }
    let store: Arc<dyn ObjectStore> = Arc::new(
        FilesystemObjectStore::open(&config.data_dir)
            .with_context(|| format!("opening store at {}", config.data_dir.display()))?,
    );

    match cli.command {
        Commands::Gc {
            dry_run,
            resource_types,
            batch_size,
            max_objects_per_type,
            metrics_port: _,
        } => {
            let mut overrides = GcConfigOverrides::new();
            if dry_run {
                overrides = overrides.with_dry_run(true);
            }
            if let Some(names) = resource_types {
                overrides = overrides
                    .with_resource_types(parse_resource_types(names.iter().map(String::as_str))?);
            }
            if let Some(size) = batch_size {
                overrides = overrides.with_batch_size(size);
            }
            if let Some(max) = max_objects_per_type {
                overrides = overrides.with_max_objects_per_type(Some(max));
            }
            cmd_gc(store, &config, &overrides).await
        },
        Commands::Trigger { request } => cmd_trigger(store, config, &request).await,
        Commands::Stats => cmd_stats(store.as_ref()).await,
    }
}

async fn cmd_gc(
    store: Arc<dyn ObjectStore>,
    config: &StoreConfig,
    overrides: &GcConfigOverrides,
) -> anyhow::Result<()> {
    let gc = GcOrchestrator::new(store, config.gc.clone());
    let result = gc.execute_gc(overrides).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    eprintln!("{}", result.summary());
    if result.status == GcStatus::Failed {
        bail!("GC {} failed: {}", result.operation_id, result.errors.join("; "));
    }
    Ok(())
}

async fn cmd_trigger(
    store: Arc<dyn ObjectStore>,
    config: StoreConfig,
    request: &Path,
) -> anyhow::Result<()> {
    let body = if request == Path::new("-") {
        let mut body = String::new();
        std::io::stdin()
            .read_to_string(&mut body)
            .context("reading request from stdin")?;
        body
    } else {
        std::fs::read_to_string(request)
            .with_context(|| format!("reading {}", request.display()))?
    };

    let admin_key = config
        .admin_key
        .unwrap_or_else(|| SecretString::from(String::new()));
    let service = GcService::new(GcOrchestrator::new(store, config.gc), admin_key);
    let result = service.trigger_json(&body).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct TypeCounts {
    objects: usize,
    expired: usize,
    bytes: u64,
}

async fn cmd_stats(store: &dyn ObjectStore) -> anyhow::Result<()> {
    let mut report = BTreeMap::new();
    for resource_type in ResourceType::PRIORITY {
        let prefix = keys::prefix_for(resource_type.into());
        let mut counts = TypeCounts::default();
        let mut cursor = None;
        loop {
            let page = store
                .list(ListRequest::new(prefix.as_str()).with_cursor(cursor))
                .await
                .with_context(|| format!("listing {prefix}"))?;
            let now = Utc::now();
            for entry in page.objects {
                let object = ListedObject::from_entry(entry, now);
                counts.objects += 1;
                counts.bytes += object.entry.size;
                if object.expired {
                    counts.expired += 1;
                }
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        report.insert(resource_type.as_str(), counts);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

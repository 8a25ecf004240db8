//! mirrorsync binary
//!
//! Watches one directory, mirrors it into the local content store and keeps
//! its root hash published in the replicated manifest until interrupted.

use anyhow::Context;
use clap::Parser;
use mirrorsync::cli::{Cli, USAGE};
use mirrorsync::config::{ConfigLoader, StoragePaths, SyncConfig};
use mirrorsync::engine::{SyncContext, SyncEngine};
use mirrorsync::error::SyncError;
use mirrorsync::logging::init_logging;
use mirrorsync::manifest::{ManifestDocument, ManifestSnapshot};
use mirrorsync::replication::SledDocumentStore;
use mirrorsync::store::SledContentStore;
use mirrorsync::types::Root;
use mirrorsync::watch::FsNotifier;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let Some(directory) = cli.directory.clone() else {
        println!("{}", USAGE);
        process::exit(0);
    };

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if cli.print_config {
        match config.to_toml() {
            Ok(rendered) => {
                println!("{}", rendered);
                process::exit(0);
            }
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        }
    }

    let directory = match prepare_directory(&directory) {
        Ok(directory) => directory,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let paths = match config.storage.resolve(&directory) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let logging_config = config.logging.clone().with_default_file(&paths.data_dir);
    if let Err(e) = init_logging(&logging_config) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!(directory = ?directory, data_dir = ?paths.data_dir, "mirrorsync starting");

    if let Err(e) = run(directory, config, paths).await {
        error!(error = %format!("{:#}", e), "mirrorsync stopped with an error");
        eprintln!("{:#}", e);
        process::exit(1);
    }
    info!("mirrorsync stopped");
}

/// Load layered configuration, then apply command-line flags
fn load_config(cli: &Cli) -> Result<SyncConfig, SyncError> {
    let mut config = ConfigLoader::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate().map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        SyncError::ConfigError(messages.join("\n"))
    })?;
    Ok(config)
}

async fn run(directory: PathBuf, config: SyncConfig, paths: StoragePaths) -> anyhow::Result<()> {
    let root = Root::from_directory(&directory).context("Cannot name a root after the watched directory")?;

    let content = Arc::new(
        SledContentStore::new(&paths.content_store)
            .map_err(|e| SyncError::Startup(format!("Cannot open content store: {}", e)))?,
    );
    let documents = Arc::new(
        SledDocumentStore::new(&paths.document_store, config.peer_id(&paths))
            .map_err(|e| SyncError::Startup(format!("Cannot open document store: {}", e)))?,
    );
    let engine = SyncEngine::new(
        SyncContext::new(content.clone(), documents.clone()),
        config.engine_options()?,
    );

    let snapshot = ManifestSnapshot::new(&paths.manifest_snapshot);
    match snapshot.load() {
        Ok(Some(saved)) => {
            engine.manifest().seed(&saved).await?;
        }
        Ok(None) => {
            engine.manifest().refresh().await?;
        }
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable manifest snapshot");
            engine.manifest().refresh().await?;
        }
    }

    engine.reconcile(std::slice::from_ref(&root)).await?;
    let listener = engine.manifest().on_remote_update(log_manifest);

    // Watch before scanning so nothing written during the scan is missed
    let (tx, events) = mpsc::unbounded_channel();
    let notifier = FsNotifier::watch(&directory, tx)?;
    engine.register_root(&directory).await?;

    engine
        .run(events, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for Ctrl-C; stopping");
            }
        })
        .await?;

    drop(notifier);
    engine.shutdown().await;
    listener.abort();

    let manifest = engine.manifest().get().await?;
    snapshot
        .save(&manifest)
        .with_context(|| format!("Cannot save manifest snapshot to {}", snapshot.path().display()))?;
    content.flush()?;
    documents.flush()?;
    info!(roots = manifest.entries.len(), "Manifest snapshot saved");
    Ok(())
}

/// Create the watch target if needed and return its canonical path.
///
/// The default data dir is keyed by this path, so it must be resolved first.
fn prepare_directory(directory: &Path) -> Result<PathBuf, SyncError> {
    std::fs::create_dir_all(directory).map_err(|e| {
        SyncError::Startup(format!("Cannot create {}: {}", directory.display(), e))
    })?;
    dunce::canonicalize(directory)
        .map_err(|e| SyncError::Startup(format!("Cannot resolve {}: {}", directory.display(), e)))
}

fn log_manifest(manifest: &ManifestDocument) {
    for (root, content_id) in &manifest.entries {
        info!(root = %root, content_id = %content_id, "Manifest entry");
    }
}

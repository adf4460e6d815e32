//! Restore Agent - Main entry point
//!
//! Restores one binary backup into the configured data directory and exits.

use anyhow::{Context, Result};
use clap::Parser;
use restore_agent::{
    admin::ShellAdminConnector,
    config::{Config, StorageKind},
    daemon::shutdown::ShutdownCoordinator,
    engine::MongodProcessControl,
    fs::{DbPathStorage, FileOwner},
    storage::{ArtifactStore, BackupLayout, HttpArtifactStore, LocalArtifactStore},
    utils, RestoreOrchestrator,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Version of the engine that will serve the restored data
    #[arg(short, long, value_name = "VERSION")]
    engine_version: String,

    /// Backup to restore (overrides config)
    #[arg(short, long)]
    backup_name: Option<String>,

    /// Target data directory (overrides config)
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

fn build_orchestrator(config: &Config, cancel: CancellationToken) -> Result<RestoreOrchestrator> {
    let layout = BackupLayout::new(config.storage.backup_name.clone());
    let store: Box<dyn ArtifactStore> = match config.storage.kind {
        StorageKind::Local => Box::new(LocalArtifactStore::new(
            &config.storage.root,
            layout,
            cancel.clone(),
        )),
        StorageKind::Http => Box::new(HttpArtifactStore::new(
            config.storage.root.clone(),
            config.storage.token.clone(),
            Duration::from_secs(config.storage.request_timeout_secs),
            layout,
            cancel.clone(),
        )?),
    };

    let owner = config.target.owner.clone().map(|user| FileOwner {
        user,
        group: config.target.group.clone(),
    });
    let data_dir = DbPathStorage::new(
        &config.target.data_dir,
        config.target.lock_file.clone(),
        owner,
        cancel.clone(),
    );

    let engine = MongodProcessControl::new(&config.engine, cancel.clone())?;
    let admin = ShellAdminConnector::new(&config.engine, cancel.clone());

    Ok(RestoreOrchestrator::new(
        store,
        Box::new(data_dir),
        Box::new(engine),
        Box::new(admin),
        config.engine.config_path.clone(),
        cancel,
    )
    .with_policy(config.restore.compatibility))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(backup_name) = args.backup_name {
        config.storage.backup_name = backup_name;
    }
    if let Some(data_dir) = args.data_dir {
        config.target.data_dir = data_dir;
    }
    config.validate()?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting restore-agent v{} (backup: {}, data dir: {})",
        env!("CARGO_PKG_VERSION"),
        config.storage.backup_name,
        config.target.data_dir.display()
    );

    let coordinator = ShutdownCoordinator::new(CancellationToken::new());
    let cancel = coordinator.token();
    let signals = coordinator.spawn();

    let orchestrator = build_orchestrator(&config, cancel)?;
    let result = orchestrator.do_restore(&args.engine_version).await;
    signals.abort();

    if let Err(e) = result {
        let e = anyhow::Error::new(e);
        eprintln!("restore failed: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}

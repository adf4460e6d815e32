//! The restore pipeline.
//!
//! `RestoreOrchestrator::do_restore` walks the stages of `RestoreStage` in
//! order, each exactly once. The first failure ends the restore; the data
//! directory is then left for the next attempt to wipe and rebuild.

use crate::admin::{AdminConnector, AdminService};
use crate::compat::CompatibilityPolicy;
use crate::engine::{EngineProcess, EngineProcessControl, EngineVariant};
use crate::fs::LocalDataDirectory;
use crate::models::{Backup, BackupFileMeta, BackupFilesMetadata, OplogTimestamp};
use crate::storage::ArtifactStore;
use crate::transfer::progress::{format_bytes, format_duration, format_speed};
use crate::transfer::{ProgressCallback, ProgressReader, ProgressTracker};
use crate::utils::errors::{AgentError, RestoreError, RestoreResult, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;


/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RestoreStage {
    FetchMetadata,
    ValidatePreconditions,
    PrepareTargetDirectory,
    TransferFiles,
    FixSystemData,
    RecoverOplogStandalone,
    FixOwnership,
}

impl RestoreStage {
    pub const ALL: [RestoreStage; 7] = [
        RestoreStage::FetchMetadata,
        RestoreStage::ValidatePreconditions,
        RestoreStage::PrepareTargetDirectory,
        RestoreStage::TransferFiles,
        RestoreStage::FixSystemData,
        RestoreStage::RecoverOplogStandalone,
        RestoreStage::FixOwnership,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RestoreStage::FetchMetadata => "fetch-metadata",
            RestoreStage::ValidatePreconditions => "validate-preconditions",
            RestoreStage::PrepareTargetDirectory => "prepare-target-directory",
            RestoreStage::TransferFiles => "transfer-files",
            RestoreStage::FixSystemData => "fix-system-data",
            RestoreStage::RecoverOplogStandalone => "recover-oplog-standalone",
            RestoreStage::FixOwnership => "fix-ownership",
        }
    }
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Proof that system data was reconciled against the backup's last write.
///
/// Only `fix_system_data` constructs it and oplog recovery consumes it, so
/// recovery cannot be reached without the recovery point being known.
#[derive(Debug)]
pub struct SystemDataFixed {
    last_write: OplogTimestamp,
}

impl SystemDataFixed {
    pub fn last_write(&self) -> OplogTimestamp {
        self.last_write
    }
}

/// Work done against the engine between start and shutdown.
#[derive(Debug, Clone, Copy)]
enum SessionTask {
    FixSystemData(OplogTimestamp),
    /// Recovery happens during the engine's own startup/shutdown sequence.
    ShutdownOnly,
}

/// Map a collaborator error to the restore taxonomy, keeping cancellation
/// distinct from genuine failures.
fn classify(
    stage: RestoreStage,
    err: AgentError,
    wrap: impl FnOnce(AgentError) -> RestoreError,
) -> RestoreError {
    if err.is_cancelled() {
        RestoreError::Cancelled { stage }
    } else {
        wrap(err)
    }
}

/// Keep the first failure of an engine session; later ones are only logged.
fn record(first: &mut Option<RestoreError>, err: RestoreError) {
    match first {
        None => *first = Some(err),
        Some(_) => warn!(error = %err, "Additional failure during engine teardown"),
    }
}

pub struct RestoreOrchestrator {
    store: Box<dyn ArtifactStore>,
    data_dir: Box<dyn LocalDataDirectory>,
    engine: Box<dyn EngineProcessControl>,
    admin: Box<dyn AdminConnector>,
    engine_config_path: PathBuf,
    policy: CompatibilityPolicy,
    cancel: CancellationToken,
}

impl RestoreOrchestrator {
    pub fn new(
        store: Box<dyn ArtifactStore>,
        data_dir: Box<dyn LocalDataDirectory>,
        engine: Box<dyn EngineProcessControl>,
        admin: Box<dyn AdminConnector>,
        engine_config_path: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            data_dir,
            engine,
            admin,
            engine_config_path: engine_config_path.into(),
            policy: CompatibilityPolicy::default(),
            cancel,
        }
    }

    pub fn with_policy(mut self, policy: CompatibilityPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Restore the backup into the data directory for an engine running
    /// `requesting_engine_version`.
    pub async fn do_restore(&self, requesting_engine_version: &str) -> RestoreResult<()> {
        let span = info_span!(
            "restore",
            restore_id = %Uuid::new_v4(),
            backup = tracing::field::Empty,
        );

        async {
            let started = Instant::now();
            info!(
                requesting_version = requesting_engine_version,
                data_dir = %self.data_dir.root().display(),
                "Starting restore"
            );

            match self.run(requesting_engine_version).await {
                Ok(()) => {
                    info!(
                        elapsed = %format_duration(started.elapsed().as_secs()),
                        "Restore complete, data directory is ready"
                    );
                    Ok(())
                }
                Err(e) => {
                    error!(stage = %e.stage(), error = %e, "Restore failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, requesting_engine_version: &str) -> RestoreResult<()> {
        let (backup, manifest) = self.fetch_metadata().await?;
        self.validate_preconditions(requesting_engine_version, &backup)
            .await?;
        self.prepare_target_directory(&manifest).await?;
        self.transfer_files(&manifest).await?;
        let fixed = self.fix_system_data(backup.backup_last_ts()).await?;
        self.recover_oplog_standalone(fixed).await?;
        self.fix_ownership().await
    }

    fn checkpoint(&self, stage: RestoreStage) -> RestoreResult<()> {
        if self.cancel.is_cancelled() {
            warn!(%stage, "Restore cancelled");
            return Err(RestoreError::Cancelled { stage });
        }
        Ok(())
    }

    async fn fetch_metadata(&self) -> RestoreResult<(Backup, BackupFilesMetadata)> {
        let stage = RestoreStage::FetchMetadata;
        self.checkpoint(stage)?;
        info!("Fetching backup sentinel and file manifest");

        let backup = self.store.fetch_sentinel().await.map_err(|e| {
            classify(stage, e, |source| RestoreError::MetadataFetchFailed {
                what: "sentinel",
                source,
            })
        })?;
        if let Some(name) = &backup.backup_name {
            Span::current().record("backup", name.as_str());
        }

        let manifest = self.store.fetch_files_metadata().await.map_err(|e| {
            classify(stage, e, |source| RestoreError::MetadataFetchFailed {
                what: "file manifest",
                source,
            })
        })?;
        manifest
            .validate()
            .map_err(|reason| RestoreError::InvalidManifest { reason })?;

        info!(
            engine_version = backup.engine_version(),
            last_write = %backup.backup_last_ts(),
            directories = manifest.directories.len(),
            files = manifest.files.len(),
            total = %format_bytes(manifest.total_bytes()),
            "Fetched backup metadata"
        );
        Ok((backup, manifest))
    }

    async fn validate_preconditions(
        &self,
        requesting_engine_version: &str,
        backup: &Backup,
    ) -> RestoreResult<()> {
        let stage = RestoreStage::ValidatePreconditions;
        self.checkpoint(stage)?;
        info!(
            requesting = requesting_engine_version,
            backup = backup.engine_version(),
            "Validating restore preconditions"
        );

        self.policy
            .ensure_compatible(requesting_engine_version, backup.engine_version())?;

        self.data_dir
            .ensure_lock_file_empty()
            .await
            .map_err(|e| match e {
                AgentError::DirtyLockFile { path, size } => {
                    RestoreError::DirtyTargetDirectory { path, size }
                }
                other => classify(stage, other, RestoreError::DirectoryPrepFailed),
            })?;

        info!(policy = self.policy.name(), "Preconditions satisfied");
        Ok(())
    }

    async fn prepare_target_directory(&self, manifest: &BackupFilesMetadata) -> RestoreResult<()> {
        let stage = RestoreStage::PrepareTargetDirectory;
        self.checkpoint(stage)?;
        info!(path = %self.data_dir.root().display(), "Preparing target data directory");

        let prepare = async {
            self.data_dir.cleanup().await?;
            self.data_dir.ensure_empty().await?;
            self.data_dir.create_directories(&manifest.directories).await
        };
        prepare
            .await
            .map_err(|e| classify(stage, e, RestoreError::DirectoryPrepFailed))?;

        info!(
            directories = manifest.directories.len(),
            "Target data directory prepared"
        );
        Ok(())
    }

    async fn transfer_files(&self, manifest: &BackupFilesMetadata) -> RestoreResult<()> {
        let stage = RestoreStage::TransferFiles;
        let total_bytes = manifest.total_bytes();
        let tracker = Arc::new(Mutex::new(ProgressTracker::new(
            total_bytes,
            manifest.files.len(),
        )));
        let mut completed = 0u64;

        info!(
            files = manifest.files.len(),
            total = %format_bytes(total_bytes),
            "Downloading backup files to data directory"
        );

        for file in &manifest.files {
            self.checkpoint(stage)?;

            let written = self
                .transfer_file(file, &tracker, completed)
                .await
                .map_err(|e| {
                    classify(stage, e, |source| RestoreError::FileTransferFailed {
                        path: file.path.clone(),
                        source,
                    })
                })?;
            completed += written;

            if let Ok(mut tracker) = tracker.lock() {
                tracker.update(completed);
                tracker.file_finished();
            }
        }

        let (elapsed, speed) = match tracker.lock() {
            Ok(tracker) => (tracker.elapsed().as_secs(), tracker.average_speed()),
            Err(_) => (0, 0),
        };
        info!(
            files = manifest.files.len(),
            total = %format_bytes(completed),
            elapsed = %format_duration(elapsed),
            speed = %format_speed(speed),
            "Backup files transferred"
        );
        Ok(())
    }

    /// Copy one file. The reader is owned by this call and closed when it
    /// returns, whether the copy succeeded or not.
    async fn transfer_file(
        &self,
        file: &BackupFileMeta,
        tracker: &Arc<Mutex<ProgressTracker>>,
        completed_before: u64,
    ) -> Result<u64> {
        info!(path = %file.path, size = file.size, "Copying backup file");
        if let Ok(mut tracker) = tracker.lock() {
            tracker.file_started(&file.path);
        }

        let source = self.store.open_reader(file).await?;

        let progress = tracker.clone();
        let callback: ProgressCallback = Arc::new(move |read| {
            let Ok(mut tracker) = progress.lock() else {
                return;
            };
            let snapshot = tracker.update(completed_before + read);
            debug!(
                file = snapshot.current_file.as_deref().unwrap_or_default(),
                percent = snapshot.percent_complete,
                speed = %format_speed(snapshot.bytes_per_second),
                eta = %format_duration(snapshot.eta_seconds),
                "Transfer progress"
            );
        });

        let mut reader = ProgressReader::new(source, callback);
        self.data_dir.save_stream(&mut reader, file).await
    }

    /// Reconcile replication bookkeeping with `last_write`, the authoritative
    /// end of the backup.
    pub async fn fix_system_data(&self, last_write: OplogTimestamp) -> RestoreResult<SystemDataFixed> {
        self.checkpoint(RestoreStage::FixSystemData)?;
        info!(last_write = %last_write, "Fixing system data");

        self.run_engine_session(
            EngineVariant::DisableSessionCacheRefresh,
            SessionTask::FixSystemData(last_write),
        )
        .await?;

        info!("System data fixed");
        Ok(SystemDataFixed { last_write })
    }

    /// Let the engine replay its oplog up to the recovery point as a standalone.
    pub async fn recover_oplog_standalone(&self, fixed: SystemDataFixed) -> RestoreResult<()> {
        self.checkpoint(RestoreStage::RecoverOplogStandalone)?;
        info!(recovery_point = %fixed.last_write(), "Recovering from oplog as standalone");

        self.run_engine_session(EngineVariant::RecoverOplogAsStandalone, SessionTask::ShutdownOnly)
            .await?;

        info!("Oplog recovery finished");
        Ok(())
    }

    async fn fix_ownership(&self) -> RestoreResult<()> {
        let stage = RestoreStage::FixOwnership;
        self.checkpoint(stage)?;
        info!("Fixing ownership of restored files");

        self.data_dir
            .fix_ownership()
            .await
            .map_err(|e| classify(stage, e, RestoreError::OwnershipFixFailed))?;

        info!("Ownership fixed");
        Ok(())
    }

    /// Start the engine in `variant` mode, run `task`, and tear it down.
    ///
    /// Once a process handle exists it is shut down (admin shutdown, or
    /// `terminate` when there is no usable session) and waited for exactly
    /// once, on every path. The first failure is returned.
    async fn run_engine_session(&self, variant: EngineVariant, task: SessionTask) -> RestoreResult<()> {
        let stage = variant.stage();

        let mut process = self
            .engine
            .start_with_variant(&self.engine_config_path, variant)
            .await
            .map_err(|e| classify(stage, e, |source| RestoreError::EngineStartFailed { variant, source }))?;

        let mut first_error = None;
        let uri = process.uri().to_string();
        let session = self.open_session(&uri, stage, &mut first_error).await;

        if let (Some(session), SessionTask::FixSystemData(last_write)) = (&session, task) {
            if self.cancel.is_cancelled() {
                record(&mut first_error, RestoreError::Cancelled { stage });
            } else if let Err(e) = session.fix_system_data_after_restore(last_write).await {
                let err = classify(stage, e, |source| RestoreError::AdminOperationFailed {
                    stage,
                    operation: "fix system data",
                    source,
                });
                record(&mut first_error, err);
            }
        }

        self.shut_down(process.as_mut(), session, stage, &mut first_error)
            .await;

        if let Err(source) = process.wait().await {
            record(&mut first_error, RestoreError::EngineExitFailed { stage, source });
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(%variant, "Engine session finished");
                Ok(())
            }
        }
    }

    async fn open_session(
        &self,
        uri: &str,
        stage: RestoreStage,
        first_error: &mut Option<RestoreError>,
    ) -> Option<Box<dyn AdminService>> {
        match self.admin.connect(uri).await {
            Ok(session) => Some(session),
            Err(e) => {
                let err = classify(stage, e, |source| RestoreError::AdminOperationFailed {
                    stage,
                    operation: "connect",
                    source,
                });
                record(first_error, err);
                None
            }
        }
    }

    async fn shut_down(
        &self,
        process: &mut dyn EngineProcess,
        session: Option<Box<dyn AdminService>>,
        stage: RestoreStage,
        first_error: &mut Option<RestoreError>,
    ) {
        if let Some(session) = session {
            match session.shutdown().await {
                Ok(()) => return,
                Err(source) => {
                    warn!(variant = %process.variant(), error = %source, "Admin shutdown failed");
                    record(first_error, RestoreError::EngineShutdownFailed { stage, source });
                }
            }
        }

        warn!(variant = %process.variant(), "Terminating engine without admin shutdown");
        if let Err(source) = process.terminate() {
            record(first_error, RestoreError::EngineShutdownFailed { stage, source });
        }
    }
}

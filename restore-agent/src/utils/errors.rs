//! Custom error types for the restore agent.
//!
//! `AgentError` is what the collaborators (artifact store, data directory,
//! engine process control, admin service) report. `RestoreError` is what the
//! orchestrator hands back to its caller: one variant per failure kind, each
//! carrying the stage it happened in and the collaborator error as its source.

use crate::engine::EngineVariant;
use crate::restore::RestoreStage;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Lock file {} is not empty ({size} bytes)", path.display())]
    DirtyLockFile { path: PathBuf, size: u64 },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Admin command error: {0}")]
    Admin(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Terminal failure of one restore attempt.
#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("failed to fetch backup {what}")]
    MetadataFetchFailed {
        what: &'static str,
        #[source]
        source: AgentError,
    },

    #[error("backup manifest is invalid: {reason}")]
    InvalidManifest { reason: String },

    #[error("backup taken by engine {backup} cannot be restored with engine {requesting} (policy: {policy})")]
    IncompatibleVersion {
        requesting: String,
        backup: String,
        policy: &'static str,
    },

    #[error("malformed engine version {version:?}")]
    MalformedVersion { version: String },

    #[error("target directory is dirty: lock file {} holds {size} bytes", path.display())]
    DirtyTargetDirectory { path: PathBuf, size: u64 },

    #[error("failed to prepare target data directory")]
    DirectoryPrepFailed(#[source] AgentError),

    #[error("bad backup file {path}")]
    FileTransferFailed {
        path: String,
        #[source]
        source: AgentError,
    },

    #[error("unable to start engine in {variant} mode")]
    EngineStartFailed {
        variant: EngineVariant,
        #[source]
        source: AgentError,
    },

    #[error("{operation} failed during {stage}")]
    AdminOperationFailed {
        stage: RestoreStage,
        operation: &'static str,
        #[source]
        source: AgentError,
    },

    #[error("engine shutdown failed during {stage}")]
    EngineShutdownFailed {
        stage: RestoreStage,
        #[source]
        source: AgentError,
    },

    #[error("engine did not exit cleanly during {stage}")]
    EngineExitFailed {
        stage: RestoreStage,
        #[source]
        source: AgentError,
    },

    #[error("failed to fix ownership of restored data")]
    OwnershipFixFailed(#[source] AgentError),

    #[error("restore cancelled during {stage}")]
    Cancelled { stage: RestoreStage },
}

impl RestoreError {
    /// Stage in which the restore stopped.
    pub fn stage(&self) -> RestoreStage {
        match self {
            RestoreError::MetadataFetchFailed { .. } | RestoreError::InvalidManifest { .. } => {
                RestoreStage::FetchMetadata
            }
            RestoreError::IncompatibleVersion { .. }
            | RestoreError::MalformedVersion { .. }
            | RestoreError::DirtyTargetDirectory { .. } => RestoreStage::ValidatePreconditions,
            RestoreError::DirectoryPrepFailed(_) => RestoreStage::PrepareTargetDirectory,
            RestoreError::FileTransferFailed { .. } => RestoreStage::TransferFiles,
            RestoreError::EngineStartFailed { variant, .. } => variant.stage(),
            RestoreError::AdminOperationFailed { stage, .. }
            | RestoreError::EngineShutdownFailed { stage, .. }
            | RestoreError::EngineExitFailed { stage, .. }
            | RestoreError::Cancelled { stage } => *stage,
            RestoreError::OwnershipFixFailed(_) => RestoreStage::FixOwnership,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RestoreError::Cancelled { .. })
    }
}

pub type RestoreResult<T> = std::result::Result<T, RestoreError>;

//! The engine data directory being rebuilt.
//!
//! `DbPathStorage` owns every on-disk mutation of a restore: lock file check,
//! wipe, directory layout, streamed file writes and the final ownership fix.

use crate::models::files::normalize_relative;
use crate::models::BackupFileMeta;
use crate::utils::cancel::cancellable;
use crate::utils::errors::{AgentError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

#[async_trait]
pub trait LocalDataDirectory: Send + Sync {
    fn root(&self) -> &Path;

    /// Succeeds when the engine lock file is absent or empty.
    async fn ensure_lock_file_empty(&self) -> Result<()>;

    /// Remove everything inside the data directory, creating it if missing.
    async fn cleanup(&self) -> Result<()>;

    /// Succeeds when the data directory has no entries.
    async fn ensure_empty(&self) -> Result<()>;

    /// Create each relative directory (and any missing ancestors).
    async fn create_directories(&self, directories: &[String]) -> Result<()>;

    /// Write `reader` to the file's local path, returning the bytes written.
    async fn save_stream(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        file: &BackupFileMeta,
    ) -> Result<u64>;

    /// Hand the restored tree to the user the engine runs as.
    async fn fix_ownership(&self) -> Result<()>;
}

/// Owner applied by `fix_ownership`, resolved from user/group names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOwner {
    pub user: String,
    pub group: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DbPathStorage {
    root: PathBuf,
    lock_file: String,
    owner: Option<FileOwner>,
    cancel: CancellationToken,
}

impl DbPathStorage {
    pub fn new<P: AsRef<Path>>(
        root: P,
        lock_file: impl Into<String>,
        owner: Option<FileOwner>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            lock_file: lock_file.into(),
            owner,
            cancel,
        }
    }

    pub fn lock_file_path(&self) -> PathBuf {
        self.root.join(&self.lock_file)
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let normalized = normalize_relative(relative).ok_or_else(|| {
            AgentError::InvalidData(format!("{relative:?} escapes the data directory"))
        })?;
        Ok(self.root.join(normalized))
    }
}

#[async_trait]
impl LocalDataDirectory for DbPathStorage {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn ensure_lock_file_empty(&self) -> Result<()> {
        let path = self.lock_file_path();
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.len() == 0 => Ok(()),
            Ok(meta) => Err(AgentError::DirtyLockFile {
                path,
                size: meta.len(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn cleanup(&self) -> Result<()> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.root.display(), "Data directory missing, creating it");
                tokio::fs::create_dir_all(&self.root).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            // symlink_metadata so a link to a directory is unlinked, not followed
            let meta = tokio::fs::symlink_metadata(&path).await?;
            if meta.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
            removed += 1;
        }

        info!(path = %self.root.display(), removed, "Cleaned up data directory");
        Ok(())
    }

    async fn ensure_empty(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        match entries.next_entry().await? {
            None => Ok(()),
            Some(entry) => Err(AgentError::InvalidData(format!(
                "data directory {} is not empty: found {}",
                self.root.display(),
                entry.file_name().to_string_lossy()
            ))),
        }
    }

    async fn create_directories(&self, directories: &[String]) -> Result<()> {
        for dir in directories {
            let path = self.resolve(dir)?;
            debug!(path = %path.display(), "Creating directory");
            tokio::fs::create_dir_all(&path).await?;
        }
        Ok(())
    }

    async fn save_stream(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        file: &BackupFileMeta,
    ) -> Result<u64> {
        let path = self.resolve(&file.path)?;
        let mut output = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;

        let written = cancellable(&self.cancel, async {
            Ok(tokio::io::copy(reader, &mut output).await?)
        })
        .await?;

        output.flush().await?;
        output.sync_all().await?;

        if written != file.size {
            return Err(AgentError::InvalidData(format!(
                "incomplete copy of {}: wrote {} of {} bytes",
                file.path, written, file.size
            )));
        }

        if let Some(mode) = file.file_mode {
            apply_mode(&path, mode).await?;
        }

        Ok(written)
    }

    async fn fix_ownership(&self) -> Result<()> {
        let Some(owner) = self.owner.clone() else {
            info!("No data directory owner configured, leaving ownership unchanged");
            return Ok(());
        };

        let root = self.root.clone();
        // Directory walk and chown are blocking syscalls
        let changed = tokio::task::spawn_blocking(move || chown_tree(&root, &owner))
            .await
            .map_err(|e| AgentError::Io(std::io::Error::other(e)))??;

        info!(path = %self.root.display(), entries = changed, "Fixed ownership of data directory");
        Ok(())
    }
}

#[cfg(unix)]
async fn apply_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn apply_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn chown_tree(root: &Path, owner: &FileOwner) -> Result<usize> {
    use nix::unistd::{Group, User};

    let user = User::from_name(&owner.user)
        .map_err(|e| AgentError::Config(format!("cannot look up user {}: {}", owner.user, e)))?
        .ok_or_else(|| AgentError::Config(format!("unknown user {}", owner.user)))?;

    let gid = match &owner.group {
        Some(name) => {
            Group::from_name(name)
                .map_err(|e| AgentError::Config(format!("cannot look up group {name}: {e}")))?
                .ok_or_else(|| AgentError::Config(format!("unknown group {name}")))?
                .gid
        }
        None => user.gid,
    };

    let mut changed = 0usize;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| match e.into_io_error() {
            Some(io) => AgentError::Io(io),
            None => AgentError::InvalidData("filesystem loop in data directory".to_string()),
        })?;

        std::os::unix::fs::lchown(entry.path(), Some(user.uid.as_raw()), Some(gid.as_raw()))
            .map_err(|e| {
                if e.kind() == ErrorKind::PermissionDenied {
                    AgentError::PermissionDenied(format!("chown {}: {}", entry.path().display(), e))
                } else {
                    AgentError::Io(e)
                }
            })?;
        changed += 1;
    }

    Ok(changed)
}

#[cfg(not(unix))]
fn chown_tree(_root: &Path, _owner: &FileOwner) -> Result<usize> {
    tracing::warn!("Ownership fix is not supported on this platform");
    Ok(0)
}

//! Artifact store backed by a local or mounted directory.

use super::{decode, ArtifactStore, BackupLayout, BackupReader};
use crate::models::{Backup, BackupFileMeta, BackupFilesMetadata};
use crate::utils::cancel::cancellable;
use crate::utils::errors::{AgentError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
    layout: BackupLayout,
    cancel: CancellationToken,
}

impl LocalArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P, layout: BackupLayout, cancel: CancellationToken) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            layout,
            cancel,
        }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let path = self.resolve(key);
        debug!(path = %path.display(), "Reading backup metadata");

        let raw = cancellable(&self.cancel, async {
            tokio::fs::read(&path).await.map_err(|e| not_found_or_io(e, &path))
        })
        .await?;

        Ok(serde_json::from_slice(&raw)?)
    }
}

fn not_found_or_io(err: std::io::Error, path: &Path) -> AgentError {
    if err.kind() == ErrorKind::NotFound {
        AgentError::NotFound(path.display().to_string())
    } else {
        AgentError::Io(err)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn fetch_sentinel(&self) -> Result<Backup> {
        self.read_json(&self.layout.sentinel_key()).await
    }

    async fn fetch_files_metadata(&self) -> Result<BackupFilesMetadata> {
        self.read_json(&self.layout.files_metadata_key()).await
    }

    async fn open_reader(&self, file: &BackupFileMeta) -> Result<BackupReader> {
        let path = self.resolve(&self.layout.file_key(file));
        let handle = cancellable(&self.cancel, async {
            tokio::fs::File::open(&path)
                .await
                .map_err(|e| not_found_or_io(e, &path))
        })
        .await?;

        Ok(decode(handle, file.compression))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Compression, OplogTimestamp};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn store(dir: &TempDir) -> LocalArtifactStore {
        LocalArtifactStore::new(dir.path(), BackupLayout::new("b1"), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_fetch_metadata_documents() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("b1")).unwrap();
        std::fs::write(
            dir.path().join("b1_backup_stop_sentinel.json"),
            r#"{"MongoMeta": {"Version": "6.0.1", "BackupLastTS": {"TS": 10, "Inc": 2}}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b1/mongod_backup_files_metadata.json"),
            r#"{"BackupDirectories": ["journal"], "BackupFiles": [{"Path": "journal/log1", "Size": 3}]}"#,
        )
        .unwrap();

        let store = store(&dir);
        let sentinel = store.fetch_sentinel().await.unwrap();
        assert_eq!(sentinel.backup_last_ts(), OplogTimestamp::new(10, 2));

        let manifest = store.fetch_files_metadata().await.unwrap();
        assert_eq!(manifest.files.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_sentinel_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir).fetch_sentinel().await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_garbled_manifest_is_serialization_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("b1")).unwrap();
        std::fs::write(dir.path().join("b1/mongod_backup_files_metadata.json"), b"{not json").unwrap();

        let err = store(&dir).fetch_files_metadata().await.unwrap_err();
        assert!(matches!(err, AgentError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_open_compressed_reader() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("b1")).unwrap();
        let plain = b"WiredTiger version string".to_vec();
        std::fs::write(
            dir.path().join("b1/WiredTiger.zst"),
            zstd::encode_all(&plain[..], 1).unwrap(),
        )
        .unwrap();

        let mut meta = BackupFileMeta::new("WiredTiger", plain.len() as u64);
        meta.compression = Compression::Zstd;

        let mut reader = store(&dir).open_reader(&meta).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, plain);
    }

    #[tokio::test]
    async fn test_cancelled_store_refuses_reads() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let store = LocalArtifactStore::new(dir.path(), BackupLayout::new("b1"), cancel);

        let err = store.fetch_sentinel().await.unwrap_err();
        assert!(err.is_cancelled());
    }
}

//! Artifact stores: where backup sentinels, manifests and file contents come from.
//!
//! The orchestrator only sees the `ArtifactStore` trait. Object keys follow one
//! convention shared by every backend (`BackupLayout`).

pub mod http;
pub mod local;

use crate::models::{Backup, BackupFileMeta, BackupFilesMetadata, Compression};
use crate::utils::errors::Result;
use async_compression::tokio::bufread::ZstdDecoder;
use async_trait::async_trait;
use tokio::io::{AsyncRead, BufReader};

pub use http::HttpArtifactStore;
pub use local::LocalArtifactStore;

/// Streaming reader over one backup file's (decoded) contents.
pub type BackupReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch and parse the backup sentinel.
    async fn fetch_sentinel(&self) -> Result<Backup>;

    /// Fetch and parse the backup file manifest.
    async fn fetch_files_metadata(&self) -> Result<BackupFilesMetadata>;

    /// Open a reader yielding the file's uncompressed bytes.
    async fn open_reader(&self, file: &BackupFileMeta) -> Result<BackupReader>;
}

/// Object key convention for one named backup.
#[derive(Debug, Clone)]
pub struct BackupLayout {
    backup_name: String,
}

impl BackupLayout {
    pub const FILES_METADATA_NAME: &'static str = "mongod_backup_files_metadata.json";
    pub const SENTINEL_SUFFIX: &'static str = "_backup_stop_sentinel.json";

    pub fn new(backup_name: impl Into<String>) -> Self {
        Self {
            backup_name: backup_name.into(),
        }
    }

    pub fn sentinel_key(&self) -> String {
        format!("{}{}", self.backup_name, Self::SENTINEL_SUFFIX)
    }

    pub fn files_metadata_key(&self) -> String {
        format!("{}/{}", self.backup_name, Self::FILES_METADATA_NAME)
    }

    pub fn file_key(&self, file: &BackupFileMeta) -> String {
        format!(
            "{}/{}{}",
            self.backup_name,
            file.path.trim_start_matches("./"),
            file.compression.key_suffix()
        )
    }
}

/// Wrap a raw object stream in the decoder its compression calls for.
pub(crate) fn decode<R>(raw: R, compression: Compression) -> BackupReader
where
    R: AsyncRead + Send + Unpin + 'static,
{
    match compression {
        Compression::None => Box::new(raw),
        Compression::Zstd => Box::new(ZstdDecoder::new(BufReader::new(raw))),
    }
}

//! Backup metadata read from the artifact store.
//!
//! Both documents are produced by the backup side and are read-only here.

pub mod files;
pub mod sentinel;

pub use files::{BackupFileMeta, BackupFilesMetadata, Compression};
pub use sentinel::{Backup, EngineMeta, OplogTimestamp};

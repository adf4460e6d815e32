//! File manifest types: the directory tree and file list of a binary backup.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path};

/// How a backup file is stored in the artifact store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Zstd,
}

impl Compression {
    /// Suffix appended to the object key for stored files.
    pub fn key_suffix(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Zstd => ".zst",
        }
    }
}

/// Metadata for a single backed-up file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFileMeta {
    /// Relative path; doubles as the object key and the local destination.
    #[serde(rename = "Path")]
    pub path: String,

    /// Uncompressed size in bytes. A complete copy writes exactly this many bytes.
    #[serde(rename = "Size")]
    pub size: u64,

    #[serde(rename = "CompressedSize", default, skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,

    /// Unix mode bits to apply after the copy.
    #[serde(rename = "FileMode", default, skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<u32>,

    #[serde(rename = "Compression", default)]
    pub compression: Compression,
}

impl BackupFileMeta {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            compressed_size: None,
            file_mode: None,
            compression: Compression::None,
        }
    }
}

/// Backup file manifest, serialized as `mongod_backup_files_metadata.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFilesMetadata {
    /// Directories to recreate, in order.
    #[serde(rename = "BackupDirectories", default)]
    pub directories: Vec<String>,

    /// Files to copy, in order.
    #[serde(rename = "BackupFiles", default)]
    pub files: Vec<BackupFileMeta>,
}

impl BackupFilesMetadata {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Check that the manifest describes a tree that can be laid out as-is.
    ///
    /// Every path must be relative and stay inside the data directory, and every
    /// file's parent must be the root or one of the listed directories.
    pub fn validate(&self) -> Result<(), String> {
        let mut known = HashSet::with_capacity(self.directories.len());
        for dir in &self.directories {
            let normalized = normalize_relative(dir)
                .ok_or_else(|| format!("directory {dir:?} is not a relative path inside the data directory"))?;
            known.insert(normalized);
        }

        let mut seen_files = HashSet::with_capacity(self.files.len());
        for file in &self.files {
            let normalized = normalize_relative(&file.path)
                .ok_or_else(|| format!("file {:?} is not a relative path inside the data directory", file.path))?;
            if normalized.is_empty() {
                return Err("file entry with empty path".to_string());
            }
            if !seen_files.insert(normalized.clone()) {
                return Err(format!("file {:?} is listed more than once", file.path));
            }

            let parent = match normalized.rsplit_once('/') {
                Some((parent, _)) => parent,
                None => "",
            };
            if !parent.is_empty() && !known.contains(parent) {
                return Err(format!(
                    "parent directory {parent:?} of file {:?} is not listed",
                    file.path
                ));
            }
        }

        Ok(())
    }
}

/// Collapse a manifest path to `a/b/c` form, rejecting anything that could
/// escape the root (absolute paths, `..`, drive prefixes).
pub(crate) fn normalize_relative(raw: &str) -> Option<String> {
    let mut parts = Vec::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(dirs: &[&str], files: &[&str]) -> BackupFilesMetadata {
        BackupFilesMetadata {
            directories: dirs.iter().map(|d| d.to_string()).collect(),
            files: files.iter().map(|f| BackupFileMeta::new(*f, 1)).collect(),
        }
    }

    #[test]
    fn test_parse_manifest() {
        let raw = r#"{
            "BackupDirectories": ["journal", "diagnostic.data"],
            "BackupFiles": [
                {"Path": "WiredTiger", "Size": 50, "FileMode": 420},
                {"Path": "journal/WiredTigerLog.0000000001", "Size": 104857600,
                 "CompressedSize": 1024, "Compression": "zstd"}
            ]
        }"#;

        let parsed: BackupFilesMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.directories, vec!["journal", "diagnostic.data"]);
        assert_eq!(parsed.files[0].file_mode, Some(0o644));
        assert_eq!(parsed.files[0].compression, Compression::None);
        assert_eq!(parsed.files[1].compression, Compression::Zstd);
        assert_eq!(parsed.total_bytes(), 104857650);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_validate_accepts_root_and_listed_parents() {
        let m = manifest(&["journal", "./index/"], &["data.wt", "journal/log1", "index/a.wt"]);
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unlisted_parent() {
        let m = manifest(&["journal"], &["data.wt", "diagnostic.data/metrics"]);
        let err = m.validate().unwrap_err();
        assert!(err.contains("diagnostic.data"));
    }

    #[test]
    fn test_validate_rejects_escaping_paths() {
        assert!(manifest(&[], &["../etc/passwd"]).validate().is_err());
        assert!(manifest(&[], &["/etc/passwd"]).validate().is_err());
        assert!(manifest(&["../up"], &[]).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let m = manifest(&[], &["data.wt", "./data.wt"]);
        assert!(m.validate().unwrap_err().contains("more than once"));
    }

    #[test]
    fn test_normalize_relative() {
        assert_eq!(normalize_relative("a/./b/").as_deref(), Some("a/b"));
        assert_eq!(normalize_relative(".").as_deref(), Some(""));
        assert_eq!(normalize_relative("a/../b"), None);
    }
}

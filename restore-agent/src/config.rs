//! Configuration management for the restore agent.
//!
//! Loads configuration from a TOML file; the binary applies CLI overrides on top.

use crate::compat::CompatibilityPolicy;
use crate::utils::errors::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Backup laid out under a local (or mounted) directory
    Local,
    /// Backup served by an HTTP object gateway
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub kind: StorageKind,

    /// Directory (local) or base URL (http) holding the backups
    pub root: String,

    /// Name of the backup to restore
    pub backup_name: String,

    /// Bearer token for the HTTP gateway
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Engine data directory (dbPath) to rebuild
    pub data_dir: PathBuf,

    /// Lock file name inside `data_dir`
    #[serde(default = "default_lock_file")]
    pub lock_file: String,

    /// User that owns the restored files
    #[serde(default)]
    pub owner: Option<String>,

    /// Group that owns the restored files (defaults to the owner's primary group)
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine binary
    #[serde(default = "default_engine_binary")]
    pub binary: PathBuf,

    /// Minimal engine config used for the special startup modes
    #[serde(default = "default_engine_config_path")]
    pub config_path: PathBuf,

    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Time an engine gets to exit on its own after cancellation before it is killed
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Admin shell used to issue commands to the running engine
    #[serde(default = "default_admin_shell")]
    pub admin_shell: PathBuf,

    #[serde(default = "default_admin_timeout_secs")]
    pub admin_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreConfig {
    #[serde(default)]
    pub compatibility: CompatibilityPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_request_timeout_secs() -> u64 {
    300
}

fn default_lock_file() -> String {
    "mongod.lock".to_string()
}

fn default_engine_binary() -> PathBuf {
    PathBuf::from("mongod")
}

fn default_engine_config_path() -> PathBuf {
    PathBuf::from("/etc/restore-agent/mongod-minimal.conf")
}

fn default_bind_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    120
}

fn default_shutdown_grace_secs() -> u64 {
    60
}

fn default_admin_shell() -> PathBuf {
    PathBuf::from("mongosh")
}

fn default_admin_timeout_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_engine_binary(),
            config_path: default_engine_config_path(),
            bind_ip: default_bind_ip(),
            startup_timeout_secs: default_startup_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            admin_shell: default_admin_shell(),
            admin_timeout_secs: default_admin_timeout_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl EngineConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn admin_timeout(&self) -> Duration {
        Duration::from_secs(self.admin_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AgentError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.root.trim().is_empty() {
            return Err(AgentError::Config("storage.root must not be empty".to_string()));
        }
        if self.storage.backup_name.trim().is_empty() {
            return Err(AgentError::Config(
                "storage.backup_name must not be empty".to_string(),
            ));
        }
        if self.target.data_dir.as_os_str().is_empty() {
            return Err(AgentError::Config("target.data_dir must not be empty".to_string()));
        }
        if self.target.lock_file.is_empty() || self.target.lock_file.contains('/') {
            return Err(AgentError::Config(
                "target.lock_file must be a plain file name".to_string(),
            ));
        }
        if self.target.group.is_some() && self.target.owner.is_none() {
            return Err(AgentError::Config(
                "target.group requires target.owner".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [storage]
        kind = "local"
        root = "/backups"
        backup_name = "stream_20240101T000000Z"

        [target]
        data_dir = "/var/lib/mongodb"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.kind, StorageKind::Local);
        assert_eq!(config.target.lock_file, "mongod.lock");
        assert_eq!(config.target.data_dir, PathBuf::from("/var/lib/mongodb"));
        assert_eq!(config.engine.binary, PathBuf::from("mongod"));
        assert_eq!(config.engine.startup_timeout(), Duration::from_secs(120));
        assert_eq!(config.restore.compatibility, CompatibilityPolicy::SameMajor);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_full_config() {
        let raw = r#"
            [storage]
            kind = "http"
            root = "https://objects.internal/backups"
            backup_name = "nightly"
            token = "secret"
            request_timeout_secs = 30

            [target]
            data_dir = "/data/db"
            owner = "mongodb"
            group = "mongodb"

            [engine]
            binary = "/usr/bin/mongod"
            config_path = "/etc/mongod-restore.conf"
            shutdown_grace_secs = 5

            [restore]
            compatibility = "same-minor"

            [log]
            level = "debug"
        "#;

        let config = Config::from_toml(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.kind, StorageKind::Http);
        assert_eq!(config.storage.token.as_deref(), Some("secret"));
        assert_eq!(config.target.owner.as_deref(), Some("mongodb"));
        assert_eq!(config.engine.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.engine.admin_shell, PathBuf::from("mongosh"));
        assert_eq!(config.restore.compatibility, CompatibilityPolicy::SameMinor);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.storage.backup_name = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.target.group = Some("mongodb".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.target.lock_file = "../mongod.lock".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_required_section() {
        let err = Config::from_toml("[storage]\nkind = \"local\"\n").unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }
}

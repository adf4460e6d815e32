//! Restore Agent Library
//!
//! Rebuilds a database engine data directory from a binary backup: fetches
//! the backup metadata, streams every file into place, then runs the engine
//! through system-data repair and standalone oplog recovery.

pub mod admin;
pub mod compat;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod fs;
pub mod models;
pub mod restore;
pub mod storage;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use restore::{RestoreOrchestrator, RestoreStage};
pub use utils::errors::{AgentError, RestoreError};
pub type Result<T> = std::result::Result<T, AgentError>;

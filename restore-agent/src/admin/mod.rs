//! Privileged admin sessions against a running engine instance.

pub mod shell;

use crate::models::OplogTimestamp;
use crate::utils::errors::Result;
use async_trait::async_trait;

pub use shell::ShellAdminConnector;

/// Session bound to one engine endpoint. Dropped once its engine is shut down.
#[async_trait]
pub trait AdminService: Send + Sync {
    /// Bring replication bookkeeping in line with `last_write`, the last write
    /// contained in the backup. Calling it twice with the same timestamp is harmless.
    async fn fix_system_data_after_restore(&self, last_write: OplogTimestamp) -> Result<()>;

    /// Ask the engine to shut down cleanly. Returns once the request was
    /// delivered; process exit is observed through the process handle.
    async fn shutdown(&self) -> Result<()>;
}

/// Binds admin sessions to engine endpoints.
#[async_trait]
pub trait AdminConnector: Send + Sync {
    async fn connect(&self, uri: &str) -> Result<Box<dyn AdminService>>;
}

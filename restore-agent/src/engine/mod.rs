//! Engine process control: starting the database engine in the two special
//! modes a restore needs, and observing its exit.

pub mod mongod;

use crate::restore::RestoreStage;
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;

pub use mongod::MongodProcessControl;

/// Startup modes used by a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineVariant {
    /// Logical session cache refresh disabled, so system collections can be
    /// rewritten without the engine recreating them underneath us.
    DisableSessionCacheRefresh,
    /// Standalone oplog recovery: the engine replays its own oplog up to the
    /// recorded recovery point during startup, detached from any replica set.
    RecoverOplogAsStandalone,
}

impl EngineVariant {
    pub fn name(&self) -> &'static str {
        match self {
            EngineVariant::DisableSessionCacheRefresh => "disable-session-cache-refresh",
            EngineVariant::RecoverOplogAsStandalone => "recover-oplog-standalone",
        }
    }

    /// `--setParameter` values passed on the engine command line.
    pub fn set_parameters(&self) -> &'static [&'static str] {
        match self {
            EngineVariant::DisableSessionCacheRefresh => &["disableLogicalSessionCacheRefresh=true"],
            EngineVariant::RecoverOplogAsStandalone => &[
                "recoverFromOplogAsStandalone=true",
                "takeUnstableCheckpointOnShutdown=true",
            ],
        }
    }

    /// Restore stage that runs the engine in this mode.
    pub fn stage(&self) -> RestoreStage {
        match self {
            EngineVariant::DisableSessionCacheRefresh => RestoreStage::FixSystemData,
            EngineVariant::RecoverOplogAsStandalone => RestoreStage::RecoverOplogStandalone,
        }
    }
}

impl fmt::Display for EngineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One spawned engine instance.
///
/// The stage that started it owns it; it must be shut down (through the admin
/// service, or `terminate` when no admin session exists) before `wait`.
#[async_trait]
pub trait EngineProcess: Send {
    /// Connection endpoint.
    fn uri(&self) -> &str;

    fn variant(&self) -> EngineVariant;

    /// Signal the process to exit cleanly without an admin session.
    fn terminate(&mut self) -> Result<()>;

    /// Block until the process has exited; abnormal exit is an error.
    async fn wait(&mut self) -> Result<()>;
}

#[async_trait]
pub trait EngineProcessControl: Send + Sync {
    /// Start the engine in `variant` mode. Returns only once the engine accepts
    /// connections on its endpoint.
    async fn start_with_variant(
        &self,
        config_path: &Path,
        variant: EngineVariant,
    ) -> Result<Box<dyn EngineProcess>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_parameters() {
        assert_eq!(
            EngineVariant::DisableSessionCacheRefresh.set_parameters(),
            &["disableLogicalSessionCacheRefresh=true"]
        );
        assert!(EngineVariant::RecoverOplogAsStandalone
            .set_parameters()
            .contains(&"recoverFromOplogAsStandalone=true"));
    }

    #[test]
    fn test_variant_stage() {
        assert_eq!(EngineVariant::DisableSessionCacheRefresh.stage(), RestoreStage::FixSystemData);
        assert_eq!(
            EngineVariant::RecoverOplogAsStandalone.stage(),
            RestoreStage::RecoverOplogStandalone
        );
        assert_eq!(EngineVariant::RecoverOplogAsStandalone.to_string(), "recover-oplog-standalone");
    }
}

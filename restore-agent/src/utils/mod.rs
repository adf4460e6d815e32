//! Utility modules for the restore agent.

pub mod cancel;
pub mod errors;
pub mod logger;

pub use errors::{AgentError, RestoreError, RestoreResult, Result};

//! Process-level plumbing for the restore binary.

pub mod shutdown;

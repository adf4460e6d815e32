//! Local filesystem side of a restore.

pub mod data_dir;

pub use data_dir::{DbPathStorage, FileOwner, LocalDataDirectory};

//! Progress accounting for the file transfer stage.

pub mod progress;
pub mod progress_reader;

pub use progress::ProgressTracker;
pub use progress_reader::{ProgressCallback, ProgressReader};

//! Byte-level progress accounting for the file transfer stage.
//!
//! The tracker is fed the running byte total across every manifest file;
//! its snapshots carry speed and ETA for the periodic progress log line.

use std::time::{Duration, Instant};

/// Where the transfer stage stands, against the manifest totals
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Sum of manifest file sizes
    pub total_bytes: u64,

    /// Bytes written to the data directory so far
    pub transferred_bytes: u64,

    pub bytes_per_second: u64,

    /// Estimated time remaining (seconds)
    pub eta_seconds: u64,

    /// Percentage complete (0-100); an empty manifest counts as done
    pub percent_complete: f64,

    pub files_restored: usize,
    pub total_files: usize,

    /// Manifest path of the file being copied
    pub current_file: Option<String>,
}

impl TransferProgress {
    fn new(total_bytes: u64, total_files: usize) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            bytes_per_second: 0,
            eta_seconds: 0,
            percent_complete: 0.0,
            files_restored: 0,
            total_files,
            current_file: None,
        }
    }
}

#[derive(Debug)]
pub struct ProgressTracker {
    start_time: Instant,
    last_update_time: Instant,
    last_bytes: u64,
    progress: TransferProgress,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64, total_files: usize) -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_update_time: now,
            last_bytes: 0,
            progress: TransferProgress::new(total_bytes, total_files),
        }
    }

    /// Record the running byte total and recalculate speed and ETA
    pub fn update(&mut self, transferred_bytes: u64) -> &TransferProgress {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update_time).as_secs_f64();
        let progress = &mut self.progress;

        if elapsed > 0.0 {
            let bytes_diff = transferred_bytes.saturating_sub(self.last_bytes);
            progress.bytes_per_second = (bytes_diff as f64 / elapsed) as u64;
        }
        if progress.bytes_per_second > 0 {
            let remaining_bytes = progress.total_bytes.saturating_sub(transferred_bytes);
            progress.eta_seconds = remaining_bytes / progress.bytes_per_second;
        }

        progress.transferred_bytes = transferred_bytes;
        progress.percent_complete = if progress.total_bytes > 0 {
            (transferred_bytes as f64 / progress.total_bytes as f64) * 100.0
        } else {
            100.0
        };

        self.last_update_time = now;
        self.last_bytes = transferred_bytes;
        &self.progress
    }

    pub fn file_started(&mut self, path: &str) {
        self.progress.current_file = Some(path.to_string());
    }

    pub fn file_finished(&mut self) {
        self.progress.files_restored += 1;
        self.progress.current_file = None;
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average speed since the stage started
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.progress.transferred_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

pub fn format_duration(seconds: u64) -> String {
    match seconds {
        0..=59 => format!("{seconds}s"),
        60..=3599 => format!("{}m {}s", seconds / 60, seconds % 60),
        _ => format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60),
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Configuration for the tailer.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// How often the watcher re-expands the include patterns.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(2);
/// How long a reader waits at end of file before retrying the read.
pub const DEFAULT_EOF_RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// How often the background flusher checks the store's dirty flag.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
/// How long the orchestrator sleeps when the change queue is empty.
pub const DEFAULT_CHANGE_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Upper bound on waiting for tasks during shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_OUTPUT_BUFFER: usize = 1024;
pub const DEFAULT_READER_BUFFER: usize = 64;

/// Whether files are read through a decompressor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    /// Read files as plain text
    None,
    /// Read every file as a gzip stream
    Gzip,
    /// Treat files ending in `.gz` as gzip, everything else as plain text
    #[default]
    Auto,
}

impl Compression {
    /// Resolve whether the file at `path` should be decompressed.
    pub fn is_compressed(&self, path: &Path) -> bool {
        match self {
            Compression::None => false,
            Compression::Gzip => true,
            Compression::Auto => path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("gz"))
                .unwrap_or(false),
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "auto" => Ok(Compression::Auto),
            _ => Err(format!(
                "Invalid compression '{}'. Valid options: none, gzip, auto",
                s
            )),
        }
    }
}

/// Configuration for the tail orchestrator and its collaborators
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Glob patterns for files to tail
    pub include: Vec<String>,
    /// Path of the JSON offset store
    pub offsets_path: PathBuf,
    /// Interval between watcher scans
    pub scan_interval: Duration,
    /// Delay before retrying a read that hit end of file
    pub eof_retry_interval: Duration,
    /// Interval between dirty checks of the offset store
    pub flush_interval: Duration,
    /// Sleep between polls of an empty change queue
    pub change_poll_interval: Duration,
    /// Decompression policy for tailed files
    pub compression: Compression,
    /// Capacity of the fan-in output channel
    pub output_buffer: usize,
    /// Capacity of each reader's line channel
    pub reader_buffer: usize,
    /// Maximum time to wait for tasks to wind down on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            offsets_path: PathBuf::from("/var/lib/filetail/offsets.json"),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            eof_retry_interval: DEFAULT_EOF_RETRY_INTERVAL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            change_poll_interval: DEFAULT_CHANGE_POLL_INTERVAL,
            compression: Compression::Auto,
            output_buffer: DEFAULT_OUTPUT_BUFFER,
            reader_buffer: DEFAULT_READER_BUFFER,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl TailConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.include.is_empty() {
            return Err("At least one include pattern must be specified".to_string());
        }

        if self.offsets_path.as_os_str().is_empty() {
            return Err("offsets_path cannot be empty".to_string());
        }

        let intervals = [
            ("scan_interval", self.scan_interval),
            ("eof_retry_interval", self.eof_retry_interval),
            ("flush_interval", self.flush_interval),
            ("change_poll_interval", self.change_poll_interval),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(format!("{} must be positive", name));
            }
        }

        if self.output_buffer == 0 || self.reader_buffer == 0 {
            return Err("channel buffers must be positive".to_string());
        }

        Ok(())
    }
}

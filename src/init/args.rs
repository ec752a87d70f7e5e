// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::tail::config::{
    Compression, DEFAULT_OUTPUT_BUFFER, DEFAULT_READER_BUFFER, TailConfig,
};

/// Compression handling for tailed files
#[derive(Copy, Clone, Debug, Default, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompressionArg {
    /// Read every file as plain text
    None,
    /// Read every file as gzip
    Gzip,
    /// Decompress files ending in .gz
    #[default]
    Auto,
}

impl From<CompressionArg> for Compression {
    fn from(c: CompressionArg) -> Self {
        match c {
            CompressionArg::None => Compression::None,
            CompressionArg::Gzip => Compression::Gzip,
            CompressionArg::Auto => Compression::Auto,
        }
    }
}

#[derive(Debug, Args, Clone, Deserialize)]
#[serde(default)]
pub struct TailArgs {
    /// Comma-separated glob patterns for files to tail (e.g., "/var/log/*.log,/tmp/*.log")
    #[arg(long, env = "FILETAIL_INCLUDE", value_delimiter = ',')]
    pub include: Vec<String>,

    /// Path of the JSON file holding per-file read offsets
    #[arg(
        long,
        env = "FILETAIL_OFFSETS_PATH",
        default_value = "/var/lib/filetail/offsets.json"
    )]
    pub offsets_path: PathBuf,

    /// Interval in milliseconds between rescans of the include patterns
    #[arg(long, env = "FILETAIL_SCAN_INTERVAL_MS", default_value = "2000")]
    pub scan_interval_ms: u64,

    /// Time in milliseconds a reader waits at end of file before reading again
    #[arg(long, env = "FILETAIL_EOF_RETRY_INTERVAL_MS", default_value = "1000")]
    pub eof_retry_interval_ms: u64,

    /// Interval in milliseconds between saves of modified offsets
    #[arg(long, env = "FILETAIL_FLUSH_INTERVAL_MS", default_value = "1000")]
    pub flush_interval_ms: u64,

    /// Time in milliseconds to sleep when no file changes are pending
    #[arg(long, env = "FILETAIL_CHANGE_POLL_INTERVAL_MS", default_value = "2000")]
    pub change_poll_interval_ms: u64,

    /// Compression: none, gzip, auto (by .gz extension)
    #[arg(value_enum, long, env = "FILETAIL_COMPRESSION", default_value = "auto")]
    pub compression: CompressionArg,

    /// Number of lines buffered between all readers and the consumer
    #[arg(long, env = "FILETAIL_OUTPUT_BUFFER", default_value = "1024")]
    pub output_buffer: usize,

    /// Number of lines buffered per reader
    #[arg(long, env = "FILETAIL_READER_BUFFER", default_value = "64")]
    pub reader_buffer: usize,

    /// Maximum time in milliseconds to wait for readers to stop during shutdown
    #[arg(long, env = "FILETAIL_SHUTDOWN_TIMEOUT_MS", default_value = "5000")]
    pub shutdown_timeout_ms: u64,
}

impl Default for TailArgs {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            offsets_path: PathBuf::from("/var/lib/filetail/offsets.json"),
            scan_interval_ms: 2000,
            eof_retry_interval_ms: 1000,
            flush_interval_ms: 1000,
            change_poll_interval_ms: 2000,
            compression: CompressionArg::Auto,
            output_buffer: DEFAULT_OUTPUT_BUFFER,
            reader_buffer: DEFAULT_READER_BUFFER,
            shutdown_timeout_ms: 5000,
        }
    }
}

impl TailArgs {
    /// Build the tailer config from command line args
    pub fn build_config(&self) -> TailConfig {
        TailConfig {
            include: self.include.clone(),
            offsets_path: self.offsets_path.clone(),
            scan_interval: Duration::from_millis(self.scan_interval_ms),
            eof_retry_interval: Duration::from_millis(self.eof_retry_interval_ms),
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            change_poll_interval: Duration::from_millis(self.change_poll_interval_ms),
            compression: self.compression.into(),
            output_buffer: self.output_buffer,
            reader_buffer: self.reader_buffer,
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
        }
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Resumable log tailer.
//!
//! Follows every file matching a set of glob patterns, emits each complete
//! line once, and persists per-file `[byte_offset, line_count]` progress so a
//! restart resumes where the previous run stopped.

pub mod config;
pub mod error;
pub mod input;
pub mod orchestrator;
pub mod persistence;
pub mod registry;
pub mod watcher;

pub use config::{Compression, TailConfig};
pub use error::{Error, Result};
pub use input::{FileReader, LogLine, ReaderState};
pub use orchestrator::{TailEvent, TailOrchestrator};
pub use persistence::{KeyValueStore, OffsetRecord, store_key};
pub use watcher::{FileChangeEvent, FileChangeKind, FileWatcher};

// SPDX-License-Identifier: Apache-2.0

//! Level-triggered file discovery.
//!
//! Every scan re-expands the configured glob patterns from scratch and diffs
//! the result against the previous scan. This tolerates missed notifications
//! and works on any filesystem, at the cost of up to one scan interval of
//! latency.

mod event;
mod finder;
mod poll;

pub use event::{FileChangeEvent, FileChangeKind, diff_scans};
pub use finder::FileFinder;
pub use poll::FileWatcher;

// SPDX-License-Identifier: Apache-2.0

//! Change events produced by the file watcher.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Kind of change in the watched file set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    /// A file started matching the watch patterns
    Add,
    /// A file stopped matching the watch patterns (deleted, renamed away)
    Remove,
}

impl fmt::Display for FileChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileChangeKind::Add => write!(f, "add"),
            FileChangeKind::Remove => write!(f, "remove"),
        }
    }
}

/// A change to the set of watched files. Consumed once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeEvent {
    pub kind: FileChangeKind,
    pub path: PathBuf,
}

impl FileChangeEvent {
    pub fn add(path: PathBuf) -> Self {
        Self {
            kind: FileChangeKind::Add,
            path,
        }
    }

    pub fn remove(path: PathBuf) -> Self {
        Self {
            kind: FileChangeKind::Remove,
            path,
        }
    }
}

/// Events that turn scan `previous` into scan `current`: an `Add` for every
/// path only in `current`, a `Remove` for every path only in `previous`.
pub fn diff_scans(
    previous: &BTreeSet<PathBuf>,
    current: &BTreeSet<PathBuf>,
) -> Vec<FileChangeEvent> {
    let added = current
        .difference(previous)
        .cloned()
        .map(FileChangeEvent::add);
    let removed = previous
        .difference(current)
        .cloned()
        .map(FileChangeEvent::remove);

    added.chain(removed).collect()
}

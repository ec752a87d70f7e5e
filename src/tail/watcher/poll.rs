// SPDX-License-Identifier: Apache-2.0

//! Polling file watcher: rescans the patterns on a fixed interval and queues
//! Add/Remove events for the orchestrator to drain.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::select;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::event::{FileChangeEvent, FileChangeKind, diff_scans};
use super::finder::FileFinder;

/// Polling-based file watcher.
///
/// Holds a lock-protected pattern list and the file set seen by the previous
/// scan. Changes are queued FIFO and popped without blocking.
pub struct FileWatcher {
    /// Glob patterns to expand on every scan
    patterns: Mutex<Vec<String>>,
    /// Files matched by the previous scan
    known_files: Mutex<BTreeSet<PathBuf>>,
    changes_tx: flume::Sender<FileChangeEvent>,
    changes_rx: flume::Receiver<FileChangeEvent>,
    scan_interval: Duration,
}

impl FileWatcher {
    pub fn new(patterns: Vec<String>, scan_interval: Duration) -> Self {
        let (changes_tx, changes_rx) = flume::unbounded();

        Self {
            patterns: Mutex::new(patterns),
            known_files: Mutex::new(BTreeSet::new()),
            changes_tx,
            changes_rx,
            scan_interval,
        }
    }

    /// Add patterns; they take effect on the next scan.
    pub fn add_patterns(&self, patterns: impl IntoIterator<Item = String>) {
        self.patterns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(patterns);
    }

    pub fn patterns(&self) -> Vec<String> {
        self.patterns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Expand every pattern into the current set of matching regular files.
    pub fn scan_files(&self) -> BTreeSet<PathBuf> {
        FileFinder::new(self.patterns()).find_files()
    }

    /// Run one scan, queue the difference against the previous scan, and
    /// remember this scan for the next diff. Returns the number of queued
    /// events.
    pub fn poll_once(&self) -> usize {
        let current = self.scan_files();

        let mut known = self
            .known_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let events = diff_scans(&known, &current);
        *known = current;
        drop(known);

        let count = events.len();
        for event in events {
            match event.kind {
                FileChangeKind::Add => info!(path = %event.path.display(), "Add watch"),
                FileChangeKind::Remove => info!(path = %event.path.display(), "Remove watch"),
            }
            // Sender and receiver live in the same struct, so this cannot disconnect
            if self.changes_tx.send(event).is_err() {
                error!("File change queue disconnected");
            }
        }

        count
    }

    /// Pop the next queued change, or `None` if the queue is empty.
    pub fn get_change(&self) -> Option<FileChangeEvent> {
        self.changes_rx.try_recv().ok()
    }

    /// Scan immediately, then every scan interval, until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            patterns = ?self.patterns(),
            interval = ?self.scan_interval,
            "File watcher started"
        );

        let mut ticker = tokio::time::interval(self.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("File watcher cancelled");
                    break;
                }

                _ = ticker.tick() => {
                    let watcher = self.clone();
                    match tokio::task::spawn_blocking(move || watcher.poll_once()).await {
                        Ok(count) if count > 0 => debug!(count, "Queued file changes"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "File scan task failed"),
                    }
                }
            }
        }
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Tail orchestrator.
//!
//! Architecture:
//! - The watcher task rescans the include patterns and queues Add/Remove changes
//! - The change task drains that queue and starts or stops readers in the registry
//! - Per file, a blocking task runs the reader loop and an async task forwards
//!   its lines to the shared output channel, recording progress after each line
//! - The flusher task saves the offset store whenever it is dirty

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{self, BoundedReceiver, BoundedSender};
use crate::tail::config::{Compression, TailConfig};
use crate::tail::error::{Error, Result};
use crate::tail::input::{FileReader, LogLine};
use crate::tail::persistence::{KeyValueStore, OffsetRecord, StoreFlusher, store_key};
use crate::tail::registry::{self, ReaderRegistry, SharedRegistry};
use crate::tail::watcher::{FileChangeEvent, FileChangeKind, FileWatcher};

/// A single line handed to the consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailEvent {
    pub message: String,
}

/// Everything needed to start readers and forward their output.
#[derive(Clone)]
struct ReaderContext {
    store: Arc<KeyValueStore>,
    registry: SharedRegistry,
    output: BoundedSender<TailEvent>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    compression: Compression,
    eof_retry_interval: Duration,
    reader_buffer: usize,
}

/// Discovers files, runs one reader per file, and fans all lines into one
/// output channel while persisting per-file progress.
pub struct TailOrchestrator {
    config: TailConfig,
    store: Arc<KeyValueStore>,
    watcher: Arc<FileWatcher>,
    registry: SharedRegistry,
    output: BoundedReceiver<TailEvent>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl TailOrchestrator {
    /// Load the offset store and start the watcher, change, and flusher tasks.
    ///
    /// Must be called from within a tokio runtime. Fails if the configuration
    /// is invalid or the offset store cannot be loaded.
    pub fn start(config: TailConfig) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let store = Arc::new(KeyValueStore::load(&config.offsets_path)?);
        let watcher = Arc::new(FileWatcher::new(
            config.include.clone(),
            config.scan_interval,
        ));
        let registry = ReaderRegistry::shared();
        let (output_tx, output_rx) = bounded_channel::bounded(config.output_buffer);
        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();

        info!(
            include = ?config.include,
            offsets_path = %store.path().display(),
            stored_files = store.len(),
            "Starting tailer"
        );

        tasks.spawn(StoreFlusher::new(store.clone(), config.flush_interval).run(cancel.clone()));
        tasks.spawn(watcher.clone().run(cancel.clone()));

        let ctx = ReaderContext {
            store: store.clone(),
            registry: registry.clone(),
            output: output_tx,
            cancel: cancel.clone(),
            tasks: tasks.clone(),
            compression: config.compression,
            eof_retry_interval: config.eof_retry_interval,
            reader_buffer: config.reader_buffer,
        };
        tasks.spawn(drain_changes(
            watcher.clone(),
            ctx,
            config.change_poll_interval,
        ));

        Ok(Self {
            config,
            store,
            watcher,
            registry,
            output: output_rx,
            cancel,
            tasks,
        })
    }

    /// Wait for the next line from any tailed file.
    ///
    /// Returns `None` only once the tailer has shut down and every buffered
    /// line has been consumed.
    pub async fn read_one_event(&self) -> Option<TailEvent> {
        self.output.next().await
    }

    /// Paths that currently have a registered reader
    pub fn active_files(&self) -> Vec<PathBuf> {
        registry::lock(&self.registry).paths()
    }

    /// Pause the reader for `path`. Returns false if no reader is registered.
    pub fn pause(&self, path: &Path) -> bool {
        match registry::lock(&self.registry).get(path) {
            Some(reader) => {
                reader.pause();
                true
            }
            None => false,
        }
    }

    /// Resume the reader for `path`. Returns false if no reader is registered.
    pub fn resume(&self, path: &Path) -> bool {
        match registry::lock(&self.registry).get(path) {
            Some(reader) => {
                reader.resume();
                true
            }
            None => false,
        }
    }

    /// Add watch patterns; they apply from the next scan.
    pub fn add_patterns(&self, patterns: impl IntoIterator<Item = String>) {
        self.watcher.add_patterns(patterns);
    }

    pub fn store(&self) -> &Arc<KeyValueStore> {
        &self.store
    }

    /// Stop every task and reader, then force a final save of the offset store.
    ///
    /// The returned error is the final save's; the caller decides whether it
    /// is fatal.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down tailer");

        self.cancel.cancel();
        registry::lock(&self.registry).stop_all();
        self.tasks.close();

        if tokio::time::timeout(self.config.shutdown_timeout, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                timeout = ?self.config.shutdown_timeout,
                remaining = self.tasks.len(),
                "Timed out waiting for tail tasks to finish"
            );
        }

        match self.store.save() {
            Ok(()) => {
                info!(path = %self.store.path().display(), "Saved offsets on shutdown");
                Ok(())
            }
            Err(e) => {
                error!(path = %self.store.path().display(), error = %e, "Final offset save failed");
                Err(e)
            }
        }
    }
}

/// Drain the watcher's change queue, sleeping while it is empty.
async fn drain_changes(watcher: Arc<FileWatcher>, ctx: ReaderContext, poll_interval: Duration) {
    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }

        match watcher.get_change() {
            Some(change) => apply_change(&ctx, change),
            None => {
                select! {
                    _ = ctx.cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
    debug!("Change handler stopped");
}

/// Apply one watcher change to the registry.
fn apply_change(ctx: &ReaderContext, change: FileChangeEvent) {
    let mut readers = registry::lock(&ctx.registry);
    let FileChangeEvent { kind, path } = change;

    match kind {
        FileChangeKind::Add => {
            // No new readers once shutdown has cancelled
            if ctx.cancel.is_cancelled() {
                debug!(path = %path.display(), "Shutting down, ignoring Add");
                return;
            }
            let reader = start_reader(ctx, &path);
            if let Some(previous) = readers.insert(path.clone(), reader) {
                warn!(path = %path.display(), "File added twice, replacing its reader");
                previous.stop();
            }
        }
        FileChangeKind::Remove => {
            match readers.remove(&path) {
                Some(reader) => {
                    reader.stop();
                    info!(path = %path.display(), "Stopped reader for removed file");
                }
                None => debug!(path = %path.display(), "Remove for a file with no reader"),
            }
            // A removed file starts over from zero if it comes back
            ctx.store.del(&store_key(&path));
        }
    }
}

/// Look up the saved progress for `key`, materializing `{0,0}` on first use.
fn load_progress(store: &KeyValueStore, key: &str, path: &Path) -> OffsetRecord {
    let value = store.get_or_insert(key, OffsetRecord::default().to_value());
    OffsetRecord::from_value(&value).unwrap_or_else(|| {
        warn!(
            path = %path.display(),
            key,
            value = %value,
            "Ignoring malformed saved offset, reading from the beginning"
        );
        OffsetRecord::default()
    })
}

/// Create a reader resuming from the saved progress and spawn its read and
/// forward tasks.
fn start_reader(ctx: &ReaderContext, path: &Path) -> Arc<FileReader> {
    let key = store_key(path);
    let resume = load_progress(&ctx.store, &key, path);
    let compressed = ctx.compression.is_compressed(path);

    let reader = Arc::new(
        FileReader::new(path, compressed, resume).with_retry_interval(ctx.eof_retry_interval),
    );
    let (lines_tx, lines_rx) = bounded_channel::bounded(ctx.reader_buffer);

    info!(
        path = %path.display(),
        key = %key,
        offset = resume.byte_offset,
        lines = resume.line_count,
        compressed,
        "Watching file"
    );

    {
        let reader = reader.clone();
        let path = path.to_path_buf();
        ctx.tasks.spawn_blocking(move || match reader.watch(lines_tx) {
            Ok(()) => info!(path = %path.display(), "Stopped watching file"),
            Err(e) => error!(path = %path.display(), error = %e, "Reader failed, abandoning file"),
        });
    }

    ctx.tasks.spawn(forward_lines(
        ctx.clone(),
        path.to_path_buf(),
        key,
        reader.clone(),
        lines_rx,
    ));

    reader
}

/// Forward a reader's lines to the output channel, recording progress after
/// each forwarded line.
async fn forward_lines(
    ctx: ReaderContext,
    path: PathBuf,
    key: String,
    reader: Arc<FileReader>,
    lines: BoundedReceiver<LogLine>,
) {
    loop {
        let line = select! {
            biased;

            _ = ctx.cancel.cancelled() => break,

            line = lines.next() => match line {
                Some(line) => line,
                None => break,
            },
        };
        let event = TailEvent { message: line.text };

        select! {
            biased;

            _ = ctx.cancel.cancelled() => break,

            res = ctx.output.send(event) => {
                if res.is_err() {
                    debug!(path = %path.display(), "Output channel closed");
                    break;
                }
            }
        }

        record_progress(&ctx, &path, &key, &reader, line.progress);
    }

    debug!(path = %path.display(), "Line stream closed");
}

/// Store `progress` for `path` if `reader` is still its registered reader.
///
/// Lines drained after a Remove are forwarded but must not resurrect the
/// deleted offset record.
fn record_progress(
    ctx: &ReaderContext,
    path: &Path,
    key: &str,
    reader: &Arc<FileReader>,
    progress: OffsetRecord,
) {
    let readers = registry::lock(&ctx.registry);
    if readers.is_current(path, reader) {
        ctx.store.set(key, progress.to_value());
    } else {
        debug!(path = %path.display(), "Reader no longer registered, dropping progress");
    }
}

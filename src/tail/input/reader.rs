// SPDX-License-Identifier: Apache-2.0

//! Incremental reader for a single live-growing file.
//!
//! A reader resumes at a byte offset, emits complete newline-terminated lines,
//! and treats end of file as "not written yet" rather than as termination.
//! Partial lines are held across end-of-file waits until their delimiter
//! arrives.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use flate2::read::GzDecoder;
use tracing::{debug, warn};

use crate::bounded_channel::{BoundedSender, SendTimeoutError};
use crate::tail::config::DEFAULT_EOF_RETRY_INTERVAL;
use crate::tail::error::Result;
use crate::tail::persistence::OffsetRecord;

/// Lifecycle of a reader. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Created,
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReaderState::Created => "created",
            ReaderState::Running => "running",
            ReaderState::Paused => "paused",
            ReaderState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// One complete line, delimiter included, with the reader's progress as of
/// the end of this line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub progress: OffsetRecord,
}

/// FileReader tails a single file from a resume point.
///
/// Control methods (`pause`, `resume`, `stop`) may be called from any thread
/// while [`FileReader::watch`] runs on a blocking thread.
pub struct FileReader {
    path: PathBuf,
    compressed: bool,
    retry_interval: Duration,
    state: Mutex<ReaderState>,
    wake: Condvar,
    byte_offset: AtomicU64,
    line_count: AtomicU64,
}

impl FileReader {
    pub fn new(path: impl AsRef<Path>, compressed: bool, resume: OffsetRecord) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            compressed,
            retry_interval: DEFAULT_EOF_RETRY_INTERVAL,
            state: Mutex::new(ReaderState::Created),
            wake: Condvar::new(),
            byte_offset: AtomicU64::new(resume.byte_offset),
            line_count: AtomicU64::new(resume.line_count),
        }
    }

    /// Set how long to wait at end of file before retrying
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Bytes consumed through the last emitted line
    pub fn offsets(&self) -> u64 {
        self.byte_offset.load(Ordering::Acquire)
    }

    /// Lines emitted, including those counted by the resume point
    pub fn lines(&self) -> u64 {
        self.line_count.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> OffsetRecord {
        OffsetRecord::new(self.offsets(), self.lines())
    }

    pub fn state(&self) -> ReaderState {
        *self.lock_state()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ReaderState::Stopped
    }

    /// Request termination. Wakes a paused or end-of-file-waiting loop; a
    /// blocking read in progress finishes first.
    pub fn stop(&self) {
        *self.lock_state() = ReaderState::Stopped;
        self.wake.notify_all();
    }

    /// Suspend the read loop at its next check. No effect once stopped.
    pub fn pause(&self) {
        let mut state = self.lock_state();
        if matches!(*state, ReaderState::Created | ReaderState::Running) {
            *state = ReaderState::Paused;
        }
    }

    /// Resume a paused reader.
    pub fn resume(&self) {
        let mut state = self.lock_state();
        if *state == ReaderState::Paused {
            *state = ReaderState::Running;
            self.wake.notify_all();
        }
    }

    /// Read the file until stopped, sending each complete line to `lines`.
    ///
    /// Blocks the calling thread. Returns `Ok` on stop (or when the receiving
    /// side goes away) and the I/O error for any failure other than end of
    /// file. The channel is closed on return by dropping `lines`.
    pub fn watch(&self, lines: BoundedSender<LogLine>) -> Result<()> {
        {
            let mut state = self.lock_state();
            match *state {
                ReaderState::Stopped => return Ok(()),
                ReaderState::Created => *state = ReaderState::Running,
                ReaderState::Running | ReaderState::Paused => {}
            }
        }

        let result = self.read_loop(&lines);
        self.stop();
        result
    }

    fn read_loop(&self, lines: &BoundedSender<LogLine>) -> Result<()> {
        let mut reader = self.open_at_offset()?;
        let mut pending: Vec<u8> = Vec::new();

        loop {
            if !self.wait_while_paused() {
                debug!(path = %self.path.display(), "Reader stopped");
                return Ok(());
            }

            match reader.read_until(b'\n', &mut pending) {
                Ok(_) if pending.last() == Some(&b'\n') => {
                    let len = pending.len() as u64;
                    let progress = OffsetRecord::new(self.offsets() + len, self.lines() + 1);
                    let line = LogLine {
                        text: String::from_utf8_lossy(&pending).into_owned(),
                        progress,
                    };
                    pending.clear();

                    if !self.emit(lines, line) {
                        return Ok(());
                    }

                    self.byte_offset
                        .store(progress.byte_offset, Ordering::Release);
                    self.line_count.store(progress.line_count, Ordering::Release);
                }
                // End of the stream for now; keep any partial line and retry
                Ok(_) => {
                    if lines.is_disconnected() {
                        debug!(path = %self.path.display(), "Line receiver dropped, stopping reader");
                        return Ok(());
                    }
                    self.sleep_unless_stopped(self.retry_interval);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Hand a line downstream, re-checking for stop while the channel is full.
    /// Returns false if the line was not delivered.
    fn emit(&self, lines: &BoundedSender<LogLine>, mut line: LogLine) -> bool {
        loop {
            match lines.send_timeout(line, self.retry_interval) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(l)) => {
                    if self.is_stopped() {
                        return false;
                    }
                    line = l;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    debug!(path = %self.path.display(), "Line receiver dropped, stopping reader");
                    return false;
                }
            }
        }
    }

    fn open(&self) -> Result<Box<dyn BufRead + Send>> {
        let file = File::open(&self.path)?;
        let inner: Box<dyn Read + Send> = if self.compressed {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Box::new(BufReader::new(inner)))
    }

    /// Open the file positioned at the resume offset. Plain files seek; gzip
    /// streams can only discard decompressed bytes up to the offset. If the
    /// content is shorter than the offset the file was truncated or replaced,
    /// so start over from the beginning.
    fn open_at_offset(&self) -> Result<Box<dyn BufRead + Send>> {
        let target = self.offsets();
        let mut file = File::open(&self.path)?;

        let available = if self.compressed {
            let mut reader = BufReader::new(GzDecoder::new(file));
            let skipped = io::copy(&mut (&mut reader).take(target), &mut io::sink())?;
            if skipped == target {
                return Ok(Box::new(reader));
            }
            skipped
        } else {
            let len = file.metadata()?.len();
            if len >= target {
                file.seek(SeekFrom::Start(target))?;
                return Ok(Box::new(BufReader::new(file)));
            }
            len
        };

        warn!(
            path = %self.path.display(),
            saved_offset = target,
            available,
            "File is shorter than its saved offset, reading from the beginning"
        );
        self.byte_offset.store(0, Ordering::Release);
        self.line_count.store(0, Ordering::Release);
        self.open()
    }

    /// Block while paused. Returns false if the reader is stopped.
    fn wait_while_paused(&self) -> bool {
        let state = self.lock_state();
        let state = self
            .wake
            .wait_while(state, |s| *s == ReaderState::Paused)
            .unwrap_or_else(PoisonError::into_inner);
        *state != ReaderState::Stopped
    }

    fn sleep_unless_stopped(&self, duration: Duration) {
        let state = self.lock_state();
        let _ = self
            .wake
            .wait_timeout_while(state, duration, |s| *s != ReaderState::Stopped)
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn lock_state(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::{self, BoundedReceiver};
    use flate2::Compression as GzCompression;
    use flate2::write::GzEncoder;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use tempfile::TempDir;

    const RETRY: Duration = Duration::from_millis(10);
    const RECV: Duration = Duration::from_secs(5);

    fn start(
        reader: FileReader,
    ) -> (
        Arc<FileReader>,
        BoundedReceiver<LogLine>,
        JoinHandle<Result<()>>,
    ) {
        let reader = Arc::new(reader.with_retry_interval(RETRY));
        let (tx, rx) = bounded_channel::bounded(16);
        let handle = {
            let reader = reader.clone();
            std::thread::spawn(move || reader.watch(tx))
        };
        (reader, rx, handle)
    }

    fn append(path: &Path, data: &[u8]) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(data).unwrap();
        f.flush().unwrap();
    }

    #[test]
    fn test_reads_lines_with_delimiters() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "hello\nworld\n").unwrap();

        let (reader, rx, handle) = start(FileReader::new(&path, false, OffsetRecord::default()));

        let first = rx.recv_timeout(RECV).unwrap();
        assert_eq!(first.text, "hello\n");
        assert_eq!(first.progress, OffsetRecord::new(6, 1));

        let second = rx.recv_timeout(RECV).unwrap();
        assert_eq!(second.text, "world\n");
        assert_eq!(second.progress, OffsetRecord::new(12, 2));

        reader.stop();
        handle.join().unwrap().unwrap();
        assert_eq!(reader.progress(), OffsetRecord::new(12, 2));
        assert_eq!(reader.state(), ReaderState::Stopped);
    }

    #[test]
    fn test_resumes_from_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "hello\nworld\n").unwrap();

        let (reader, rx, handle) = start(FileReader::new(&path, false, OffsetRecord::new(6, 1)));

        let line = rx.recv_timeout(RECV).unwrap();
        assert_eq!(line.text, "world\n");
        assert_eq!(line.progress, OffsetRecord::new(12, 2));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_none());

        reader.stop();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_follows_appended_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "").unwrap();

        let (reader, rx, handle) = start(FileReader::new(&path, false, OffsetRecord::default()));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_none());

        append(&path, b"one\n");
        assert_eq!(rx.recv_timeout(RECV).unwrap().text, "one\n");

        append(&path, b"two\nthree\n");
        assert_eq!(rx.recv_timeout(RECV).unwrap().text, "two\n");
        let third = rx.recv_timeout(RECV).unwrap();
        assert_eq!(third.text, "three\n");
        assert_eq!(third.progress, OffsetRecord::new(14, 3));

        reader.stop();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_partial_line_waits_for_delimiter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "hel").unwrap();

        let (reader, rx, handle) = start(FileReader::new(&path, false, OffsetRecord::default()));

        // Many end-of-file retries pass without emitting the partial line
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_none());
        append(&path, b"lo wor");
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_none());

        append(&path, b"ld\n");
        let line = rx.recv_timeout(RECV).unwrap();
        assert_eq!(line.text, "hello world\n");
        assert_eq!(line.progress, OffsetRecord::new(12, 1));

        reader.stop();
        handle.join().unwrap().unwrap();
        // The unterminated tail is never counted
        assert_eq!(reader.offsets(), 12);
    }

    #[test]
    fn test_reads_gzip_stream() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), GzCompression::default());
        encoder.write_all(b"first\nsecond\n").unwrap();
        encoder.finish().unwrap();

        let (reader, rx, handle) = start(FileReader::new(&path, true, OffsetRecord::new(6, 1)));

        let line = rx.recv_timeout(RECV).unwrap();
        assert_eq!(line.text, "second\n");
        assert_eq!(line.progress, OffsetRecord::new(13, 2));

        reader.stop();
        handle.join().unwrap().unwrap();
        assert!(reader.is_compressed());
    }

    #[test]
    fn test_invalid_gzip_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log.gz");
        fs::write(&path, "definitely not gzip\n").unwrap();

        let (reader, _rx, handle) = start(FileReader::new(&path, true, OffsetRecord::default()));

        assert!(handle.join().unwrap().is_err());
        assert!(reader.is_stopped());
    }

    #[test]
    fn test_missing_file_is_fatal_and_closes_stream() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.log");

        let (reader, rx, handle) = start(FileReader::new(&path, false, OffsetRecord::default()));

        assert!(handle.join().unwrap().is_err());
        assert!(reader.is_stopped());
        assert_eq!(rx.recv_blocking(), None);
    }

    #[test]
    fn test_stop_wakes_end_of_file_wait() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "").unwrap();

        let reader = Arc::new(
            FileReader::new(&path, false, OffsetRecord::default())
                .with_retry_interval(Duration::from_secs(60)),
        );
        let (tx, rx) = bounded_channel::bounded(1);
        let handle = {
            let reader = reader.clone();
            std::thread::spawn(move || reader.watch(tx))
        };

        std::thread::sleep(Duration::from_millis(50));
        reader.stop();

        // Well before the 60s retry interval elapses
        assert_eq!(rx.recv_timeout(RECV), None);
        assert!(rx.is_disconnected());
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_pause_and_resume() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "one\n").unwrap();

        let reader = FileReader::new(&path, false, OffsetRecord::default());
        reader.pause();
        assert_eq!(reader.state(), ReaderState::Paused);

        let (reader, rx, handle) = start(reader);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_none());

        reader.resume();
        assert_eq!(reader.state(), ReaderState::Running);
        assert_eq!(rx.recv_timeout(RECV).unwrap().text, "one\n");

        reader.stop();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_stop_while_paused_terminates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "one\n").unwrap();

        let reader = FileReader::new(&path, false, OffsetRecord::default());
        reader.pause();
        let (reader, rx, handle) = start(reader);

        std::thread::sleep(Duration::from_millis(50));
        reader.stop();

        handle.join().unwrap().unwrap();
        assert_eq!(rx.recv_blocking(), None);
    }

    #[test]
    fn test_stopped_reader_cannot_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "one\n").unwrap();

        let reader = FileReader::new(&path, false, OffsetRecord::default());
        reader.stop();
        reader.pause();
        reader.resume();
        assert_eq!(reader.state(), ReaderState::Stopped);

        let (_reader, rx, handle) = start(reader);
        handle.join().unwrap().unwrap();
        assert_eq!(rx.recv_blocking(), None);
    }

    #[test]
    fn test_truncated_file_restarts_from_beginning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "hello\n").unwrap();

        let (reader, rx, handle) = start(FileReader::new(&path, false, OffsetRecord::new(100, 9)));

        let line = rx.recv_timeout(RECV).unwrap();
        assert_eq!(line.text, "hello\n");
        assert_eq!(line.progress, OffsetRecord::new(6, 1));

        reader.stop();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_invalid_utf8_is_replaced_but_counted_raw() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, b"ab\xffcd\n").unwrap();

        let (reader, rx, handle) = start(FileReader::new(&path, false, OffsetRecord::default()));

        let line = rx.recv_timeout(RECV).unwrap();
        assert_eq!(line.text, "ab\u{fffd}cd\n");
        assert_eq!(line.progress, OffsetRecord::new(6, 1));

        reader.stop();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_resume_at_end_of_file_waits_for_new_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "hello\n").unwrap();

        let (reader, rx, handle) = start(FileReader::new(&path, false, OffsetRecord::new(6, 1)));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_none());

        append(&path, b"world\n");
        let line = rx.recv_timeout(RECV).unwrap();
        assert_eq!(line.text, "world\n");
        assert_eq!(line.progress, OffsetRecord::new(12, 2));

        reader.stop();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_truncated_gzip_stream_restarts_from_beginning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), GzCompression::default());
        encoder.write_all(b"only\n").unwrap();
        encoder.finish().unwrap();

        let (reader, rx, handle) = start(FileReader::new(&path, true, OffsetRecord::new(50, 4)));

        let line = rx.recv_timeout(RECV).unwrap();
        assert_eq!(line.text, "only\n");
        assert_eq!(line.progress, OffsetRecord::new(5, 1));

        reader.stop();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_stop_while_blocked_on_full_channel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "a\nb\nc\nd\n").unwrap();

        let reader = Arc::new(
            FileReader::new(&path, false, OffsetRecord::default()).with_retry_interval(RETRY),
        );
        // One slot and nobody receiving: the second line blocks the reader
        let (tx, rx) = bounded_channel::bounded(1);
        let handle = {
            let reader = reader.clone();
            std::thread::spawn(move || reader.watch(tx))
        };

        let deadline = std::time::Instant::now() + RECV;
        while reader.offsets() < 2 {
            assert!(std::time::Instant::now() < deadline, "first line never delivered");
            std::thread::sleep(RETRY);
        }
        std::thread::sleep(RETRY * 3);
        assert_eq!(reader.offsets(), 2);

        let stopped_at = std::time::Instant::now();
        reader.stop();
        handle.join().unwrap().unwrap();
        assert!(stopped_at.elapsed() < Duration::from_secs(1));

        // Only the line that made it into the channel counts
        assert_eq!(reader.progress(), OffsetRecord::new(2, 1));
        assert_eq!(rx.recv_blocking().map(|l| l.text), Some("a\n".to_string()));
        assert_eq!(rx.recv_blocking(), None);
    }

    #[test]
    fn test_dropped_receiver_ends_watch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "one\ntwo\n").unwrap();

        let (reader, rx, handle) = start(FileReader::new(&path, false, OffsetRecord::default()));
        drop(rx);

        handle.join().unwrap().unwrap();
        assert!(reader.is_stopped());
    }
}

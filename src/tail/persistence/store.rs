// SPDX-License-Identifier: Apache-2.0

//! JSON file-backed key/value store with atomic snapshot writes.
//!
//! The whole mapping lives in memory and is rewritten in full on every save.
//! Writes go to a hidden temp file next to the target, which is then renamed
//! over the target, so the target is either untouched or fully replaced.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::debug;

use crate::tail::error::{Error, Result};

/// Durable mapping from string keys to JSON values.
///
/// Shared between the per-line progress writers and the background flusher;
/// all synchronization is internal.
#[derive(Debug)]
pub struct KeyValueStore {
    path: PathBuf,
    data: RwLock<HashMap<String, Value>>,
    dirty: AtomicBool,
    save_lock: Mutex<()>,
}

impl KeyValueStore {
    /// Open the store at `path`, creating an empty file if none exists.
    ///
    /// An empty file is an empty store. A file that exists but does not hold a
    /// JSON object fails with [`Error::CorruptStore`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = std::path::absolute(path.as_ref())?;

        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    if !parent.exists() {
                        fs::create_dir_all(parent)?;
                    }
                }
                File::create(&path)?;
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let data = if contents.iter().all(u8::is_ascii_whitespace) {
            HashMap::new()
        } else {
            serde_json::from_slice(&contents).map_err(|source| Error::CorruptStore {
                path: path.clone(),
                source,
            })?
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
            save_lock: Mutex::new(()),
        })
    }

    /// Absolute path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the value for `key`, inserting `default` first if the key is
    /// absent.
    ///
    /// This is a read that can create state: the first lookup of a key
    /// materializes `default` in the store, and later lookups return that
    /// value regardless of the default they pass. Insertion does not mark the
    /// store dirty.
    pub fn get_or_insert(&self, key: &str, default: Value) -> Value {
        if let Some(value) = self.read().get(key) {
            return value.clone();
        }

        self.write()
            .entry(key.to_string())
            .or_insert(default)
            .clone()
    }

    /// Return the value for `key` without inserting anything
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    /// Overwrite the value for `key` and mark the store dirty
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.write().insert(key.into(), value);
        self.dirty.store(true, Ordering::Release);
    }

    /// Remove `key`. The removal reaches disk with the next save.
    pub fn del(&self, key: &str) -> Option<Value> {
        self.write().remove(key)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Write the full mapping to disk atomically.
    ///
    /// Saves are serialized. The dirty flag is cleared only when the write
    /// succeeds; updates that race with the save leave it set.
    pub fn save(&self) -> Result<()> {
        let _guard = self
            .save_lock
            .lock()
            .map_err(|e| Error::Persistence(e.to_string()))?;

        let was_dirty = self.dirty.swap(false, Ordering::AcqRel);

        let result = self.snapshot().and_then(|bytes| atomic_write(&self.path, &bytes));
        if result.is_err() && was_dirty {
            self.dirty.store(true, Ordering::Release);
        }
        if result.is_ok() {
            debug!(path = %self.path.display(), "Saved offset store");
        }

        result
    }

    /// Save only when there are unsaved updates. Returns whether a save ran.
    pub fn save_if_dirty(&self) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.save().map(|_| true)
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        let data = self.read();
        let sorted: BTreeMap<&String, &Value> = data.iter().collect();
        Ok(serde_json::to_vec_pretty(&sorted)?)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hidden temp file in the same directory as `path`: `dir/.name.tmp`
pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", file_name))
}

/// Write `bytes` to a temp file, then rename it over `path`
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = temp_path_for(path);

    if let Err(e) = write_synced(&temp_path, bytes) {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::Persistence(format!(
            "failed to write temp file {:?}: {}",
            temp_path, e
        )));
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::Persistence(format!("failed to rename {:?} to {:?}: {}", temp_path, path, e))
    })
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(bytes)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

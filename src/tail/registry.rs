// SPDX-License-Identifier: Apache-2.0

//! Registry of running readers, keyed by absolute path.
//!
//! The registry is the single source of truth for which files currently have
//! an active reader. It is always accessed through one [`SharedRegistry`] lock,
//! held by change application, progress recording, and shutdown.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::tail::input::FileReader;

pub type SharedRegistry = Arc<Mutex<ReaderRegistry>>;

#[derive(Default)]
pub struct ReaderRegistry {
    readers: HashMap<PathBuf, Arc<FileReader>>,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Register `reader` under `path`, returning any reader it replaces
    pub fn insert(&mut self, path: PathBuf, reader: Arc<FileReader>) -> Option<Arc<FileReader>> {
        self.readers.insert(path, reader)
    }

    pub fn remove(&mut self, path: &Path) -> Option<Arc<FileReader>> {
        self.readers.remove(path)
    }

    pub fn get(&self, path: &Path) -> Option<&Arc<FileReader>> {
        self.readers.get(path)
    }

    /// Whether `reader` is the reader currently registered for `path`
    pub fn is_current(&self, path: &Path, reader: &Arc<FileReader>) -> bool {
        self.readers
            .get(path)
            .is_some_and(|registered| Arc::ptr_eq(registered, reader))
    }

    /// Registered paths in sorted order
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.readers.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Stop every registered reader without unregistering it
    pub fn stop_all(&self) {
        for reader in self.readers.values() {
            reader.stop();
        }
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}

/// Lock the shared registry, recovering from poisoning
pub fn lock(registry: &SharedRegistry) -> MutexGuard<'_, ReaderRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

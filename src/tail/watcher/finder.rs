// SPDX-License-Identifier: Apache-2.0

use glob::glob;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// FileFinder expands glob patterns into the set of matching regular files
#[derive(Debug, Clone)]
pub struct FileFinder {
    patterns: Vec<String>,
}

impl FileFinder {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// Find all regular files matching any pattern, as absolute paths.
    ///
    /// A pattern that cannot be resolved or parsed is logged and skipped; so
    /// is any match that cannot be stat'ed. Directories are never returned.
    pub fn find_files(&self) -> BTreeSet<PathBuf> {
        let mut files = BTreeSet::new();

        for pattern in &self.patterns {
            let absolute = match absolute_pattern(pattern) {
                Some(p) => p,
                None => continue,
            };

            let matches = match glob(&absolute) {
                Ok(m) => m,
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Skipping invalid glob pattern");
                    continue;
                }
            };

            for entry in matches {
                let path = match entry {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(path = %e.path().display(), error = %e.error(), "Failed to read glob match");
                        continue;
                    }
                };

                let metadata = match std::fs::metadata(&path) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to stat file");
                        continue;
                    }
                };

                if metadata.is_dir() {
                    info!(path = %path.display(), "Directories are not supported, skipping");
                    continue;
                }

                files.insert(clean_path(&path));
            }
        }

        files
    }
}

fn absolute_pattern(pattern: &str) -> Option<String> {
    let absolute = match std::path::absolute(Path::new(pattern)) {
        Ok(p) => p,
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Failed to resolve pattern");
            return None;
        }
    };

    match absolute.to_str() {
        Some(s) => Some(s.to_string()),
        None => {
            warn!(pattern = %pattern, "Resolved pattern is not valid UTF-8");
            None
        }
    }
}

/// Lexically normalize an absolute path: drop `.` and fold `..` into its
/// parent, so one file always has one spelling. Symlinks are not resolved.
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root
                if matches!(cleaned.components().next_back(), Some(Component::Normal(_))) {
                    cleaned.pop();
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

// SPDX-License-Identifier: Apache-2.0

//! On-disk shapes for per-file read progress.
//!
//! Each tailed file is stored under a fixed-length hex digest of its path, with
//! a value of `[byteOffset, lineCount]`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the path digest
pub const STORE_KEY_LEN: usize = 16;

/// Read progress of a single file.
///
/// `byte_offset` counts the (decompressed) bytes up to and including the last
/// emitted line's delimiter; `line_count` counts emitted lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u64, u64)", into = "(u64, u64)")]
pub struct OffsetRecord {
    pub byte_offset: u64,
    pub line_count: u64,
}

impl OffsetRecord {
    pub fn new(byte_offset: u64, line_count: u64) -> Self {
        Self {
            byte_offset,
            line_count,
        }
    }

    /// Decode a stored value.
    ///
    /// Accepts integral floats (`6.0`) as well as integers, since older writers
    /// stored every number as a double. Returns `None` for anything that is not
    /// a two-element array of non-negative whole numbers.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value.as_array()?.as_slice() {
            [offset, lines] => Some(Self::new(as_count(offset)?, as_count(lines)?)),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::from(vec![self.byte_offset, self.line_count])
    }
}

impl From<(u64, u64)> for OffsetRecord {
    fn from((byte_offset, line_count): (u64, u64)) -> Self {
        Self::new(byte_offset, line_count)
    }
}

impl From<OffsetRecord> for (u64, u64) {
    fn from(record: OffsetRecord) -> Self {
        (record.byte_offset, record.line_count)
    }
}

fn as_count(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
            .map(|f| f as u64)
    })
}

/// Derive the store key for a file path: the leading hex characters of the
/// SHA-256 of the path string.
pub fn store_key(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(STORE_KEY_LEN);
    key
}

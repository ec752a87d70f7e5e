// SPDX-License-Identifier: Apache-2.0

//! Persistence for per-file read offsets.
//!
//! Uses a single JSON file with atomic snapshot writes, flushed in the
//! background whenever the in-memory state changes.

mod flusher;
mod schema;
mod store;

pub use flusher::StoreFlusher;
pub use schema::{OffsetRecord, STORE_KEY_LEN, store_key};
pub use store::KeyValueStore;

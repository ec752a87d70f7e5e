// SPDX-License-Identifier: Apache-2.0

//! Background flushing of the offset store.

use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::store::KeyValueStore;

/// Periodically saves the store whenever it has unsaved updates.
///
/// Save failures are logged and left dirty so the next tick retries them.
pub struct StoreFlusher {
    store: Arc<KeyValueStore>,
    flush_interval: Duration,
}

impl StoreFlusher {
    pub fn new(store: Arc<KeyValueStore>, flush_interval: Duration) -> Self {
        Self {
            store,
            flush_interval,
        }
    }

    /// Run until cancelled. Does not perform a final save; shutdown owns that.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            path = %self.store.path().display(),
            interval = ?self.flush_interval,
            "Offset store flusher started"
        );

        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Offset store flusher cancelled");
                    break;
                }

                _ = ticker.tick() => {
                    self.flush_once();
                }
            }
        }
    }

    fn flush_once(&self) {
        match self.store.save_if_dirty() {
            Ok(true) => debug!("Flushed offset store"),
            Ok(false) => {}
            Err(e) => warn!(
                path = %self.store.path().display(),
                error = %e,
                "Failed to save offset store, will retry"
            ),
        }
    }
}

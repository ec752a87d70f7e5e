// SPDX-License-Identifier: Apache-2.0

//! Bounded MPMC channel used between readers, drain tasks and the consumer.
//!
//! Readers run on blocking threads and use the blocking side; drain tasks and
//! the consumer are async.

use flume::{Receiver, SendTimeoutError as FlumeSendTimeoutError, Sender};
use std::fmt;
use std::time::Duration;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for SendError {}

/// Failure of a blocking send with a deadline. Both variants hand the item back.
#[derive(Debug, PartialEq, Eq)]
pub enum SendTimeoutError<T> {
    Timeout(T),
    Disconnected(T),
}

impl<T> BoundedSender<T> {
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        match self.tx.send_async(item).await {
            Ok(()) => Ok(()),
            Err(_e) => Err(SendError::Disconnected), // receiver closed
        }
    }

    /// Blocking send that gives up after `timeout`, returning the item so the
    /// caller can decide whether to retry.
    pub fn send_timeout(&self, item: T, timeout: Duration) -> Result<(), SendTimeoutError<T>> {
        self.tx.send_timeout(item, timeout).map_err(|e| match e {
            FlumeSendTimeoutError::Timeout(item) => SendTimeoutError::Timeout(item),
            FlumeSendTimeoutError::Disconnected(item) => SendTimeoutError::Disconnected(item),
        })
    }

    /// True once every receiver has been dropped
    pub fn is_disconnected(&self) -> bool {
        self.tx.is_disconnected()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Wait for the next item. `None` once every sender is gone and the
    /// channel is drained.
    pub async fn next(&self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Blocking receive - blocks until an item is available.
    #[cfg(test)]
    pub(crate) fn recv_blocking(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Blocking receive with timeout. `None` on timeout or disconnect.
    #[cfg(test)]
    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    #[cfg(test)]
    pub(crate) fn is_disconnected(&self) -> bool {
        self.rx.is_disconnected()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);

    let sender = BoundedSender { tx };
    let receiver = BoundedReceiver { rx };

    (sender, receiver)
}

#[cfg(test)]
mod tests {
    use super::{SendError, SendTimeoutError, bounded};
    use std::time::Duration;
    use tokio_test::{assert_ok, assert_pending, assert_ready, task::spawn};

    #[tokio::test]
    async fn basics() {
        let (tx, rx) = bounded(3);

        let mut send1 = spawn(async { tx.send("hello\n").await });
        let mut recv1 = spawn(async { rx.next().await });

        assert_pending!(recv1.poll());
        assert_ok!(assert_ready!(send1.poll()));
        assert!(recv1.is_woken());
        assert_eq!(Some("hello\n"), assert_ready!(recv1.poll()));

        drop(send1);
        drop(recv1);

        let mut recv2 = spawn(async { rx.next().await });
        drop(tx);
        // Closed and drained
        assert_eq!(None, assert_ready!(recv2.poll()));
    }

    #[tokio::test]
    async fn sender_blocks_on_full() {
        let (tx, rx) = bounded(1);

        assert_ok!(tx.send(1).await);
        let mut send2 = spawn(async { tx.send(2).await });
        assert_pending!(send2.poll());

        assert_eq!(Some(1), rx.next().await);
        assert_ok!(assert_ready!(send2.poll()));
    }

    #[tokio::test]
    async fn sender_fails_on_rx_close() {
        let (tx, rx) = bounded(1);
        drop(rx);
        assert_eq!(Err(SendError::Disconnected), tx.send(10).await);
    }

    #[test]
    fn send_timeout_returns_item() {
        let (tx, rx) = bounded(1);
        assert!(tx.send_timeout(1, Duration::from_millis(10)).is_ok());
        assert_eq!(
            tx.send_timeout(2, Duration::from_millis(10)),
            Err(SendTimeoutError::Timeout(2))
        );

        drop(rx);
        assert_eq!(
            tx.send_timeout(3, Duration::from_millis(10)),
            Err(SendTimeoutError::Disconnected(3))
        );
    }

    #[test]
    fn recv_timeout_on_empty() {
        let (tx, rx) = bounded::<u8>(1);
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)), None);
        assert!(!rx.is_disconnected());
        drop(tx);
        assert!(rx.is_disconnected());
        assert_eq!(rx.recv_blocking(), None);
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Async deadline queue — a single-producer/single-consumer FIFO
//! with a bounded-wait blocking read. Backs each conversation's response
//! stream in [`crate::connection`]: one queue per in-flight conversation,
//! `enqueue`d by the transport's receive path and drained by the caller of
//! `requestOne`/`requestMulti`.

use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::error::MessageError;

/// FIFO queue with `flush`-to-terminate and a maximum per-read wait.
///
/// Dropping the `DeadlineQueue` without calling [`Self::flush`] first simply
/// drops the channel; a reader blocked on [`Self::next`] at that point sees
/// the same terminal `None` it would after an explicit flush, since closing
/// the sender closes the channel either way.
pub struct DeadlineQueue<T> {
    tx: Option<mpsc::UnboundedSender<T>>,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> DeadlineQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx: Some(tx), rx }
    }

    /// Appends an item and wakes a waiter. A no-op once [`Self::flush`] has
    /// been called — there is no reader left to wake.
    pub fn enqueue(&self, item: T) {
        if let Some(tx) = &self.tx {
            // The receiver is owned by this same struct, so `send` only
            // fails if `flush` already dropped it — safe to ignore.
            let _ = tx.send(item);
        }
    }

    /// Closes the queue. Reads of items already enqueued before the flush
    /// still succeed; once drained, the next read observes termination
    /// instead of waiting out its deadline.
    pub fn flush(&mut self) {
        self.tx = None;
    }

    /// Blocks up to `max_wait` for the next item.
    ///
    /// - `Ok(Some(item))`: the next item in FIFO order.
    /// - `Ok(None)`: the queue was flushed and is now empty — iteration ends.
    /// - `Err(MessageError::Timeout)`: no item arrived within `max_wait`.
    pub async fn next(&mut self, max_wait: Duration) -> Result<Option<T>, MessageError> {
        match tokio::time::timeout(max_wait, self.rx.recv()).await {
            Ok(item) => Ok(item),
            Err(_) => Err(MessageError::Timeout),
        }
    }
}

impl<T> Default for DeadlineQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

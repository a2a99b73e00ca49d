//! Delivery queue
//!
//! Decouples message producers (the ingestion boundary) from the delivery
//! workers. One logical FIFO, multiple producers, multiple consumers.
//!
//! The queue is unbounded: `push` never blocks or fails while the queue
//! is open, and ordering is preserved per producer. Shutdown uses a
//! sentinel value that each worker re-enqueues for its siblings before
//! exiting, so one `shutdown` call drains the whole pool.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::message::Message;

enum Item {
    Deliver(Box<Message>),
    Shutdown,
}

/// Shared FIFO between ingestion and the worker pool
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<Item>,
    rx: Mutex<mpsc::UnboundedReceiver<Item>>,
    closed: AtomicBool,
}

impl DeliveryQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a message for delivery
    ///
    /// Never blocks. Returns `false` if the queue has shut down and the
    /// message was dropped; nothing is accepted behind the sentinel.
    pub fn push(&self, message: Message) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(Item::Deliver(Box::new(message))).is_ok()
    }

    /// Dequeue the next message
    ///
    /// Blocks until a message is available. Returns `None` once the queue
    /// is shutting down; the caller must exit its loop. The sentinel is
    /// re-enqueued so every other consumer observes it too.
    pub async fn pop(&self) -> Option<Message> {
        let mut rx = self.rx.lock().await;

        match rx.recv().await {
            Some(Item::Deliver(message)) => Some(*message),
            Some(Item::Shutdown) => {
                // Propagate the sentinel to the next consumer.
                let _ = self.tx.send(Item::Shutdown);
                None
            }
            None => None,
        }
    }

    /// Signal all consumers to exit
    ///
    /// Closes intake and enqueues the sentinel; messages already queued
    /// ahead of it are still delivered.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Item::Shutdown);
        }
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

//! Bounded MPMC work queue with a completion sentinel.
//!
//! Items are handed from one stage to the next through these queues. Depth
//! is bounded so a fast upstream stage stalls on `enqueue` once the
//! downstream queue fills, instead of growing memory without bound. The
//! bound is also the explicit cap on how far a stage may run ahead of its
//! consumer.
//!
//! Delivery is at-least-once: the checkpoint index, not the queue, is what
//! provides exactly-once processing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

/// An envelope on a stage's input queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEntry<T> {
    /// A real work item.
    Item(T),

    /// Completion sentinel: no further input will arrive. The producer
    /// side enqueues one per consumer once it has finished; a worker that
    /// dequeues it exits its loop.
    Done,
}

/// Error returned when the consumer side has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

impl std::fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("queue closed: all consumers dropped")
    }
}

impl std::error::Error for QueueClosed {}

/// A bounded multi-producer multi-consumer queue.
///
/// Built on a bounded `tokio::sync::mpsc` channel with the receiver behind
/// an async mutex so many workers can compete for the same input. Clones
/// share the same underlying channel.
pub struct WorkQueue<T> {
    tx: mpsc::Sender<QueueEntry<T>>,
    rx: Arc<Mutex<mpsc::Receiver<QueueEntry<T>>>>,
    sealed: Arc<AtomicBool>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: Arc::clone(&self.rx),
            sealed: Arc::clone(&self.sealed),
        }
    }
}

impl<T: Send> WorkQueue<T> {
    /// Create a queue holding at most `depth` outstanding entries.
    pub fn bounded(depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(depth.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            sealed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Append an item. Stalls while the queue is full (backpressure).
    pub async fn enqueue(&self, item: T) -> Result<(), QueueClosed> {
        self.tx
            .send(QueueEntry::Item(item))
            .await
            .map_err(|_| QueueClosed)
    }

    /// Enqueue one completion sentinel and mark the queue sealed.
    ///
    /// The producer side calls this once per consumer after its last real
    /// item, so FIFO ordering guarantees every real item is dequeued before
    /// any worker sees a sentinel.
    pub async fn finish(&self) -> Result<(), QueueClosed> {
        self.sealed.store(true, Ordering::Release);
        self.tx.send(QueueEntry::Done).await.map_err(|_| QueueClosed)
    }

    /// True once the producer side has started enqueueing sentinels.
    ///
    /// Until then, an empty queue means the producer is slow, not that the
    /// stage's input is exhausted.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Take the next entry, waiting up to `timeout`.
    ///
    /// Returns `None` if nothing arrived within the timeout - never blocks
    /// forever. Returns `Some(QueueEntry::Done)` when a sentinel is drawn.
    pub async fn dequeue(&self, timeout: Duration) -> Option<QueueEntry<T>> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(entry)) => Some(entry),
            // Channel closed with no entries left; treat as completion.
            Ok(None) => Some(QueueEntry::Done),
            Err(_) => None,
        }
    }

    /// Entries currently buffered (items plus sentinels).
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded work queues between pools.
//!
//! `send` blocks when the queue is full; `recv` blocks until an item, the
//! queue closing, or the supervisor's stop flag, whichever comes first.
//! Blocked receivers wake promptly on stop, so no worker ever sits in a
//! queue past shutdown.

use crate::supervisor::StopFlag;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// A bounded multi-producer, shared-consumer queue.
pub struct WorkQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        WorkQueue {
            tx: self.tx.clone(),
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T: Send> WorkQueue<T> {
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        WorkQueue {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueue an item; `false` when the queue is closed.
    pub async fn send(&self, item: T) -> bool {
        self.tx.send(item).await.is_ok()
    }

    /// Dequeue the next item. Returns `None` when the queue is closed and
    /// drained, or when the stop flag trips.
    pub async fn recv(&self, stop: &StopFlag) -> Option<T> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            item = rx.recv() => item,
            _ = stop.wait() => None,
        }
    }

    /// Close the queue: senders start failing, buffered items remain
    /// receivable.
    pub async fn close(&self) {
        self.rx.lock().await.close();
    }

    /// Drain whatever is buffered without blocking.
    pub async fn drain(&self) -> Vec<T> {
        let mut rx = self.rx.lock().await;
        let mut items = VecDeque::new();
        while let Ok(item) = rx.try_recv() {
            items.push_back(item);
        }
        items.into()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

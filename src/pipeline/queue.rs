//! Work queue with acknowledgement and join
//!
//! A FIFO shared between one or more producers and a pool of consumers. Every
//! item put on the queue must later be acknowledged with
//! [`WorkQueue::task_done`]; [`WorkQueue::join`] waits until that has happened
//! for every item ever put.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

/// Queue misuse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Queue '{0}' is closed")]
    Closed(&'static str),

    #[error("task_done called on queue '{0}' more times than items were put")]
    Unbalanced(&'static str),
}

/// Result of a bounded-wait pull
#[derive(Debug, PartialEq, Eq)]
pub enum Pull<T> {
    Item(T),
    TimedOut,
    /// The queue is closed and holds nothing more
    Closed,
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    unfinished: usize,
    closed: bool,
}

/// FIFO work queue with optional capacity
#[derive(Debug)]
pub struct WorkQueue<T> {
    name: &'static str,
    capacity: Option<usize>,
    inner: Mutex<Inner<T>>,
    item_ready: Notify,
    space_ready: Notify,
    all_done: Notify,
}

impl<T> WorkQueue<T> {
    /// Creates an empty queue
    ///
    /// # Arguments
    ///
    /// * `name` - Used in logs and errors
    /// * `capacity` - Maximum queued items; `None` for unbounded
    pub fn new(name: &'static str, capacity: Option<usize>) -> Self {
        Self {
            name,
            capacity: capacity.map(|c| c.max(1)),
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                unfinished: 0,
                closed: false,
            }),
            item_ready: Notify::new(),
            space_ready: Notify::new(),
            all_done: Notify::new(),
        }
    }

    /// Creates an unbounded queue
    pub fn unbounded(name: &'static str) -> Self {
        Self::new(name, None)
    }

    // Critical sections never panic midway, so the data is intact after poisoning
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an item, waiting for space if the queue is full
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The item was queued
    /// * `Err(QueueError::Closed)` - The queue was closed; the item is dropped
    pub async fn put(&self, item: T) -> Result<(), QueueError> {
        let mut item = Some(item);
        loop {
            let notified = self.space_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(QueueError::Closed(self.name));
                }
                let has_space = self.capacity.map_or(true, |cap| inner.items.len() < cap);
                if has_space {
                    if let Some(item) = item.take() {
                        inner.items.push_back(item);
                        inner.unfinished += 1;
                    }
                    drop(inner);
                    self.item_ready.notify_one();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Removes the oldest item, waiting until one is available
    ///
    /// Returns None once the queue is closed and empty.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.item_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    drop(inner);
                    self.space_ready.notify_one();
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Removes the oldest item, waiting at most `wait`
    ///
    /// A timed-out pull never takes an item off the queue.
    pub async fn get_timeout(&self, wait: Duration) -> Pull<T> {
        match tokio::time::timeout(wait, self.get()).await {
            Ok(Some(item)) => Pull::Item(item),
            Ok(None) => Pull::Closed,
            Err(_) => Pull::TimedOut,
        }
    }

    /// Removes the oldest item if there is one
    pub fn try_get(&self) -> Option<T> {
        let item = self.lock().items.pop_front();
        if item.is_some() {
            self.space_ready.notify_one();
        }
        item
    }

    /// Acknowledges one item taken from the queue
    pub fn task_done(&self) -> Result<(), QueueError> {
        let mut inner = self.lock();
        if inner.unfinished == 0 {
            return Err(QueueError::Unbalanced(self.name));
        }
        inner.unfinished -= 1;
        if inner.unfinished == 0 {
            drop(inner);
            self.all_done.notify_waiters();
        }
        Ok(())
    }

    /// Waits until every item ever put has been acknowledged
    pub async fn join(&self) {
        loop {
            let notified = self.all_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.unfinished() == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Items put but not yet acknowledged
    pub fn unfinished(&self) -> usize {
        self.lock().unfinished
    }

    /// Items waiting to be taken
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rejects further puts and wakes every waiter
    ///
    /// Items already queued can still be taken.
    pub fn close(&self) {
        let newly_closed = {
            let mut inner = self.lock();
            !std::mem::replace(&mut inner.closed, true)
        };
        if newly_closed {
            tracing::debug!(queue = self.name, "Queue closed");
        }
        self.item_ready.notify_waiters();
        self.space_ready.notify_waiters();
    }

    /// Drops every queued item and acknowledges it
    ///
    /// Used when no consumer is left. Returns the number of items dropped.
    pub fn abandon_remaining(&self) -> usize {
        let (dropped, settled) = {
            let mut inner = self.lock();
            let dropped = inner.items.len();
            inner.items.clear();
            inner.unfinished = inner.unfinished.saturating_sub(dropped);
            (dropped, inner.unfinished == 0)
        };

        if dropped > 0 {
            tracing::warn!(queue = self.name, dropped, "Abandoned unprocessed items");
            self.space_ready.notify_waiters();
        }
        if settled {
            self.all_done.notify_waiters();
        }
        dropped
    }
}

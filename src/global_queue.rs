//! Shared ingress and overflow queue.
//!
//! The global queue is where external submissions enter the pool and where
//! full local queues spill their overflow. It is a plain mutex-guarded FIFO;
//! a closed flag turns away new work while pops keep draining whatever is
//! left.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Returned by push operations once the queue is closed; carries the
/// rejected payload back to the caller.
pub(crate) struct PushError<T>(pub(crate) T);

pub(crate) struct GlobalQueue<T> {
    queue: Mutex<VecDeque<T>>,
    closed: AtomicBool,
    pushes: AtomicU64,
    batch_pushes: AtomicU64,
    pops: AtomicU64,
}

impl<T> GlobalQueue<T> {
    pub(crate) fn new() -> Self {
        GlobalQueue {
            queue: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            pushes: AtomicU64::new(0),
            batch_pushes: AtomicU64::new(0),
            pops: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Idempotent; pops continue to drain after closing.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub(crate) fn push(&self, item: T) -> Result<(), PushError<T>> {
        if self.is_closed() {
            return Err(PushError(item));
        }
        self.queue.lock().push_back(item);
        self.pushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn push_batch(&self, items: Vec<T>) -> Result<(), PushError<Vec<T>>> {
        if self.is_closed() {
            return Err(PushError(items));
        }
        let count = items.len() as u64;
        self.queue.lock().extend(items);
        self.batch_pushes.fetch_add(1, Ordering::Relaxed);
        self.pushes.fetch_add(count, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn try_pop(&self) -> Option<T> {
        let item = self.queue.lock().pop_front();
        if item.is_some() {
            self.pops.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Pops at most `max` items, preserving their FIFO order. Returns `None`
    /// only when the queue is empty.
    pub(crate) fn try_pop_batch(&self, max: usize) -> Option<Vec<T>> {
        let mut queue = self.queue.lock();
        let take = queue.len().min(max);
        if take == 0 {
            return None;
        }
        self.pops.fetch_add(take as u64, Ordering::Relaxed);
        Some(queue.drain(..take).collect())
    }

    pub(crate) fn push_count(&self) -> u64 {
        self.pushes.load(Ordering::Relaxed)
    }

    pub(crate) fn batch_push_count(&self) -> u64 {
        self.batch_pushes.load(Ordering::Relaxed)
    }

    pub(crate) fn pop_count(&self) -> u64 {
        self.pops.load(Ordering::Relaxed)
    }
}

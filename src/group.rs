//! Completion scorecard for a task tree.
//!
//! A task group counts the outstanding tasks transitively attached to one
//! blocking submission. Submissions made while a group is current attach to
//! it and propagate it to their own children, so the count covers the whole
//! descendant tree. `wait` parks the caller until the count reaches zero.

use std::sync::atomic::{AtomicUsize, Ordering};

use log::trace;
use parking_lot::{Condvar, Mutex};

pub(crate) struct TaskGroup {
    running: AtomicUsize,
    lock: Mutex<()>,
    zero: Condvar,
}

impl TaskGroup {
    pub(crate) fn new() -> Self {
        trace!("task group created");
        TaskGroup {
            running: AtomicUsize::new(0),
            lock: Mutex::new(()),
            zero: Condvar::new(),
        }
    }

    /// A new task joined the group.
    pub(crate) fn increment(&self) {
        self.running.fetch_add(1, Ordering::Relaxed);
    }

    /// A task in the group finished. The release pairs with the acquire in
    /// [`TaskGroup::wait`], so everything the finishing task wrote is
    /// visible to a woken waiter.
    pub(crate) fn decrement(&self) {
        if self.running.fetch_sub(1, Ordering::Release) == 1 {
            // Taking the lock orders the notify after any waiter's recheck.
            let _guard = self.lock.lock();
            self.zero.notify_all();
        }
    }

    /// Blocks until the count reaches zero.
    pub(crate) fn wait(&self) {
        if self.running.load(Ordering::Acquire) == 0 {
            return;
        }
        let mut guard = self.lock.lock();
        while self.running.load(Ordering::Acquire) != 0 {
            self.zero.wait(&mut guard);
        }
    }

    #[cfg(test)]
    pub(crate) fn count(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        trace!("task group destroyed");
    }
}

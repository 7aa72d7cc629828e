//! Thread-local submission context.
//!
//! Two slots per thread: the task group new submissions should attach to,
//! and the worker whose run loop owns this thread. Both are installed and
//! reverted in strictly scoped fashion by the RAII guards below.

use std::cell::{Cell, RefCell};
use std::ptr;
use std::sync::Arc;

use crate::group::TaskGroup;
use crate::worker::Worker;

thread_local! {
    static CURRENT_GROUP: RefCell<Option<Arc<TaskGroup>>> = const { RefCell::new(None) };
    static CURRENT_WORKER: Cell<*const Worker> = const { Cell::new(ptr::null()) };
}

/// The group that a task spawned from this thread should attach to.
pub(crate) fn current_group() -> Option<Arc<TaskGroup>> {
    CURRENT_GROUP.with(|slot| slot.borrow().clone())
}

fn swap_group(group: Option<Arc<TaskGroup>>) -> Option<Arc<TaskGroup>> {
    CURRENT_GROUP.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), group))
}

/// Scopes the current group around a blocking submission so that the
/// submission attaches to it; restores the previous group on drop.
pub(crate) struct GroupScope {
    prev: Option<Arc<TaskGroup>>,
}

impl GroupScope {
    pub(crate) fn enter(group: Arc<TaskGroup>) -> Self {
        GroupScope {
            prev: swap_group(Some(group)),
        }
    }
}

impl Drop for GroupScope {
    fn drop(&mut self) {
        swap_group(self.prev.take());
    }
}

/// Scopes a task's captured group around its invocation. On drop the
/// previous context comes back first; the decrement runs last, as the final
/// observable action of the task.
pub(crate) struct TaskGroupGuard {
    group: Option<Arc<TaskGroup>>,
    prev: Option<Arc<TaskGroup>>,
}

impl TaskGroupGuard {
    pub(crate) fn enter(group: Option<Arc<TaskGroup>>) -> Self {
        let prev = swap_group(group.clone());
        TaskGroupGuard { group, prev }
    }
}

impl Drop for TaskGroupGuard {
    fn drop(&mut self) {
        swap_group(self.prev.take());
        if let Some(group) = self.group.take() {
            group.decrement();
        }
    }
}

/// Marks the calling thread as a pool worker for the duration of its run
/// loop.
pub(crate) struct WorkerScope;

impl WorkerScope {
    pub(crate) fn enter(worker: &Worker) -> Self {
        CURRENT_WORKER.with(|slot| slot.set(worker as *const Worker));
        WorkerScope
    }
}

impl Drop for WorkerScope {
    fn drop(&mut self) {
        CURRENT_WORKER.with(|slot| slot.set(ptr::null()));
    }
}

/// The worker running on this thread, if any.
///
/// The pointer is installed by [`WorkerScope`] for exactly the lifetime of
/// the worker's run loop, and the run loop is what invokes every task on
/// this thread, so dereferencing it from inside a task is sound.
pub(crate) fn current_worker<'a>() -> Option<&'a Worker> {
    let ptr = CURRENT_WORKER.with(|slot| slot.get());
    if ptr.is_null() {
        None
    } else {
        // Safety: see above.
        Some(unsafe { &*ptr })
    }
}

//! Task payloads and result handles.
//!
//! A submission is packaged into an erased closure that installs the
//! captured task group, runs the user code under a panic guard, publishes
//! the outcome into a one-shot channel, and decrements the group as its
//! final observable action.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use log::error;
use parking_lot::{Condvar, Mutex};

use crate::context::TaskGroupGuard;
use crate::error::{panic_message, JoinError};
use crate::group::TaskGroup;

/// Type-erased unit of work moved through the queues.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

enum Slot<T> {
    Pending,
    Finished(thread::Result<T>),
    Canceled,
}

struct Channel<T> {
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

/// Handle to the eventual result of a spawned task.
///
/// Obtained from [`ThreadPool::spawn`] or [`spawn`]. Dropping the handle
/// detaches the task; it still runs to completion.
///
/// [`ThreadPool::spawn`]: crate::ThreadPool::spawn
/// [`spawn`]: crate::spawn
pub struct TaskHandle<T> {
    channel: Arc<Channel<T>>,
}

struct TaskPromise<T> {
    channel: Arc<Channel<T>>,
    fulfilled: bool,
}

impl<T> TaskPromise<T> {
    fn complete(mut self, result: thread::Result<T>) {
        let mut slot = self.channel.slot.lock();
        *slot = Slot::Finished(result);
        self.fulfilled = true;
        self.channel.done.notify_all();
    }
}

impl<T> Drop for TaskPromise<T> {
    fn drop(&mut self) {
        if self.fulfilled {
            return;
        }
        // The task was destroyed without running; only reachable when a
        // submission races pool shutdown. Fail the handle instead of leaving
        // the joiner parked forever.
        let mut slot = self.channel.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Canceled;
            self.channel.done.notify_all();
        }
    }
}

impl<T> TaskHandle<T> {
    /// Returns true once the task has run (or been destroyed unrun).
    pub fn is_finished(&self) -> bool {
        !matches!(*self.channel.slot.lock(), Slot::Pending)
    }

    /// Blocks until the task completes and returns its outcome.
    pub fn join(self) -> Result<T, JoinError> {
        let mut slot = self.channel.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Pending) {
                Slot::Pending => self.channel.done.wait(&mut slot),
                Slot::Finished(Ok(value)) => return Ok(value),
                Slot::Finished(Err(payload)) => return Err(JoinError::panicked(payload)),
                Slot::Canceled => return Err(JoinError::canceled()),
            }
        }
    }

    /// Blocks until the task completes and returns its value. A panic from
    /// inside the task resumes on the calling thread.
    pub fn get(self) -> T {
        match self.join() {
            Ok(value) => value,
            Err(err) => err.resume(),
        }
    }
}

/// Packages a user closure into an erased task plus the handle that will
/// receive its outcome. The group guard is declared first so that its drop,
/// the group decrement, happens after the result is published and the
/// previous thread context is back in place.
pub(crate) fn package<F, T>(f: F, group: Option<Arc<TaskGroup>>) -> (Task, TaskHandle<T>)
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let channel = Arc::new(Channel {
        slot: Mutex::new(Slot::Pending),
        done: Condvar::new(),
    });
    let handle = TaskHandle {
        channel: Arc::clone(&channel),
    };
    let promise = TaskPromise {
        channel,
        fulfilled: false,
    };
    let task: Task = Box::new(move || {
        let _group = TaskGroupGuard::enter(group);
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        if let Err(payload) = &result {
            error!("task panicked: {}", panic_message(payload.as_ref()));
        }
        promise.complete(result);
    });
    (task, handle)
}

/// Joins a tuple of handles in positional order, yielding their values.
/// Implemented for tuples of up to eight handles; see [`wait`].
///
/// [`wait`]: crate::wait
pub trait JoinTuple {
    type Output;

    fn join_all(self) -> Self::Output;
}

macro_rules! impl_join_tuple {
    ($($ty:ident => $idx:tt),+) => {
        impl<$($ty: Send + 'static),+> JoinTuple for ($(TaskHandle<$ty>,)+) {
            type Output = ($($ty,)+);

            fn join_all(self) -> Self::Output {
                ($(self.$idx.get(),)+)
            }
        }
    };
}

impl_join_tuple!(T0 => 0);
impl_join_tuple!(T0 => 0, T1 => 1);
impl_join_tuple!(T0 => 0, T1 => 1, T2 => 2);
impl_join_tuple!(T0 => 0, T1 => 1, T2 => 2, T3 => 3);
impl_join_tuple!(T0 => 0, T1 => 1, T2 => 2, T3 => 3, T4 => 4);
impl_join_tuple!(T0 => 0, T1 => 1, T2 => 2, T3 => 3, T4 => 4, T5 => 5);
impl_join_tuple!(T0 => 0, T1 => 1, T2 => 2, T3 => 3, T4 => 4, T5 => 5, T6 => 6);
impl_join_tuple!(T0 => 0, T1 => 1, T2 => 2, T3 => 3, T4 => 4, T5 => 5, T6 => 6, T7 => 7);

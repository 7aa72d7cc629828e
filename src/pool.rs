//! Pool construction, submission routing, and shutdown.
//!
//! The pool owns the worker threads. A submission made from inside a task
//! goes to the calling worker's local queue (with global-queue overflow);
//! anything else enters through the global queue. Blocking submissions run
//! under a fresh task group so the caller can wait for the whole descendant
//! tree.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::sync::WaitGroup;
use log::{debug, error};
use parking_lot::Mutex;

use crate::context::{self, GroupScope};
use crate::error::SpawnError;
use crate::group::TaskGroup;
use crate::local_queue;
use crate::metrics::MetricsSnapshot;
use crate::shared::{Shared, WorkerHandle};
use crate::task::{self, Task, TaskHandle};
use crate::worker::Worker;

/// Tuning knobs recognized by the pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads. Clamped to at least one.
    pub worker_count: usize,
    /// Capacity of each worker's run queue; must be a nonzero power of two.
    pub local_queue_capacity: usize,
    /// Pin each worker to a core, round-robin over the detected core list.
    pub pin_workers: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            worker_count: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            local_queue_capacity: 256,
            pin_workers: false,
        }
    }
}

/// A fixed-size pool of worker threads with per-worker run queues and a
/// shared ingress queue.
///
/// Cloning is cheap; clones refer to the same pool, which makes it easy to
/// hand a pool to tasks that spawn further work. The last clone to drop
/// closes the ingress queue, drains the remaining work, and joins the
/// workers.
///
/// # Example
///
/// ```no_run
/// use spindle::ThreadPool;
///
/// let pool = ThreadPool::new(4);
/// let handle = pool.spawn(|| 6 * 7).unwrap();
/// assert_eq!(handle.get(), 42);
/// pool.close_and_join();
/// ```
#[derive(Clone)]
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Creates a pool with `worker_count` workers and default queues.
    pub fn new(worker_count: usize) -> Self {
        ThreadPool::with_config(PoolConfig {
            worker_count,
            ..PoolConfig::default()
        })
    }

    /// Creates a pool from an explicit configuration.
    ///
    /// # Panics
    ///
    /// Panics if `local_queue_capacity` is not a nonzero power of two, or if
    /// a worker thread cannot be spawned.
    pub fn with_config(config: PoolConfig) -> Self {
        let worker_count = config.worker_count.max(1);

        let mut locals = Vec::with_capacity(worker_count);
        let mut registry = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let (local, steal) = local_queue::pair(config.local_queue_capacity);
            registry.push(WorkerHandle::new(id, steal));
            locals.push(local);
        }
        let shared = Arc::new(Shared::new(registry));

        let core_ids = if config.pin_workers {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        // Every worker lines up on the start latch so no run loop begins
        // before all of its peers exist.
        let start = WaitGroup::new();
        let mut threads = Vec::with_capacity(worker_count);
        for (id, local) in locals.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let start = start.clone();
            let core_id = core_ids.get(id % core_ids.len().max(1)).copied();
            let handle = thread::Builder::new()
                .name(format!("spindle-worker-{id}"))
                .spawn(move || {
                    if let Some(core_id) = core_id {
                        core_affinity::set_for_current(core_id);
                    }
                    let worker = Worker::new(id, local, shared);
                    start.wait();
                    worker.run();
                })
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }
        start.wait();
        debug!("thread pool started with {} workers", worker_count);

        ThreadPool {
            inner: Arc::new(PoolInner {
                shared,
                threads: Mutex::new(threads),
            }),
        }
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.inner.shared.worker_count()
    }

    /// Submits a closure, returning a handle to its eventual result.
    ///
    /// A submission made from inside a task attaches to the submitting
    /// task's group, if any, so `block_on` callers wait for it too.
    pub fn spawn<F, T>(&self, f: F) -> Result<TaskHandle<T>, SpawnError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let group = context::current_group();
        if let Some(group) = &group {
            group.increment();
        }
        let (task, handle) = task::package(f, group.clone());
        match self.dispatch(task) {
            Ok(()) => Ok(handle),
            Err(err) => {
                // The wrapper never ran, so its guard cannot undo the
                // increment above.
                if let Some(group) = &group {
                    group.decrement();
                }
                Err(err)
            }
        }
    }

    fn dispatch(&self, task: Task) -> Result<(), SpawnError> {
        if let Some(worker) = context::current_worker() {
            if Arc::ptr_eq(worker.shared(), &self.inner.shared) {
                return worker.push_local(task);
            }
        }
        self.inner
            .shared
            .global
            .push(task)
            .map_err(|_| SpawnError::QueueClosed)
    }

    /// Submits `f` and blocks until it and every task it transitively
    /// spawned have completed.
    pub fn block_on<F>(&self, f: F) -> Result<(), SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        let group = Arc::new(TaskGroup::new());
        {
            // The submission sees the group through the thread-local slot
            // and attaches to it; descendants inherit it the same way.
            let _scope = GroupScope::enter(Arc::clone(&group));
            self.spawn(f)?;
        }
        group.wait();
        Ok(())
    }

    /// Closes the ingress queue and joins every worker. Tasks already
    /// queued, locally or globally, still run before the workers exit.
    /// Calling this more than once is harmless.
    pub fn close_and_join(&self) {
        self.inner.close_and_join();
    }

    /// Snapshot of the pool's activity counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        let shared = &self.inner.shared;
        let metrics = &shared.metrics;
        MetricsSnapshot {
            tasks_executed: metrics.tasks_executed.load(Ordering::Relaxed),
            local_pops: metrics.local_pops.load(Ordering::Relaxed),
            refill_batches: metrics.refill_batches.load(Ordering::Relaxed),
            refill_tasks: metrics.refill_tasks.load(Ordering::Relaxed),
            steals_success: metrics.steals_success.load(Ordering::Relaxed),
            steals_empty: metrics.steals_empty.load(Ordering::Relaxed),
            steals_skipped: metrics.steals_skipped.load(Ordering::Relaxed),
            overflow_spills: shared.workers.iter().map(|w| w.steal.spill_count()).sum(),
            global_pushes: shared.global.push_count(),
            global_batch_pushes: shared.global.batch_push_count(),
            global_pops: shared.global.pop_count(),
            elapsed_seconds: metrics.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for ThreadPool {
    /// A pool sized to the detected hardware parallelism.
    fn default() -> Self {
        ThreadPool::with_config(PoolConfig::default())
    }
}

impl PoolInner {
    fn close_and_join(&self) {
        self.shared.global.close();
        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.close_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn pool_reports_worker_count() {
        let pool = ThreadPool::new(4);
        assert_eq!(pool.worker_count(), 4);
        pool.close_and_join();
    }

    #[test]
    fn zero_workers_clamps_to_one() {
        let pool = ThreadPool::new(0);
        assert_eq!(pool.worker_count(), 1);
        let handle = pool.spawn(|| 5).unwrap();
        assert_eq!(handle.get(), 5);
        pool.close_and_join();
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn capacity_must_be_a_power_of_two() {
        let _pool = ThreadPool::with_config(PoolConfig {
            worker_count: 1,
            local_queue_capacity: 3,
            pin_workers: false,
        });
    }

    #[test]
    fn spawn_runs_the_task() {
        let pool = ThreadPool::new(2);
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let handle = pool
            .spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        handle.get();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        pool.close_and_join();
    }

    #[test]
    fn tasks_spawned_inside_tasks_complete() {
        let pool = ThreadPool::new(2);
        let pool2 = pool.clone();
        let outer = pool
            .spawn(move || pool2.spawn(|| 10).unwrap())
            .unwrap();
        // Join the inner handle from off-pool; joining it inside the outer
        // task would park the worker that owns the child's queue.
        let inner = outer.get();
        assert_eq!(inner.get(), 10);
        pool.close_and_join();
    }

    #[test]
    fn pinned_pool_still_runs_tasks() {
        let pool = ThreadPool::with_config(PoolConfig {
            worker_count: 2,
            pin_workers: true,
            ..PoolConfig::default()
        });
        let handle = pool.spawn(|| 3).unwrap();
        assert_eq!(handle.get(), 3);
        pool.close_and_join();
    }
}

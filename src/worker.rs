//! Worker thread run loop.
//!
//! Each worker owns the local half of one run queue and drives the dispatch
//! loop: drain local work, refill from the global queue in batches, steal
//! from the fullest peer, and otherwise sleep briefly before checking the
//! shutdown condition.

use std::cell::Cell;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::debug;

use crate::context::WorkerScope;
use crate::error::SpawnError;
use crate::local_queue::Local;
use crate::shared::{Shared, WorkerHandle};
use crate::task::Task;

/// How long an idle worker sleeps between unproductive rounds.
const IDLE_SLEEP: Duration = Duration::from_micros(100);

pub(crate) struct Worker {
    id: usize,
    local: Local<Task>,
    shared: Arc<Shared>,
    shutdown: Cell<bool>,
}

impl Worker {
    pub(crate) fn new(id: usize, local: Local<Task>, shared: Arc<Shared>) -> Self {
        Worker {
            id,
            local,
            shared,
            shutdown: Cell::new(false),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Enqueues a task submitted from code running on this worker's thread,
    /// spilling to the global queue when the local queue is full.
    pub(crate) fn push_local(&self, task: Task) -> Result<(), SpawnError> {
        self.local
            .push_back(task, &self.shared.global)
            .map_err(|_| SpawnError::QueueClosed)
    }

    /// Dispatch loop. Exits once the global queue is closed and both the
    /// local and global queues have drained.
    pub(crate) fn run(&self) {
        let _scope = WorkerScope::enter(self);
        debug!("worker {} running", self.id);
        loop {
            if let Some(task) = self.next_task() {
                self.execute(task);
                continue;
            }
            if let Some(task) = self.steal_task() {
                self.execute(task);
                continue;
            }
            thread::sleep(IDLE_SLEEP);
            self.shutdown.set(self.shared.global.is_closed());
            if self.shutdown.get() && self.local.is_empty() && self.shared.global.is_empty() {
                break;
            }
        }
        debug!("worker {} exiting", self.id);
    }

    fn execute(&self, task: Task) {
        task();
        self.shared
            .metrics
            .tasks_executed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Local pop, falling back to a batched refill from the global queue.
    /// The refill executes the newest task of the batch directly and parks
    /// the rest on the local tail.
    fn next_task(&self) -> Option<Task> {
        if let Some(task) = self.local.pop() {
            self.shared.metrics.local_pops.fetch_add(1, Ordering::Relaxed);
            return Some(task);
        }
        if self.shared.global.is_empty() {
            return None;
        }
        let want = self.local.remaining().min(self.local.capacity() / 2);
        if want == 0 {
            return None;
        }
        let mut batch = self.shared.global.try_pop_batch(want)?;
        let task = batch.pop()?;
        self.shared
            .metrics
            .refill_batches
            .fetch_add(1, Ordering::Relaxed);
        self.shared
            .metrics
            .refill_tasks
            .fetch_add(batch.len() as u64 + 1, Ordering::Relaxed);
        if !batch.is_empty() {
            self.local.push_back_batch(batch);
        }
        Some(task)
    }

    /// One steal round: honor the concurrency cap, pick the fullest peer
    /// that is not itself stealing, and fall back to a single global pop
    /// when no victim qualifies.
    fn steal_task(&self) -> Option<Task> {
        if !self.shared.can_steal() {
            self.shared
                .metrics
                .steals_skipped
                .fetch_add(1, Ordering::Relaxed);
            return None;
        }
        self.shared.enter_steal();
        let me = &self.shared.workers[self.id];
        me.is_stealing.store(true, Ordering::Release);

        let mut victim: Option<&WorkerHandle> = None;
        let mut best = 0;
        for peer in &self.shared.workers {
            if peer.id == self.id {
                continue;
            }
            if peer.is_stealing.load(Ordering::Acquire) {
                continue;
            }
            let size = peer.steal.len();
            if size > best {
                best = size;
                victim = Some(peer);
            }
        }

        match victim {
            Some(peer) => {
                let task = peer.steal.steal_into(&self.local);
                me.is_stealing.store(false, Ordering::Release);
                self.shared.exit_steal();
                let counter = if task.is_some() {
                    &self.shared.metrics.steals_success
                } else {
                    &self.shared.metrics.steals_empty
                };
                counter.fetch_add(1, Ordering::Relaxed);
                task
            }
            None => {
                me.is_stealing.store(false, Ordering::Release);
                self.shared.exit_steal();
                self.shared.global.try_pop()
            }
        }
    }
}

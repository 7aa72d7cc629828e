//! Pool-wide state shared by every worker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::global_queue::GlobalQueue;
use crate::local_queue::Steal;
use crate::metrics::Metrics;
use crate::task::Task;

/// Registry entry for one worker: the steal half of its run queue plus the
/// flag peers consult to avoid stealing from a stealer.
pub(crate) struct WorkerHandle {
    pub(crate) id: usize,
    pub(crate) steal: Steal<Task>,
    pub(crate) is_stealing: AtomicBool,
}

impl WorkerHandle {
    pub(crate) fn new(id: usize, steal: Steal<Task>) -> Self {
        WorkerHandle {
            id,
            steal,
            is_stealing: AtomicBool::new(false),
        }
    }
}

pub(crate) struct Shared {
    /// Written once during pool construction, read-only afterwards.
    pub(crate) workers: Vec<WorkerHandle>,
    pub(crate) global: GlobalQueue<Task>,
    steal_worker_count: AtomicUsize,
    pub(crate) metrics: Metrics,
}

impl Shared {
    pub(crate) fn new(workers: Vec<WorkerHandle>) -> Self {
        Shared {
            workers,
            global: GlobalQueue::new(),
            steal_worker_count: AtomicUsize::new(0),
            metrics: Metrics::new(),
        }
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Steal-concurrency cap: at most half the workers may scan for victims
    /// at once.
    pub(crate) fn can_steal(&self) -> bool {
        self.steal_worker_count.load(Ordering::Acquire) < self.workers.len() / 2
    }

    pub(crate) fn enter_steal(&self) {
        self.steal_worker_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn exit_steal(&self) {
        self.steal_worker_count.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_queue;

    fn shared_with(count: usize) -> Shared {
        let workers = (0..count)
            .map(|id| {
                let (_local, steal) = local_queue::pair(8);
                WorkerHandle::new(id, steal)
            })
            .collect();
        Shared::new(workers)
    }

    #[test]
    fn steal_cap_is_half_the_workers() {
        let shared = shared_with(4);
        assert!(shared.can_steal());
        shared.enter_steal();
        assert!(shared.can_steal());
        shared.enter_steal();
        assert!(!shared.can_steal());
        shared.exit_steal();
        assert!(shared.can_steal());
    }

    #[test]
    fn lone_worker_never_steals() {
        let shared = shared_with(1);
        assert!(!shared.can_steal());
    }
}

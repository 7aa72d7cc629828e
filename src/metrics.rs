use std::sync::atomic::AtomicU64;
use std::time::Instant;

/// Scheduler-level activity counters, bumped with relaxed atomics on the
/// hot paths.
#[derive(Debug)]
pub(crate) struct Metrics {
    pub(crate) tasks_executed: AtomicU64,
    pub(crate) local_pops: AtomicU64,
    pub(crate) refill_batches: AtomicU64,
    pub(crate) refill_tasks: AtomicU64,
    pub(crate) steals_success: AtomicU64,
    pub(crate) steals_empty: AtomicU64,
    pub(crate) steals_skipped: AtomicU64,
    pub(crate) start_time: Instant,
}

impl Metrics {
    pub(crate) fn new() -> Self {
        Metrics {
            tasks_executed: AtomicU64::new(0),
            local_pops: AtomicU64::new(0),
            refill_batches: AtomicU64::new(0),
            refill_tasks: AtomicU64::new(0),
            steals_success: AtomicU64::new(0),
            steals_empty: AtomicU64::new(0),
            steals_skipped: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

/// Point-in-time view of pool activity, returned by
/// [`ThreadPool::metrics`].
///
/// [`ThreadPool::metrics`]: crate::ThreadPool::metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Tasks run to completion by the workers.
    pub tasks_executed: u64,
    /// Pops served from a worker's own queue.
    pub local_pops: u64,
    /// Batched refills taken from the global queue.
    pub refill_batches: u64,
    /// Tasks moved by those refills.
    pub refill_tasks: u64,
    /// Steal attempts that brought back at least one task.
    pub steals_success: u64,
    /// Steal attempts that found a victim but came back empty.
    pub steals_empty: u64,
    /// Steal rounds skipped because the concurrency cap was reached.
    pub steals_skipped: u64,
    /// Local-queue overflows spilled to the global queue.
    pub overflow_spills: u64,
    /// Tasks pushed to the global queue (external submissions and spills).
    pub global_pushes: u64,
    /// Batch pushes to the global queue.
    pub global_batch_pushes: u64,
    /// Tasks popped from the global queue.
    pub global_pops: u64,
    /// Seconds since the pool started.
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Completed-task throughput since pool start.
    pub fn tasks_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.tasks_executed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Fraction of victim-targeting steal attempts that succeeded.
    pub fn steal_success_rate(&self) -> f64 {
        let attempts = self.steals_success + self.steals_empty;
        if attempts > 0 {
            self.steals_success as f64 / attempts as f64
        } else {
            0.0
        }
    }
}

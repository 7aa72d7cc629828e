//! # Spindle - a work-stealing thread pool
//!
//! A fixed-size pool of worker threads for latency-sensitive fan-out
//! workloads: many small, independent, possibly nested tasks that must run
//! with minimal scheduling overhead and fair load distribution.
//!
//! ## Architecture
//!
//! - **Local queues**: each worker owns a bounded ring buffer that is
//!   lock-free for the owner. Peers steal half of it at a time through a
//!   packed dual-cursor head; on overflow the owner spills half to the
//!   global queue.
//! - **Global queue**: a mutex-guarded FIFO that takes external submissions
//!   and overflow. Closing it starts pool shutdown.
//! - **Task groups**: a blocking submission tracks its whole transitive
//!   descendant tree through a reference-counted scorecard propagated via
//!   thread-local context.
//! - **Workers**: OS threads running local dispatch, batched global
//!   refills, and biggest-victim stealing under a pool-wide cap on
//!   concurrent stealers.
//!
//! ## Example
//!
//! ```no_run
//! let a = spindle::spawn(|| 1).unwrap();
//! let b = spindle::spawn(|| String::from("two")).unwrap();
//! let (a, b) = spindle::wait((a, b));
//! assert_eq!((a, b.as_str()), (1, "two"));
//!
//! spindle::block_on(|| {
//!     for i in 0..4 {
//!         let _ = spindle::spawn(move || println!("child {i}"));
//!     }
//! })
//! .unwrap();
//!
//! spindle::close_and_join();
//! ```

pub mod error;
pub mod metrics;
pub mod pool;
pub mod task;

mod context;
mod global_queue;
mod group;
mod local_queue;
mod shared;
mod worker;

pub use error::{JoinError, SpawnError};
pub use metrics::MetricsSnapshot;
pub use pool::{PoolConfig, ThreadPool};
pub use task::{JoinTuple, TaskHandle};

use lazy_static::lazy_static;

lazy_static! {
    /// Process-wide pool behind the free-function surface, created on first
    /// use with the default configuration.
    static ref DEFAULT_POOL: ThreadPool = ThreadPool::default();
}

/// Submits a closure to the process-wide pool, returning a handle to its
/// eventual result. Non-blocking.
pub fn spawn<F, T>(f: F) -> Result<TaskHandle<T>, SpawnError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    DEFAULT_POOL.spawn(f)
}

/// Joins every handle in the tuple, preserving positional order. A panic
/// from a failed task resumes on the calling thread.
pub fn wait<H: JoinTuple>(handles: H) -> H::Output {
    handles.join_all()
}

/// Runs `f` on the process-wide pool and blocks until it and every task it
/// transitively spawned have completed.
pub fn block_on<F>(f: F) -> Result<(), SpawnError>
where
    F: FnOnce() + Send + 'static,
{
    DEFAULT_POOL.block_on(f)
}

/// Shuts down the process-wide pool: no new submissions are accepted,
/// queued tasks drain, and every worker thread is joined.
pub fn close_and_join() {
    DEFAULT_POOL.close_and_join()
}

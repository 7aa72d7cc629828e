//! Per-worker bounded run queue.
//!
//! Single producer, batch-stealing consumers. The owning worker pushes and
//! pops freely; any other worker may claim a batch off the front through the
//! [`Steal`] handle. Owner and thieves coordinate through a single 64-bit
//! head holding two packed 32-bit cursors: the high half is the steal head
//! (the claim cursor of an in-flight thief), the low half is the real head
//! (the committed consumption point). The halves are equal whenever no thief
//! is mid-claim.
//!
//! Cursors are free-running `u32`s; slot indices are `cursor & mask`, so
//! wraparound of the 32-bit space is harmless as long as the live window
//! never exceeds the capacity.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use log::{trace, warn};

use crate::global_queue::{GlobalQueue, PushError};

/// Owner-side handle. Must stay on the worker thread that owns the queue.
pub(crate) struct Local<T> {
    inner: Arc<Inner<T>>,
}

/// Thief-side handle, shared through the worker registry.
pub(crate) struct Steal<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    /// Packed cursor pair: steal head in the high 32 bits, real head in the
    /// low 32 bits.
    head: CachePadded<AtomicU64>,
    /// Advanced only by the owner.
    tail: CachePadded<AtomicU32>,
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Overflow spills pushed to the global queue by this owner.
    spills: AtomicU64,
}

// Safety: slot access is serialized by the head CAS protocol. A slot is read
// only after the cursor window moves past it, and written only while it is
// outside the live window.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

/// Creates the two halves of one queue. `capacity` must be a nonzero power
/// of two no larger than the 32-bit cursor window allows.
pub(crate) fn pair<T>(capacity: usize) -> (Local<T>, Steal<T>) {
    assert!(
        capacity.is_power_of_two(),
        "local queue capacity must be a nonzero power of two"
    );
    assert!(
        capacity <= 1 << 31,
        "local queue capacity does not fit the cursor window"
    );
    let buffer = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect();
    let inner = Arc::new(Inner {
        head: CachePadded::new(AtomicU64::new(0)),
        tail: CachePadded::new(AtomicU32::new(0)),
        buffer,
        mask: capacity - 1,
        spills: AtomicU64::new(0),
    });
    (
        Local {
            inner: Arc::clone(&inner),
        },
        Steal { inner },
    )
}

fn pack(steal: u32, real: u32) -> u64 {
    (u64::from(steal) << 32) | u64::from(real)
}

fn unpack(head: u64) -> (u32, u32) {
    ((head >> 32) as u32, head as u32)
}

impl<T> Inner<T> {
    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let (_, real) = unpack(self.head.load(Ordering::Acquire));
        tail.wrapping_sub(real) as usize
    }

    /// Free slots, measured against the steal head: slots still claimed by
    /// an in-flight thief do not count as free.
    fn remaining(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let (steal, _) = unpack(self.head.load(Ordering::Acquire));
        self.capacity() - tail.wrapping_sub(steal) as usize
    }

    /// Moves the value out of the slot at `cursor`, leaving it logically
    /// uninitialized.
    ///
    /// Safety: the caller must hold exclusive claim over the slot.
    unsafe fn read_slot(&self, cursor: u32) -> T {
        (*self.buffer[cursor as usize & self.mask].get()).assume_init_read()
    }

    /// Safety: the slot at `cursor` must be outside the live window.
    unsafe fn write_slot(&self, cursor: u32, value: T) {
        (*self.buffer[cursor as usize & self.mask].get()).write(value);
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let tail = *self.tail.get_mut();
        let (_, mut real) = unpack(*self.head.get_mut());
        while real != tail {
            // Safety: exclusive access; every slot in `[real, tail)` holds a
            // live value.
            unsafe { drop(self.read_slot(real)) };
            real = real.wrapping_add(1);
        }
    }
}

impl<T> Local<T> {
    pub(crate) fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn remaining(&self) -> usize {
        self.inner.remaining()
    }

    /// Pushes to the back of the queue. When the queue is full, half of it
    /// plus `task` spill to the global queue so the owner never waits on a
    /// thief.
    pub(crate) fn push_back(&self, task: T, global: &GlobalQueue<T>) -> Result<(), PushError<T>> {
        let mut task = task;
        loop {
            let head = self.inner.head.load(Ordering::Acquire);
            let (steal, real) = unpack(head);
            // Only this thread writes the tail.
            let tail = self.inner.tail.load(Ordering::Relaxed);

            if tail.wrapping_sub(steal) < self.capacity() as u32 {
                // Safety: `tail` is outside the live window `[steal, tail)`,
                // so the slot is unoccupied until the release store below
                // publishes it.
                unsafe { self.inner.write_slot(tail, task) };
                self.inner.tail.store(tail.wrapping_add(1), Ordering::Release);
                return Ok(());
            }

            if steal != real {
                // Full while a thief holds a claim on our front half. The
                // claim will free capacity soon, but the owner must not
                // wait: hand this one task to the global queue instead.
                return global.push(task);
            }

            match self.push_overflow(task, real, tail, global)? {
                None => return Ok(()),
                // Lost the head CAS to a concurrent pop or steal; retry.
                Some(returned) => task = returned,
            }
        }
    }

    /// Moves the front half of the queue plus `task` to the global queue as
    /// one batch. Returns `Ok(Some(task))` when the claim CAS is lost and
    /// the caller should retry from a fresh head.
    fn push_overflow(
        &self,
        task: T,
        real: u32,
        tail: u32,
        global: &GlobalQueue<T>,
    ) -> Result<Option<T>, PushError<T>> {
        let take = (self.capacity() / 2) as u32;
        debug_assert_eq!(tail.wrapping_sub(real), self.capacity() as u32);

        let claimed = real.wrapping_add(take);
        if self
            .inner
            .head
            .compare_exchange(
                pack(real, real),
                pack(claimed, claimed),
                Ordering::Release,
                Ordering::Relaxed,
            )
            .is_err()
        {
            trace!("overflow claim lost to a concurrent pop or steal, retrying");
            return Ok(Some(task));
        }

        // Both cursors moved past the claimed slots; they are exclusively
        // ours now.
        let mut batch = Vec::with_capacity(take as usize + 1);
        for i in 0..take {
            // Safety: see above.
            batch.push(unsafe { self.inner.read_slot(real.wrapping_add(i)) });
        }
        batch.push(task);

        self.inner.spills.fetch_add(1, Ordering::Relaxed);
        match global.push_batch(batch) {
            Ok(()) => Ok(None),
            Err(PushError(mut batch)) => {
                // Only reachable when a submission races pool shutdown. The
                // claimed half cannot be requeued; report failure for the
                // caller's task and drop the rest.
                warn!(
                    "overflow spill of {} tasks hit a closed global queue",
                    batch.len()
                );
                match batch.pop() {
                    Some(task) => Err(PushError(task)),
                    None => Ok(None),
                }
            }
        }
    }

    /// Appends a refill batch at the tail. The caller must have sized the
    /// batch against `remaining`.
    pub(crate) fn push_back_batch(&self, tasks: Vec<T>) {
        debug_assert!(!tasks.is_empty());
        debug_assert!(tasks.len() <= self.remaining());
        let mut tail = self.inner.tail.load(Ordering::Relaxed);
        for task in tasks {
            // Safety: per the caller contract the slot at `tail` is free.
            unsafe { self.inner.write_slot(tail, task) };
            tail = tail.wrapping_add(1);
        }
        self.inner.tail.store(tail, Ordering::Release);
    }

    /// Pops from the front. CAS-based because a thief may be advancing the
    /// real head concurrently with its claim.
    pub(crate) fn pop(&self) -> Option<T> {
        let mut head = self.inner.head.load(Ordering::Acquire);
        let cursor = loop {
            let (steal, real) = unpack(head);
            let tail = self.inner.tail.load(Ordering::Relaxed);
            if real == tail {
                return None;
            }
            let next_real = real.wrapping_add(1);
            // Leave an in-flight claim untouched; otherwise advance both
            // cursors together.
            let next = if steal == real {
                pack(next_real, next_real)
            } else {
                pack(steal, next_real)
            };
            match self.inner.head.compare_exchange_weak(
                head,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break real,
                Err(actual) => head = actual,
            }
        };
        // Safety: the CAS moved the real head past `cursor`; the slot is
        // exclusively ours.
        Some(unsafe { self.inner.read_slot(cursor) })
    }
}

impl<T> Clone for Steal<T> {
    fn clone(&self) -> Self {
        Steal {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Steal<T> {
    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn spill_count(&self) -> u64 {
        self.inner.spills.load(Ordering::Relaxed)
    }

    /// Claims half of this queue for `dst`, which must belong to the calling
    /// thread. The last task of the claimed batch is returned for immediate
    /// execution; the rest become visible in `dst` for subsequent pops.
    pub(crate) fn steal_into(&self, dst: &Local<T>) -> Option<T> {
        let (dst_steal, _) = unpack(dst.inner.head.load(Ordering::Acquire));
        let dst_tail = dst.inner.tail.load(Ordering::Relaxed);
        // A thief that is already more than half loaded does not get to
        // hoard more.
        if dst_tail.wrapping_sub(dst_steal) > (dst.capacity() / 2) as u32 {
            return None;
        }

        let n = self.steal_half(dst, dst_tail);
        if n == 0 {
            return None;
        }

        let kept = n - 1;
        let last = dst_tail.wrapping_add(kept);
        // Safety: `steal_half` wrote `[dst_tail, dst_tail + n)` and nothing
        // else can observe those slots until the tail store below.
        let task = unsafe { dst.inner.read_slot(last) };
        if kept > 0 {
            dst.inner.tail.store(last, Ordering::Release);
        }
        Some(task)
    }

    /// Three-phase batch claim. Phase 1 advertises the claim by advancing
    /// the real head while parking the steal head; phase 2 copies the
    /// claimed slots into `dst`; phase 3 commits by re-joining the cursors.
    /// Returns the number of tasks moved.
    fn steal_half(&self, dst: &Local<T>, dst_tail: u32) -> u32 {
        let mut prev = self.inner.head.load(Ordering::Acquire);
        let (n, claimed) = loop {
            let (steal, real) = unpack(prev);
            if steal != real {
                // Another thief already holds a claim on this queue.
                return 0;
            }
            let tail = self.inner.tail.load(Ordering::Acquire);
            let n = tail.wrapping_sub(real) / 2;
            if n == 0 {
                return 0;
            }
            let next = pack(steal, real.wrapping_add(n));
            match self.inner.head.compare_exchange_weak(
                prev,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break (n, next),
                Err(actual) => prev = actual,
            }
        };

        let (first, _) = unpack(claimed);
        debug_assert!(n as usize <= dst.remaining());
        for i in 0..n {
            // Safety: phase 1 reserved `[first, first + n)` on the victim,
            // and the half-full check guarantees room in `dst`.
            unsafe {
                let task = self.inner.read_slot(first.wrapping_add(i));
                dst.inner.write_slot(dst_tail.wrapping_add(i), task);
            }
        }

        // Commit: catch the steal head up to wherever the real head is now.
        // The owner may have popped past our claim start in the meantime; it
        // never touches the steal head, so this loop terminates.
        let mut prev = claimed;
        loop {
            let (_, real) = unpack(prev);
            let next = pack(real, real);
            match self.inner.head.compare_exchange_weak(
                prev,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return n,
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn push_pop_is_fifo() {
        let global = GlobalQueue::new();
        let (local, _steal) = pair(8);
        for i in 0..5 {
            local.push_back(i, &global).ok().unwrap();
        }
        assert_eq!(local.len(), 5);
        assert_eq!(local.remaining(), 3);
        for i in 0..5 {
            assert_eq!(local.pop(), Some(i));
        }
        assert_eq!(local.pop(), None);
        assert!(global.is_empty());
    }

    #[test]
    fn overflow_spills_front_half_plus_incoming() {
        let global = GlobalQueue::new();
        let (local, steal) = pair(4);
        for i in 0..4 {
            local.push_back(i, &global).ok().unwrap();
        }
        // Fifth push: tasks 0 and 1 plus the new task 4 go global.
        local.push_back(4, &global).ok().unwrap();

        assert_eq!(steal.spill_count(), 1);
        assert_eq!(global.len(), 3);
        assert_eq!(global.try_pop(), Some(0));
        assert_eq!(global.try_pop(), Some(1));
        assert_eq!(global.try_pop(), Some(4));

        assert_eq!(local.pop(), Some(2));
        assert_eq!(local.pop(), Some(3));
        assert_eq!(local.pop(), None);
    }

    #[test]
    fn queue_refills_after_overflow() {
        let global = GlobalQueue::new();
        let (local, _steal) = pair(4);
        for i in 0..5 {
            local.push_back(i, &global).ok().unwrap();
        }
        // The spill freed half the queue; further pushes fit again.
        local.push_back(5, &global).ok().unwrap();
        assert_eq!(local.len(), 3);
        assert_eq!(local.pop(), Some(2));
        assert_eq!(local.pop(), Some(3));
        assert_eq!(local.pop(), Some(5));
    }

    #[test]
    fn steal_takes_half_and_returns_the_last_claimed() {
        let global = GlobalQueue::new();
        let (victim, victim_steal) = pair(8);
        let (thief, _thief_steal) = pair(8);
        for i in 0..4 {
            victim.push_back(i, &global).ok().unwrap();
        }

        // Half of four is two: tasks 0 and 1 are claimed, 1 comes back for
        // immediate execution, 0 lands in the thief's queue.
        assert_eq!(victim_steal.steal_into(&thief), Some(1));
        assert_eq!(thief.len(), 1);
        assert_eq!(thief.pop(), Some(0));
        assert_eq!(victim.pop(), Some(2));
        assert_eq!(victim.pop(), Some(3));
        assert_eq!(victim.pop(), None);
    }

    #[test]
    fn steal_refuses_single_task_victim() {
        let global = GlobalQueue::new();
        let (victim, victim_steal) = pair(8);
        let (thief, _) = pair(8);
        victim.push_back(7, &global).ok().unwrap();

        // size / 2 rounds to zero; the lone task stays with its owner.
        assert_eq!(victim_steal.steal_into(&thief), None);
        assert_eq!(victim.pop(), Some(7));
    }

    #[test]
    fn steal_refuses_when_thief_is_half_full() {
        let global = GlobalQueue::new();
        let (victim, victim_steal) = pair(4);
        let (thief, _) = pair(4);
        for i in 0..4 {
            victim.push_back(i, &global).ok().unwrap();
        }
        for i in 10..13 {
            thief.push_back(i, &global).ok().unwrap();
        }

        assert_eq!(victim_steal.steal_into(&thief), None);
        assert_eq!(victim.len(), 4);
    }

    #[test]
    fn steal_on_empty_returns_none() {
        let (_victim, victim_steal) = pair::<usize>(8);
        let (thief, _) = pair(8);
        assert_eq!(victim_steal.steal_into(&thief), None);
    }

    #[test]
    fn full_queue_with_closed_global_reports_the_incoming_task() {
        let global = GlobalQueue::new();
        let (local, _steal) = pair(4);
        for i in 0..4 {
            local.push_back(i, &global).ok().unwrap();
        }
        global.close();

        let err = local.push_back(99, &global).err().unwrap();
        assert_eq!(err.0, 99);
    }

    #[test]
    fn drop_releases_queued_values() {
        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let global = GlobalQueue::new();
        let (local, steal) = pair(8);
        for _ in 0..5 {
            local
                .push_back(Tracked(Arc::clone(&drops)), &global)
                .ok()
                .unwrap();
        }
        drop(local.pop());
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        drop(local);
        drop(steal);
        assert_eq!(drops.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn concurrent_owner_and_thief_lose_nothing() {
        use std::sync::atomic::AtomicBool;
        use std::thread;

        const TOTAL: usize = 10_000;

        let global: Arc<GlobalQueue<usize>> = Arc::new(GlobalQueue::new());
        let (victim, victim_steal) = pair(64);
        let done = Arc::new(AtomicBool::new(false));
        let stolen = Arc::new(AtomicUsize::new(0));

        let thief_done = Arc::clone(&done);
        let thief_stolen = Arc::clone(&stolen);
        let thief_handle = thread::spawn(move || {
            let (thief, _) = pair(64);
            loop {
                if victim_steal.steal_into(&thief).is_some() {
                    thief_stolen.fetch_add(1, Ordering::SeqCst);
                }
                while thief.pop().is_some() {
                    thief_stolen.fetch_add(1, Ordering::SeqCst);
                }
                if thief_done.load(Ordering::SeqCst) {
                    break;
                }
            }
        });

        let mut popped = 0;
        for i in 0..TOTAL {
            victim.push_back(i, &global).ok().unwrap();
            // Pop every fourth round so the queue keeps a stealable backlog.
            if i % 4 == 0 && victim.pop().is_some() {
                popped += 1;
            }
        }
        while victim.pop().is_some() {
            popped += 1;
        }
        done.store(true, Ordering::SeqCst);
        thief_handle.join().unwrap();

        // Everything pushed is accounted for exactly once across the owner,
        // the thief, and any overflow spill.
        let mut spilled = 0;
        while global.try_pop().is_some() {
            spilled += 1;
        }
        assert_eq!(popped + stolen.load(Ordering::SeqCst) + spilled, TOTAL);
    }
}

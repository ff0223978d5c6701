//! Read-copy-update domain: read-side critical sections plus a writer
//! `synchronize()` built from [`fusex_epoch`].
//!
//! Intended for data read on nearly every request and updated rarely (the
//! dispatcher's resolved configuration, the broadcast suppression regex).
//! The CAP store and client registry are *not* built on this — their update
//! rate is high enough that RCU's drain cost would dominate, so they use
//! coarse-grained mutual exclusion instead (see `fusex-capstore`,
//! `fusex-registry`).

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use fusex_epoch::{AtomicOwnedPtr, EpochCounters, ReaderTag, SlotCounters};

/// A single writer-slot RCU domain guarding one published value of type
/// `T`. `C` selects the reader-counter implementation (`SlotCounters` by
/// default; `RingCounters` is also usable).
pub struct RcuDomain<T, C: EpochCounters = SlotCounters> {
    epoch: AtomicU64,
    ptr: AtomicOwnedPtr<T>,
    counters: Arc<C>,
    writer_gate: AtomicU64,
}

impl<T> RcuDomain<T, SlotCounters> {
    /// A domain using the default per-thread slot counters.
    pub fn new(value: T) -> Self {
        Self::with_counters(value, SlotCounters::new())
    }
}

impl<T, C: EpochCounters> RcuDomain<T, C> {
    pub fn with_counters(value: T, counters: Arc<C>) -> Self {
        Self {
            epoch: AtomicU64::new(0),
            ptr: AtomicOwnedPtr::new(value),
            counters,
            writer_gate: AtomicU64::new(0),
        }
    }

    /// Enter a read-side critical section. The returned guard derefs to the
    /// currently published value and must not be held across a blocking
    /// operation — RCU read sections must not block indefinitely.
    pub fn read_lock(&self) -> ReadGuard<'_, T, C> {
        let epoch = self.epoch.load(Ordering::Acquire);
        let tag = self.counters.enter(epoch);
        // SAFETY: we are now registered as a reader under `epoch`; a writer
        // must observe zero readers for `epoch` before reclaiming anything
        // this read could have observed.
        let value = unsafe { self.ptr.read() }
            .expect("RcuDomain pointer is never null after construction");
        ReadGuard {
            domain: self,
            tag: Some(tag),
            value,
        }
    }

    /// Publish `new_value`, waiting for readers of the prior epoch to drain
    /// before reclaiming the object it replaces. Blocks the calling thread
    /// (with periodic yielding) until that drain completes; concurrent
    /// writers on the same domain are serialized via CAS on `writer_gate`.
    pub fn replace(&self, new_value: T) {
        self.acquire_writer_slot();
        let prior_epoch = self.epoch.load(Ordering::Acquire);
        let old_raw = self.ptr.write(new_value);
        self.epoch.store(prior_epoch.wrapping_add(1), Ordering::Release);
        self.synchronize(prior_epoch);
        // SAFETY: synchronize() only returns once epoch_has_readers(prior_epoch)
        // is false, so no reader can still be dereferencing `old_raw`.
        unsafe { AtomicOwnedPtr::reclaim(old_raw) };
        self.release_writer_slot();
    }

    fn synchronize(&self, prior_epoch: u64) {
        let mut spins: u32 = 0;
        while self.counters.epoch_has_readers(prior_epoch) {
            spins = spins.wrapping_add(1);
            if spins % 64 == 0 {
                thread::yield_now();
            }
        }
    }

    fn acquire_writer_slot(&self) {
        let mut spins: u32 = 0;
        while self
            .writer_gate
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            spins = spins.wrapping_add(1);
            if spins % 64 == 0 {
                thread::yield_now();
            }
        }
    }

    fn release_writer_slot(&self) {
        self.writer_gate.store(0, Ordering::Release);
    }
}

/// Borrow of the value published when [`RcuDomain::read_lock`] was called.
/// Dropping the guard unregisters the reader.
pub struct ReadGuard<'a, T, C: EpochCounters> {
    domain: &'a RcuDomain<T, C>,
    tag: Option<ReaderTag>,
    value: &'a T,
}

impl<T, C: EpochCounters> Deref for ReadGuard<'_, T, C> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<T, C: EpochCounters> Drop for ReadGuard<'_, T, C> {
    fn drop(&mut self) {
        if let Some(tag) = self.tag.take() {
            self.domain.counters.exit(tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn read_sees_published_value() {
        let domain = RcuDomain::new(1u32);
        assert_eq!(*domain.read_lock(), 1);
        domain.replace(2);
        assert_eq!(*domain.read_lock(), 2);
    }

    #[test]
    fn writer_waits_for_in_flight_reader() {
        let domain = Arc::new(RcuDomain::new(String::from("old")));
        let reader_entered = Arc::new(AtomicBool::new(false));
        let writer_done = Arc::new(AtomicBool::new(false));

        let d1 = domain.clone();
        let entered1 = reader_entered.clone();
        let done1 = writer_done.clone();
        let reader = thread::spawn(move || {
            let guard = d1.read_lock();
            entered1.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            // The writer must not have completed reclamation while we're
            // still holding this guard, and the value we see must still be
            // the one we observed at entry.
            assert_eq!(&*guard, "old");
            assert!(!done1.load(Ordering::SeqCst));
            drop(guard);
        });

        while !reader_entered.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        domain.replace(String::from("new"));
        writer_done.store(true, Ordering::SeqCst);
        reader.join().unwrap();

        assert_eq!(*domain.read_lock(), "new");
    }
}

use std::cell::RefCell;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::warn;

/// Opaque token returned by [`EpochCounters::enter`], handed back to
/// [`EpochCounters::exit`]. Callers must not inspect it.
#[derive(Debug)]
pub enum ReaderTag {
    Ring(u64),
    Slot(u16),
    /// The slot bitmap was exhausted; this reader is tracked only
    /// approximately (see [`SlotCounters`]).
    Degraded,
}

/// A reader-presence tally addressed by epoch.
///
/// Two implementations are provided, matching spec: a small fixed ring of
/// per-epoch atomic counters (bounded epochs before wrap), and a
/// per-thread slot counter (strictly wait-free on the reader side, bounded
/// by a fixed slot capacity instead of by epoch count).
pub trait EpochCounters: Send + Sync {
    /// Register as a reader of `epoch`. O(1).
    fn enter(self: &Arc<Self>, epoch: u64) -> ReaderTag;

    /// Unregister a reader previously returned by `enter`. O(1).
    fn exit(&self, tag: ReaderTag);

    /// Does `epoch` still have at least one registered reader? O(buckets).
    fn epoch_has_readers(&self, epoch: u64) -> bool;
}

/// Compact ring of per-epoch atomic counters. `N` epochs may be in flight
/// concurrently before the ring wraps and reuses a bucket; callers must
/// ensure the writer does not advance the epoch by more than `N` while any
/// reader from the oldest in-flight epoch is still registered.
pub struct RingCounters<const N: usize = 256> {
    buckets: [AtomicU64; N],
}

impl<const N: usize> Default for RingCounters<N> {
    fn default() -> Self {
        Self {
            buckets: [0; N].map(AtomicU64::new),
        }
    }
}

impl<const N: usize> RingCounters<N> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<const N: usize> EpochCounters for RingCounters<N> {
    fn enter(self: &Arc<Self>, epoch: u64) -> ReaderTag {
        self.buckets[(epoch as usize) % N].fetch_add(1, Ordering::AcqRel);
        ReaderTag::Ring(epoch)
    }

    fn exit(&self, tag: ReaderTag) {
        match tag {
            ReaderTag::Ring(epoch) => {
                self.buckets[(epoch as usize) % N].fetch_sub(1, Ordering::AcqRel);
            }
            other => panic!("RingCounters::exit given foreign tag {other:?}"),
        }
    }

    fn epoch_has_readers(&self, epoch: u64) -> bool {
        self.buckets[(epoch as usize) % N].load(Ordering::Acquire) != 0
    }
}

/// Per-thread slot counters. Each thread that ever calls `enter` is handed
/// a unique 16-bit slot id out of a fixed-size bitmap (default 65536 bits);
/// the slot is released when the thread exits. Reads are strictly
/// wait-free: no CAS loop on the hot path once a slot is assigned.
///
/// Slot exhaustion is a logged soft failure, not a crash: further readers
/// on that thread are tracked only approximately (any approximate reader
/// makes `epoch_has_readers` return `true` unconditionally), which can
/// delay reclamation but never causes a writer to free a still-read
/// object.
pub struct SlotCounters {
    id: u64,
    capacity: usize,
    bitmap: Vec<AtomicU64>,
    epochs: Vec<AtomicI64>,
    degraded_active: AtomicI64,
}

const IDLE: i64 = -1;
const DEFAULT_SLOT_CAPACITY: usize = 65536;

struct SlotGuard {
    domain_id: u64,
    slot: u16,
    domain: Weak<SlotCounters>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(domain) = self.domain.upgrade() {
            domain.epochs[self.slot as usize].store(IDLE, Ordering::Release);
            domain.free_slot(self.slot);
        }
    }
}

thread_local! {
    static SLOT_GUARDS: RefCell<Vec<SlotGuard>> = RefCell::new(Vec::new());
}

static NEXT_DOMAIN_ID: AtomicU64 = AtomicU64::new(1);

impl SlotCounters {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_SLOT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        let words = (capacity + 63) / 64;
        Arc::new(Self {
            id: NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            bitmap: (0..words).map(|_| AtomicU64::new(0)).collect(),
            epochs: (0..capacity).map(|_| AtomicI64::new(IDLE)).collect(),
            degraded_active: AtomicI64::new(0),
        })
    }

    fn alloc_slot(&self) -> Option<u16> {
        for (word_idx, word) in self.bitmap.iter().enumerate() {
            loop {
                let current = word.load(Ordering::Relaxed);
                if current == u64::MAX {
                    break;
                }
                let free_bit = (!current).trailing_zeros();
                let candidate = word_idx * 64 + free_bit as usize;
                if candidate >= self.capacity {
                    break;
                }
                let mask = 1u64 << free_bit;
                if word.fetch_or(mask, Ordering::AcqRel) & mask == 0 {
                    return Some(candidate as u16);
                }
            }
        }
        None
    }

    fn free_slot(&self, slot: u16) {
        let word_idx = slot as usize / 64;
        let bit = slot as usize % 64;
        self.bitmap[word_idx].fetch_and(!(1u64 << bit), Ordering::AcqRel);
    }

    fn existing_slot(&self) -> Option<u16> {
        SLOT_GUARDS.with(|guards| {
            guards
                .borrow()
                .iter()
                .find(|g| g.domain_id == self.id)
                .map(|g| g.slot)
        })
    }
}

impl EpochCounters for SlotCounters {
    fn enter(self: &Arc<Self>, epoch: u64) -> ReaderTag {
        if let Some(slot) = self.existing_slot() {
            self.epochs[slot as usize].store(epoch as i64, Ordering::Release);
            return ReaderTag::Slot(slot);
        }
        if let Some(slot) = self.alloc_slot() {
            SLOT_GUARDS.with(|guards| {
                guards.borrow_mut().push(SlotGuard {
                    domain_id: self.id,
                    slot,
                    domain: Arc::downgrade(self),
                });
            });
            self.epochs[slot as usize].store(epoch as i64, Ordering::Release);
            return ReaderTag::Slot(slot);
        }
        warn!(
            "epoch slot bitmap exhausted (capacity {}); degrading to approximate reader tracking",
            self.capacity
        );
        self.degraded_active.fetch_add(1, Ordering::AcqRel);
        ReaderTag::Degraded
    }

    fn exit(&self, tag: ReaderTag) {
        match tag {
            ReaderTag::Slot(slot) => {
                self.epochs[slot as usize].store(IDLE, Ordering::Release);
            }
            ReaderTag::Degraded => {
                self.degraded_active.fetch_sub(1, Ordering::AcqRel);
            }
            ReaderTag::Ring(_) => panic!("SlotCounters::exit given a Ring tag"),
        }
    }

    fn epoch_has_readers(&self, epoch: u64) -> bool {
        if self.degraded_active.load(Ordering::Acquire) > 0 {
            return true;
        }
        let epoch = epoch as i64;
        self.epochs
            .iter()
            .any(|slot| slot.load(Ordering::Acquire) == epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_counters_track_presence() {
        let counters: Arc<RingCounters<8>> = Arc::new(RingCounters::new());
        assert!(!counters.epoch_has_readers(3));
        let tag = counters.enter(3);
        assert!(counters.epoch_has_readers(3));
        counters.exit(tag);
        assert!(!counters.epoch_has_readers(3));
    }

    #[test]
    fn slot_counters_track_presence_and_reuse() {
        let counters = SlotCounters::with_capacity(4);
        let tag = counters.enter(10);
        assert!(counters.epoch_has_readers(10));
        assert!(!counters.epoch_has_readers(11));
        counters.exit(tag);
        assert!(!counters.epoch_has_readers(10));

        let tag2 = counters.enter(11);
        assert!(counters.epoch_has_readers(11));
        counters.exit(tag2);
    }

    #[test]
    fn slot_counters_exhaustion_degrades_safely() {
        let counters = SlotCounters::with_capacity(1);
        let first = counters.enter(1);

        // Second thread can't get the one available slot; this thread's
        // second logical reader also can't, since the slot here is already
        // bound to this thread for epoch 1. Force a synthetic exhaustion by
        // allocating a capacity-1 domain from two threads.
        let domain = counters.clone();
        let handle = std::thread::spawn(move || {
            let tag = domain.enter(5);
            assert!(domain.epoch_has_readers(1) || domain.epoch_has_readers(5));
            domain.exit(tag);
        });
        handle.join().unwrap();
        counters.exit(first);
    }
}

//! Epoch-indexed reader counters and the atomic owned pointer cell.
//!
//! These are the two leaf primitives the RCU domain (`fusex-rcu`) is built
//! from. Nothing here blocks: readers register in O(1), writers query
//! reader presence in O(buckets).

mod counters;
mod owned_ptr;

pub use counters::{EpochCounters, ReaderTag, RingCounters, SlotCounters};
pub use owned_ptr::AtomicOwnedPtr;

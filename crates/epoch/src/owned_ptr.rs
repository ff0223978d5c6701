use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// A single-writer, many-reader publication cell for a heap object.
///
/// `read` is wait-free (one atomic load, acquire ordering). `write` is
/// lock-free (one atomic exchange, acq-rel ordering) and returns the
/// previous pointer rather than freeing it: the caller owns reclamation and
/// must not drop the returned value until it knows no reader still holds it
/// (typically by running it through an [`fusex_rcu`](../fusex_rcu) domain's
/// `synchronize`).
///
/// Move construction is the normal `AtomicOwnedPtr` -> `AtomicOwnedPtr` move
/// and is safe: it just relocates the cell, nothing is freed. Do not treat
/// plain assignment (`*cell = AtomicOwnedPtr::new(v)`) as a safe substitute
/// for `write`: assignment drops the left-hand side immediately, which is
/// only sound if no reader can still be observing the value it held.
pub struct AtomicOwnedPtr<T> {
    ptr: AtomicPtr<T>,
}

impl<T> AtomicOwnedPtr<T> {
    /// Publish a freshly boxed value.
    pub fn new(value: T) -> Self {
        Self {
            ptr: AtomicPtr::new(Box::into_raw(Box::new(value))),
        }
    }

    /// A cell with nothing published yet.
    pub fn null() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Wait-free read of the current raw pointer. May be null.
    pub fn load_raw(&self) -> *const T {
        self.ptr.load(Ordering::Acquire)
    }

    /// Wait-free read returning a borrowed reference, valid for as long as
    /// the caller can prove (via an enclosing RCU read-side critical
    /// section) that the pointed-to object has not been reclaimed.
    ///
    /// # Safety
    /// The caller must ensure no writer reclaims the object this call
    /// observes while the returned reference is alive.
    pub unsafe fn read<'a>(&self) -> Option<&'a T> {
        self.ptr.load(Ordering::Acquire).as_ref()
    }

    /// Lock-free publish of a new value. Returns the previous raw pointer
    /// (null if none was published) for the caller to reclaim once it is
    /// safe to do so. Never frees anything itself.
    #[must_use = "the previous pointer must be reclaimed by the caller at a safe point"]
    pub fn write(&self, new_value: T) -> *mut T {
        self.ptr
            .swap(Box::into_raw(Box::new(new_value)), Ordering::AcqRel)
    }

    /// Reclaim a pointer previously returned by [`write`](Self::write).
    ///
    /// # Safety
    /// `raw` must be null or a pointer previously returned by `write` on
    /// this same cell, and must not have been reclaimed already, and no
    /// reader may still be observing it.
    pub unsafe fn reclaim(raw: *mut T) {
        if !raw.is_null() {
            drop(Box::from_raw(raw));
        }
    }

    /// Publish into a cell that has never been read. Only safe before any
    /// reader has observed this cell — there is no prior value to race on.
    pub fn reset_from_null(&mut self, value: T) {
        debug_assert!(
            self.ptr.load(Ordering::Relaxed).is_null(),
            "reset_from_null called on a cell that already has a published value"
        );
        *self.ptr.get_mut() = Box::into_raw(Box::new(value));
    }
}

impl<T> Drop for AtomicOwnedPtr<T> {
    fn drop(&mut self) {
        let raw = *self.ptr.get_mut();
        if !raw.is_null() {
            unsafe { drop(Box::from_raw(raw)) };
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for AtomicOwnedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match unsafe { self.read() } {
            Some(v) => f.debug_tuple("AtomicOwnedPtr").field(v).finish(),
            None => f.write_str("AtomicOwnedPtr(null)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_after_new() {
        let cell = AtomicOwnedPtr::new(42u32);
        assert_eq!(unsafe { cell.read() }, Some(&42));
    }

    #[test]
    fn write_returns_previous_and_publishes_new() {
        let cell = AtomicOwnedPtr::new(1u32);
        let prev = cell.write(2);
        assert_eq!(unsafe { cell.read() }, Some(&2));
        assert_eq!(unsafe { *prev }, 1);
        unsafe { AtomicOwnedPtr::reclaim(prev) };
    }

    #[test]
    fn null_cell_reads_none() {
        let cell: AtomicOwnedPtr<u32> = AtomicOwnedPtr::null();
        assert_eq!(unsafe { cell.read() }, None);
    }

    #[test]
    fn reset_from_null_publishes() {
        let mut cell: AtomicOwnedPtr<u32> = AtomicOwnedPtr::null();
        cell.reset_from_null(7);
        assert_eq!(unsafe { cell.read() }, Some(&7));
    }
}

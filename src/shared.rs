//! Reference counting for shared backing buffers.
//!
//! Every backing buffer owned by this crate is described by exactly one
//! [`SharedInfo`] record: a release callback, an opaque argument for it, and
//! an atomic reference count. Descriptors that view the buffer each hold one
//! reference; the handle that drops the count to zero runs the release
//! callback, from whatever thread it happens to be on.
//!
//! Where the record itself lives depends on the buffer's provenance. For
//! buffers allocated by this crate it is embedded in the same allocation as
//! the bytes (see [`crate::storage`]); for buffers transferred in from the
//! caller it is a separate allocation, freed by the last releaser.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr;

use crate::error::{ChainBufError, Result};
use crate::loom::sync::atomic::{fence, AtomicU32, Ordering};

/// Release callback invoked exactly once per backing buffer.
///
/// Called with the buffer pointer and the opaque `user_data` supplied at
/// creation, on the thread that drops the last reference to the buffer. The
/// callback must free (or otherwise dispose of) the buffer and must not
/// panic; a panicking release callback is a fatal caller bug.
///
/// # Safety
///
/// Implementations are called with the exact pointer pair registered at
/// creation and may rely on that. They must not touch the buffer after
/// freeing it.
pub type FreeFn = unsafe fn(buffer: *mut u8, user_data: *mut ());

/// Shared bookkeeping for one backing buffer.
///
/// The refcount starts at 1 for the creating descriptor. Clones increment it
/// with relaxed ordering (the cloning thread already holds a reference, which
/// establishes the happens-before for the bytes); drops decrement with
/// release ordering so the freeing thread observes all prior writes.
pub(crate) struct SharedInfo {
    pub(crate) free_fn: FreeFn,
    pub(crate) user_data: *mut (),
    pub(crate) refcount: AtomicU32,
}

impl SharedInfo {
    pub(crate) fn new(free_fn: FreeFn, user_data: *mut ()) -> Self {
        Self {
            free_fn,
            user_data,
            refcount: AtomicU32::new(1),
        }
    }
}

/// Allocates a standalone `SharedInfo` for a caller-transferred buffer.
///
/// Goes through `std::alloc` directly so that allocation failure surfaces as
/// [`ChainBufError::AllocationFailed`] instead of aborting; the caller decides
/// whether the transferred buffer is released on that path.
pub(crate) fn alloc_info(free_fn: FreeFn, user_data: *mut ()) -> Result<*mut SharedInfo> {
    let layout = Layout::new::<SharedInfo>();
    // SAFETY: the layout is non-zero-sized and correctly aligned for
    // SharedInfo; a null return is handled as allocation failure.
    unsafe {
        let raw = alloc(layout) as *mut SharedInfo;
        if raw.is_null() {
            return Err(ChainBufError::AllocationFailed {
                bytes: layout.size(),
            });
        }
        ptr::write(raw, SharedInfo::new(free_fn, user_data));
        Ok(raw)
    }
}

/// Adds one reference for a new descriptor viewing the buffer.
///
/// # Safety
///
/// `info` must point to a live `SharedInfo` and the caller must already hold
/// a reference (that existing reference is what makes relaxed ordering
/// sufficient here).
pub(crate) unsafe fn acquire(info: *mut SharedInfo) {
    // SAFETY: caller guarantees info is live.
    unsafe { (*info).refcount.fetch_add(1, Ordering::Relaxed) };
}

/// Drops one reference; the 1 -> 0 transition releases the buffer.
///
/// `free_info` indicates the record was allocated by [`alloc_info`] and must
/// be deallocated once the buffer is released. The acquire fence pairs with
/// the release decrement of every other former holder, so the release
/// callback observes their writes to the bytes.
///
/// # Safety
///
/// `info` must point to a live `SharedInfo` the caller holds a reference to,
/// and `buf` must be the buffer pointer registered with it. After this call
/// the caller must not touch `info` or the buffer again.
pub(crate) unsafe fn release(info: *mut SharedInfo, free_info: bool, buf: *mut u8) {
    // SAFETY: caller guarantees info is live and holds a reference.
    unsafe {
        if (*info).refcount.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        fence(Ordering::Acquire);

        // Copy the release recipe out before the record itself can go away:
        // for crate-allocated buffers the record lives inside the block the
        // callback is about to free.
        let free_fn = (*info).free_fn;
        let user_data = (*info).user_data;
        if free_info {
            ptr::drop_in_place(info);
            dealloc(info as *mut u8, Layout::new::<SharedInfo>());
        }
        free_fn(buf, user_data);
    }
}

/// Acquire-ordered snapshot of the reference count.
///
/// # Safety
///
/// `info` must point to a live `SharedInfo` the caller holds a reference to.
pub(crate) unsafe fn refcount(info: *const SharedInfo) -> u32 {
    // SAFETY: caller guarantees info is live.
    unsafe { (*info).refcount.load(Ordering::Acquire) }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};

    static RELEASES: AtomicUsize = AtomicUsize::new(0);

    unsafe fn counting_free(_buf: *mut u8, _user_data: *mut ()) {
        RELEASES.fetch_add(1, StdOrdering::SeqCst);
    }

    #[test]
    fn last_release_runs_free_fn_once() {
        RELEASES.store(0, StdOrdering::SeqCst);
        let info = alloc_info(counting_free, std::ptr::null_mut()).unwrap();

        unsafe {
            acquire(info);
            acquire(info);
            assert_eq!(refcount(info), 3);

            release(info, true, std::ptr::null_mut());
            release(info, true, std::ptr::null_mut());
            assert_eq!(RELEASES.load(StdOrdering::SeqCst), 0);

            release(info, true, std::ptr::null_mut());
        }
        assert_eq!(RELEASES.load(StdOrdering::SeqCst), 1);
    }

    #[test]
    fn free_fn_receives_registered_pointers() {
        static SEEN: AtomicUsize = AtomicUsize::new(0);

        unsafe fn checking_free(buf: *mut u8, user_data: *mut ()) {
            SEEN.store(buf as usize + user_data as usize, StdOrdering::SeqCst);
        }

        let info = alloc_info(checking_free, 0x30 as *mut ()).unwrap();
        unsafe { release(info, true, 0x10 as *mut u8) };
        assert_eq!(SEEN.load(StdOrdering::SeqCst), 0x40);
    }
}

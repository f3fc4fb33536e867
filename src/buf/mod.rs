//! Buffer descriptors and the owning chain handle.
//!
//! A [`ChainBuf`] is a pointer to a buffer of data. It is designed for
//! networking code that wants to pass, slice, share, and reassemble payloads
//! without copying bytes: several descriptors can view the same backing
//! buffer (tracked by a reference count), and several buffers can be linked
//! into one logical byte stream (a circular chain of descriptors).
//!
//! # Data Layout
//!
//! Each descriptor views one contiguous backing buffer and tracks which part
//! of it currently holds valid data:
//!
//! ```text
//!  +-------------+---------------------+--------------+
//!  |  headroom   |        data         |   tailroom   |
//!  +-------------+---------------------+--------------+
//!  ^             ^                     ^              ^
//!  buffer()    data()               tail()      buffer_end()
//! ```
//!
//! `len()` is the valid-data length and `capacity()` the whole buffer span.
//! Window operations ([`prepend`](ChainBuf::prepend), [`append`](ChainBuf::append),
//! [`trim_start`](ChainBuf::trim_start), [`trim_end`](ChainBuf::trim_end))
//! move these boundaries without touching bytes.
//!
//! # Sharing
//!
//! [`clone_one`](ChainBuf::clone_one) produces a second descriptor over the
//! same backing buffer in O(1). Reading through either handle is always safe;
//! before writing, call [`unshare_one`](ChainBuf::unshare_one) (or
//! [`unshare`](ChainBuf::unshare) for a whole chain) so the writer holds a
//! private copy. Buffers wrapped from caller-owned memory are treated as
//! permanently shared.
//!
//! # Chains and Ownership
//!
//! Chains are circular and have no sentinel: any descriptor can serve as the
//! head, and the head owns every other descriptor in the ring. That ownership
//! is expressed by the handle type itself. `ChainBuf` is move-only, exactly
//! one handle exists per chain, and dropping it tears down the whole ring and
//! releases every buffer reference. Splicing one chain into another consumes
//! the donor handle at the type level, so ownership transfer is visible in
//! every signature.
//!
//! A single descriptor (and by extension a chain) must only be used from one
//! thread at a time; there is no internal locking. Two handles over the same
//! backing buffer may live on different threads, because the reference count
//! is the only state they share and it is atomic.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use crate::error::{ChainBufError, Result};
use crate::shared::{self, FreeFn, SharedInfo};
use crate::storage::{self, CombinedBlock, SeparateBlock};

mod chain;
mod cow;
mod iter;


pub use iter::ChainIter;

/// Descriptor flag bits. `MAYBE_SHARED` is a fast-path hint: while it is
/// clear the refcount is known to be 1 and the atomic load can be skipped.
mod flags {
    pub(super) const USER_OWNED: u32 = 0x1;
    pub(super) const FREE_SHARED_INFO: u32 = 0x2;
    pub(super) const MAYBE_SHARED: u32 = 0x4;
}

/// Provenance of a descriptor's current backing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StorageKind {
    /// Allocated by this crate in a separate block.
    Allocated,
    /// Transferred in by the caller together with a release callback.
    UserSupplied,
    /// Caller-owned memory this crate never frees.
    UserOwned,
    /// Allocated by this crate in a combined descriptor+buffer block.
    Combined,
}

/// One node of a buffer chain.
///
/// Nodes are never exposed directly; the public surface is the owning
/// [`ChainBuf`] handle plus borrowed views derived from it. The ring links
/// are never null: a solitary node points at itself.
pub(crate) struct Node {
    next: NonNull<Node>,
    prev: NonNull<Node>,
    data: *mut u8,
    buf: *mut u8,
    length: u32,
    capacity: u32,
    // Interior mutability so the shared-state hint can self-correct from
    // read-only observers. Nodes are single-threaded, so a plain Cell is
    // enough.
    flags: Cell<u32>,
    kind: StorageKind,
    // Null for caller-owned (wrapped) buffers, live otherwise.
    shared: *mut SharedInfo,
    // Non-null when this descriptor's own memory lives inside a combined
    // block; the block must outlive the descriptor.
    combined: *mut CombinedBlock,
}

impl Node {
    fn headroom(&self) -> u32 {
        // data never precedes buf; both point into the same backing buffer.
        (self.data as usize - self.buf as usize) as u32
    }

    fn tailroom(&self) -> u32 {
        self.capacity - self.headroom() - self.length
    }

    fn has_flag(&self, bit: u32) -> bool {
        self.flags.get() & bit != 0
    }

    fn set_flag(&self, bit: u32) {
        self.flags.set(self.flags.get() | bit);
    }

    fn clear_flag(&self, bit: u32) {
        self.flags.set(self.flags.get() & !bit);
    }

    /// Shared-state check for this node only, with the `MAYBE_SHARED` fast
    /// path: a clear hint answers without touching the atomic, a stale hint
    /// is repaired after one acquire load that observes a count of 1.
    fn is_shared_one(&self) -> bool {
        let flag_bits = self.flags.get();
        if flag_bits & (flags::USER_OWNED | flags::MAYBE_SHARED) == 0 {
            return false;
        }
        if flag_bits & flags::USER_OWNED != 0 {
            return true;
        }
        // SAFETY: nodes without USER_OWNED always carry a live SharedInfo.
        let shared = unsafe { shared::refcount(self.shared) } > 1;
        if !shared {
            // We are the last holder; drop the hint so the next check is
            // a plain flag test.
            self.clear_flag(flags::MAYBE_SHARED);
        }
        shared
    }
}

/// Allocates a solitary heap node.
fn new_node(
    buf: *mut u8,
    capacity: u32,
    data: *mut u8,
    length: u32,
    flag_bits: u32,
    kind: StorageKind,
    shared: *mut SharedInfo,
) -> NonNull<Node> {
    let node = Box::new(Node {
        next: NonNull::dangling(),
        prev: NonNull::dangling(),
        data,
        buf,
        length,
        capacity,
        flags: Cell::new(flag_bits),
        kind,
        shared,
        combined: ptr::null_mut(),
    });
    let ptr = NonNull::from(Box::leak(node));
    // SAFETY: ptr was just leaked from a live Box; make the node solitary.
    unsafe {
        (*ptr.as_ptr()).next = ptr;
        (*ptr.as_ptr()).prev = ptr;
    }
    ptr
}

/// Releases this node's reference on its backing buffer, if it holds one.
///
/// # Safety
///
/// `node` must be live and must not be used to reach the backing buffer
/// afterwards.
pub(crate) unsafe fn release_backing(node: *mut Node) {
    // SAFETY: caller guarantees the node is live.
    unsafe {
        let flag_bits = (*node).flags.get();
        if flag_bits & flags::USER_OWNED != 0 {
            return;
        }
        shared::release(
            (*node).shared,
            flag_bits & flags::FREE_SHARED_INFO != 0,
            (*node).buf,
        );
    }
}

/// Destroys one detached node: backing reference first, then the descriptor
/// memory itself (heap box, or the descriptor slot of a combined block).
///
/// # Safety
///
/// The caller must own `node`, and no other pointer to it may be used again.
/// The node's former neighbors must already be relinked.
pub(crate) unsafe fn destroy_node(node: NonNull<Node>) {
    // SAFETY: caller owns the node.
    unsafe {
        release_backing(node.as_ptr());
        let combined = (*node.as_ptr()).combined;
        if combined.is_null() {
            drop(Box::from_raw(node.as_ptr()));
        } else {
            // The descriptor slot keeps the combined block alive; dropping
            // that reference may free the block if the backing is gone too.
            storage::release_block(combined);
        }
    }
}

/// Points a node at freshly allocated private storage, releasing whatever
/// backing it held before. Clears the sharing-related flags: the new block's
/// refcount is 1 and owned by this node alone.
///
/// The caller must have copied any bytes it wants to keep into `block`
/// before calling; the old backing may be freed here.
///
/// # Safety
///
/// `node` must be live and `block` freshly allocated and unaliased.
/// `data_offset + length` must not exceed the block capacity.
pub(crate) unsafe fn retarget(
    node: *mut Node,
    block: SeparateBlock,
    data_offset: usize,
    length: u32,
) {
    // SAFETY: caller guarantees node liveness and block bounds.
    unsafe {
        release_backing(node);
        (*node).buf = block.buf;
        (*node).capacity = block.capacity;
        (*node).shared = block.info;
        (*node).kind = StorageKind::Allocated;
        (*node).data = block.buf.add(data_offset);
        (*node).length = length;
        let flag_bits = (*node).flags.get();
        (*node).flags.set(
            flag_bits & !(flags::USER_OWNED | flags::FREE_SHARED_INFO | flags::MAYBE_SHARED),
        );
    }
}

/// Owning handle to a chain of buffer descriptors.
///
/// The handle is move-only: there is exactly one per chain, it cannot be
/// copied or cloned implicitly, and dropping it destroys every descriptor in
/// the ring and releases their buffer references. Operations that report on
/// or reshape "this buffer" act on the chain's head node; chain-wide
/// operations walk the ring from there.
///
/// Created by the factory constructors ([`with_capacity`](Self::with_capacity),
/// [`copy_buffer`](Self::copy_buffer), [`take_ownership`](Self::take_ownership)
/// and friends), each of which picks a backing-store provenance.
pub struct ChainBuf {
    ptr: NonNull<Node>,
    // The handle logically owns its nodes and their backing references.
    _marker: PhantomData<Node>,
}

// SAFETY: a ChainBuf uniquely owns its ring; moving it between threads moves
// the only path to those nodes. The one piece of state reachable from two
// threads at once, the backing refcount, is atomic. The handle is
// deliberately not Sync: observers repair the shared-state hint through a
// plain Cell.
unsafe impl Send for ChainBuf {}

impl ChainBuf {
    pub(crate) fn from_node(ptr: NonNull<Node>) -> Self {
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    pub(crate) fn raw(&self) -> NonNull<Node> {
        self.ptr
    }

    fn node(&self) -> &Node {
        // SAFETY: the handle keeps its head node alive.
        unsafe { self.ptr.as_ref() }
    }

    // ---------------------------------------------------------------------
    // Factories
    // ---------------------------------------------------------------------

    /// Allocates a new buffer with at least the requested capacity.
    ///
    /// The data pointer starts at the beginning of the buffer with a length
    /// of zero. The actual capacity may exceed the request because block
    /// sizes are rounded to allocator-friendly classes.
    ///
    /// # Errors
    ///
    /// Returns [`ChainBufError::AllocationFailed`] if the allocator refuses
    /// the block.
    ///
    /// # Example
    ///
    /// ```
    /// use chainbuf::ChainBuf;
    ///
    /// let buf = ChainBuf::with_capacity(1024)?;
    /// assert!(buf.capacity() >= 1024);
    /// assert_eq!(buf.len(), 0);
    /// # Ok::<(), chainbuf::ChainBufError>(())
    /// ```
    pub fn with_capacity(capacity: u32) -> Result<Self> {
        let block = storage::allocate_separate(capacity)?;
        let ptr = new_node(
            block.buf,
            block.capacity,
            block.buf,
            0,
            0,
            StorageKind::Allocated,
            block.info,
        );
        Ok(Self::from_node(ptr))
    }

    /// Allocates a new buffer using a single allocation for the descriptor,
    /// the shared-ownership bookkeeping, and the bytes.
    ///
    /// This saves one allocation compared to [`with_capacity`](Self::with_capacity)
    /// when the descriptor and the buffer have similar lifetimes. The
    /// trade-off: if the descriptor is later retargeted onto a bigger buffer
    /// (by `reserve`, `unshare`, or `coalesce`), the combined block is not
    /// returned to the allocator until the descriptor itself is destroyed.
    pub fn with_capacity_combined(capacity: u32) -> Result<Self> {
        let alloc = storage::allocate_combined(capacity)?;
        // SAFETY: node_slot is the uninitialized descriptor slot of a block
        // we just allocated; writing the node and self-linking it makes the
        // slot a valid solitary node.
        unsafe {
            ptr::write(
                alloc.node_slot,
                Node {
                    next: NonNull::dangling(),
                    prev: NonNull::dangling(),
                    data: alloc.buf,
                    buf: alloc.buf,
                    length: 0,
                    capacity: alloc.capacity,
                    flags: Cell::new(0),
                    kind: StorageKind::Combined,
                    shared: alloc.info,
                    combined: alloc.block,
                },
            );
            let ptr = NonNull::new_unchecked(alloc.node_slot);
            (*ptr.as_ptr()).next = ptr;
            (*ptr.as_ptr()).prev = ptr;
            Ok(Self::from_node(ptr))
        }
    }

    /// Allocates a chain of buffers jointly covering `total_capacity` bytes,
    /// with no single buffer larger than `max_buf_capacity`.
    ///
    /// # Panics
    ///
    /// Panics if `max_buf_capacity` is zero.
    pub fn with_capacity_chained(total_capacity: u64, max_buf_capacity: u32) -> Result<Self> {
        assert!(max_buf_capacity > 0, "max_buf_capacity must be non-zero");
        let first = total_capacity.min(max_buf_capacity as u64) as u32;
        let mut head = Self::with_capacity(first)?;
        let mut remaining = total_capacity.saturating_sub(head.capacity() as u64);
        while remaining > 0 {
            let link = Self::with_capacity(remaining.min(max_buf_capacity as u64) as u32)?;
            remaining = remaining.saturating_sub(link.capacity() as u64);
            // Prepending before the head of a circular chain appends at the
            // tail.
            head.prepend_chain(link);
        }
        Ok(head)
    }

    /// Takes ownership of an existing buffer, freeing it through `free_fn`
    /// when the last reference is dropped.
    ///
    /// `free_fn` is invoked exactly once, with `buf` and `user_data`, on the
    /// thread that drops the last reference. The data pointer starts at the
    /// beginning of the buffer and the first `length` bytes are considered
    /// valid.
    ///
    /// If the bookkeeping allocation fails and `free_on_error` is true (the
    /// usual choice), the buffer is released through `free_fn` before the
    /// error is returned; pass false to keep disposal with the caller.
    ///
    /// # Safety
    ///
    /// `buf` must point to `capacity` readable, writable bytes that stay
    /// valid until `free_fn` runs, and `length <= capacity`. `free_fn` must
    /// be safe to call with exactly this pointer pair, from any thread.
    pub unsafe fn take_ownership(
        buf: *mut u8,
        capacity: u32,
        length: u32,
        free_fn: FreeFn,
        user_data: *mut (),
        free_on_error: bool,
    ) -> Result<Self> {
        debug_assert!(length <= capacity);
        let info = match shared::alloc_info(free_fn, user_data) {
            Ok(info) => info,
            Err(err) => {
                if free_on_error {
                    // SAFETY: per this function's contract.
                    unsafe { free_fn(buf, user_data) };
                }
                return Err(err);
            }
        };
        let ptr = new_node(
            buf,
            capacity,
            buf,
            length,
            flags::FREE_SHARED_INFO,
            StorageKind::UserSupplied,
            info,
        );
        Ok(Self::from_node(ptr))
    }

    /// Takes ownership of a whole container, using its destructor as the
    /// release path.
    ///
    /// The container is boxed and kept alive until the last reference to the
    /// buffer is dropped, at which point it is dropped on that thread (hence
    /// the `Send` bound). The full byte range is considered valid data.
    ///
    /// # Panics
    ///
    /// Panics if the container holds more than `u32::MAX` bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use chainbuf::ChainBuf;
    ///
    /// let buf = ChainBuf::from_owner(vec![1u8, 2, 3])?;
    /// assert_eq!(buf.as_slice(), &[1, 2, 3]);
    /// # Ok::<(), chainbuf::ChainBufError>(())
    /// ```
    pub fn from_owner<T>(owner: T) -> Result<Self>
    where
        T: AsRef<[u8]> + Send + 'static,
    {
        let boxed = Box::into_raw(Box::new(owner));
        // SAFETY: boxed is live; the slice is derived after the move into
        // the box, so the pointer is stable for the box's lifetime.
        let slice = unsafe { (*boxed).as_ref() };
        assert!(
            slice.len() <= u32::MAX as usize,
            "owner larger than the 32-bit capacity limit"
        );
        let buf = slice.as_ptr() as *mut u8;
        let capacity = slice.len() as u32;

        let info = match shared::alloc_info(drop_owner::<T>, boxed as *mut ()) {
            Ok(info) => info,
            Err(err) => {
                // SAFETY: boxed came from Box::into_raw above and has not
                // been freed.
                drop(unsafe { Box::from_raw(boxed) });
                return Err(err);
            }
        };
        let ptr = new_node(
            buf,
            capacity,
            buf,
            capacity,
            flags::FREE_SHARED_INFO,
            StorageKind::UserSupplied,
            info,
        );
        Ok(Self::from_node(ptr))
    }

    /// Wraps an existing caller-owned buffer without taking ownership.
    ///
    /// The buffer is never freed by this crate; the caller must keep it
    /// alive for as long as any descriptor (including clones) points at it.
    /// Wrapped buffers always report as shared, so writers are forced
    /// through [`unshare_one`](Self::unshare_one), which copies the bytes
    /// into private storage. The full byte range is considered valid data.
    ///
    /// # Safety
    ///
    /// `buf` must point to `capacity` readable bytes that outlive every
    /// descriptor referencing them.
    pub unsafe fn wrap_buffer(buf: *const u8, capacity: u32) -> Self {
        let ptr = new_node(
            buf as *mut u8,
            capacity,
            buf as *mut u8,
            capacity,
            flags::USER_OWNED,
            StorageKind::UserOwned,
            ptr::null_mut(),
        );
        Self::from_node(ptr)
    }

    /// Wraps constant data. Safe specialization of
    /// [`wrap_buffer`](Self::wrap_buffer) for `'static` slices.
    ///
    /// # Panics
    ///
    /// Panics if the slice is longer than `u32::MAX` bytes.
    pub fn from_static(data: &'static [u8]) -> Self {
        assert!(
            data.len() <= u32::MAX as usize,
            "slice larger than the 32-bit capacity limit"
        );
        // SAFETY: 'static data outlives every descriptor.
        unsafe { Self::wrap_buffer(data.as_ptr(), data.len() as u32) }
    }

    /// Allocates a new buffer and copies `data` into it, leaving the
    /// requested headroom before the bytes and at least `min_tailroom`
    /// after them.
    ///
    /// # Errors
    ///
    /// Returns [`ChainBufError::Overflow`] when headroom, data, and tailroom
    /// together exceed the 32-bit capacity limit, and
    /// [`ChainBufError::AllocationFailed`] when the allocator refuses.
    pub fn copy_buffer(data: &[u8], headroom: u32, min_tailroom: u32) -> Result<Self> {
        let total = headroom as u64 + data.len() as u64 + min_tailroom as u64;
        if total > u32::MAX as u64 {
            return Err(ChainBufError::Overflow { total });
        }
        let mut buf = Self::with_capacity(total as u32)?;
        buf.advance(headroom);
        buf.writable_tail()[..data.len()].copy_from_slice(data);
        buf.append(data.len() as u32);
        Ok(buf)
    }

    /// Allocates a new buffer holding a copy of `data`, with no extra
    /// headroom requested.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Self::copy_buffer(data, 0, 0)
    }

    // ---------------------------------------------------------------------
    // Observers
    // ---------------------------------------------------------------------

    /// Pointer to the start of the valid data.
    #[inline]
    pub fn data(&self) -> *const u8 {
        self.node().data
    }

    /// Pointer one past the end of the valid data.
    #[inline]
    pub fn tail(&self) -> *const u8 {
        let node = self.node();
        // SAFETY: data + length stays inside the backing buffer.
        unsafe { node.data.add(node.length as usize) }
    }

    /// Pointer to the start of the backing buffer.
    #[inline]
    pub fn buffer(&self) -> *const u8 {
        self.node().buf
    }

    /// Pointer one past the end of the backing buffer.
    #[inline]
    pub fn buffer_end(&self) -> *const u8 {
        let node = self.node();
        // SAFETY: buf + capacity is the allocated buffer end.
        unsafe { node.buf.add(node.capacity as usize) }
    }

    /// Length of the valid data in this descriptor, in bytes.
    ///
    /// Only this descriptor; use [`total_length`](Self::total_length) for
    /// the whole chain. Widths are `u32` throughout, matching the capacity
    /// limit of the format.
    #[inline]
    pub fn len(&self) -> u32 {
        self.node().length
    }

    /// Total usable size of the backing buffer, in bytes.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.node().capacity
    }

    /// Unused capacity before the valid data.
    #[inline]
    pub fn headroom(&self) -> u32 {
        self.node().headroom()
    }

    /// Unused capacity after the valid data.
    #[inline]
    pub fn tailroom(&self) -> u32 {
        self.node().tailroom()
    }

    /// The valid data as a read-only slice.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        let node = self.node();
        // SAFETY: data..data+length is initialized and stays borrowed for
        // &self.
        unsafe { std::slice::from_raw_parts(node.data, node.length as usize) }
    }

    /// The valid data as a mutable slice.
    ///
    /// The caller is responsible for calling [`unshare`](Self::unshare)
    /// first when the buffer might be shared, so writes cannot be observed
    /// through other descriptors.
    #[inline]
    pub fn writable_data(&mut self) -> &mut [u8] {
        let node = self.node();
        // SAFETY: data..data+length is initialized; &mut self gives
        // exclusive access through this handle.
        unsafe { std::slice::from_raw_parts_mut(node.data, node.length as usize) }
    }

    /// The tailroom as a mutable slice, for writing new data before
    /// [`append`](Self::append) makes it valid.
    ///
    /// Buffers allocated by this crate are zero-initialized, so the slice is
    /// fully readable as well. The caller is responsible for calling
    /// [`unshare`](Self::unshare) first when the buffer might be shared.
    #[inline]
    pub fn writable_tail(&mut self) -> &mut [u8] {
        let node = self.node();
        let tailroom = node.tailroom() as usize;
        // SAFETY: tail..buffer_end is inside the zero-initialized backing
        // buffer; &mut self gives exclusive access through this handle.
        unsafe {
            std::slice::from_raw_parts_mut(node.data.add(node.length as usize), tailroom)
        }
    }

    // ---------------------------------------------------------------------
    // Window manipulation
    // ---------------------------------------------------------------------

    /// Grows the valid data backwards into the headroom by `amount` bytes.
    ///
    /// The bytes themselves are not modified; the caller fills them in. The
    /// caller must ensure `amount <= headroom()` (debug-asserted).
    #[inline]
    pub fn prepend(&mut self, amount: u32) {
        debug_assert!(amount <= self.headroom());
        let node = self.ptr.as_ptr();
        // SAFETY: stays inside the backing buffer per the precondition.
        unsafe {
            (*node).data = (*node).data.sub(amount as usize);
            (*node).length += amount;
        }
    }

    /// Grows the valid data forwards into the tailroom by `amount` bytes.
    ///
    /// The bytes themselves are not modified; the caller fills them in (see
    /// [`writable_tail`](Self::writable_tail)). The caller must ensure
    /// `amount <= tailroom()` (debug-asserted).
    #[inline]
    pub fn append(&mut self, amount: u32) {
        debug_assert!(amount <= self.tailroom());
        let node = self.ptr.as_ptr();
        // SAFETY: stays inside the backing buffer per the precondition.
        unsafe {
            (*node).length += amount;
        }
    }

    /// Drops the first `amount` bytes from the valid data.
    ///
    /// The caller must ensure `amount <= len()` (debug-asserted).
    #[inline]
    pub fn trim_start(&mut self, amount: u32) {
        debug_assert!(amount <= self.len());
        let node = self.ptr.as_ptr();
        // SAFETY: stays inside the valid window per the precondition.
        unsafe {
            (*node).data = (*node).data.add(amount as usize);
            (*node).length -= amount;
        }
    }

    /// Drops the last `amount` bytes from the valid data.
    ///
    /// The caller must ensure `amount <= len()` (debug-asserted).
    #[inline]
    pub fn trim_end(&mut self, amount: u32) {
        debug_assert!(amount <= self.len());
        let node = self.ptr.as_ptr();
        // SAFETY: length shrinks, window stays valid.
        unsafe {
            (*node).length -= amount;
        }
    }

    /// Empties the valid-data window and rewinds it to the buffer start.
    ///
    /// Postcondition: `headroom() == 0`, `len() == 0`,
    /// `tailroom() == capacity()`.
    #[inline]
    pub fn clear(&mut self) {
        let node = self.ptr.as_ptr();
        // SAFETY: buf is the buffer start.
        unsafe {
            (*node).data = (*node).buf;
            (*node).length = 0;
        }
    }

    /// Shifts the data window forwards by `amount` bytes, increasing the
    /// headroom at the expense of tailroom.
    ///
    /// If the descriptor holds data, the bytes are moved (the regions may
    /// overlap). The caller must ensure `amount <= tailroom()` and that the
    /// buffer is not shared; both are debug-asserted only, matching the
    /// window-operation contract.
    pub fn advance(&mut self, amount: u32) {
        debug_assert!(amount <= self.tailroom());
        debug_assert!(!self.is_shared_one(), "advance on a shared buffer");
        let node = self.ptr.as_ptr();
        // SAFETY: source and destination stay inside the backing buffer;
        // ptr::copy handles the overlap.
        unsafe {
            if (*node).length > 0 {
                ptr::copy(
                    (*node).data,
                    (*node).data.add(amount as usize),
                    (*node).length as usize,
                );
            }
            (*node).data = (*node).data.add(amount as usize);
        }
    }

    /// Shifts the data window backwards by `amount` bytes, increasing the
    /// tailroom at the expense of headroom.
    ///
    /// Mirror image of [`advance`](Self::advance); the same contracts apply
    /// with `amount <= headroom()`.
    pub fn retreat(&mut self, amount: u32) {
        debug_assert!(amount <= self.headroom());
        debug_assert!(!self.is_shared_one(), "retreat on a shared buffer");
        let node = self.ptr.as_ptr();
        // SAFETY: source and destination stay inside the backing buffer;
        // ptr::copy handles the overlap.
        unsafe {
            if (*node).length > 0 {
                ptr::copy(
                    (*node).data,
                    (*node).data.sub(amount as usize),
                    (*node).length as usize,
                );
            }
            (*node).data = (*node).data.sub(amount as usize);
        }
    }

    /// Ensures at least `min_headroom` bytes before the data and
    /// `min_tailroom` after it, preserving the data bytes.
    ///
    /// Fast paths: nothing to do when both already hold; an empty descriptor
    /// with enough total room just repositions its window. Otherwise the
    /// data is copied into a freshly allocated private buffer and the old
    /// backing reference is released.
    ///
    /// # Errors
    ///
    /// [`ChainBufError::Overflow`] when the request exceeds the 32-bit
    /// capacity limit, [`ChainBufError::AllocationFailed`] when the
    /// allocator refuses. The descriptor is unchanged on error.
    pub fn reserve(&mut self, min_headroom: u32, min_tailroom: u32) -> Result<()> {
        if self.headroom() >= min_headroom && self.tailroom() >= min_tailroom {
            return Ok(());
        }
        if self.len() == 0
            && self.headroom() as u64 + self.tailroom() as u64
                >= min_headroom as u64 + min_tailroom as u64
        {
            let node = self.ptr.as_ptr();
            // SAFETY: the combined room check keeps the window in bounds.
            unsafe {
                (*node).data = (*node).buf.add(min_headroom as usize);
            }
            return Ok(());
        }
        self.reserve_slow(min_headroom, min_tailroom)
    }

    fn reserve_slow(&mut self, min_headroom: u32, min_tailroom: u32) -> Result<()> {
        let length = self.len();
        let total = min_headroom as u64 + length as u64 + min_tailroom as u64;
        if total > u32::MAX as u64 {
            return Err(ChainBufError::Overflow { total });
        }
        let block = storage::allocate_separate(total as u32)?;
        // SAFETY: the new block has room for the data at min_headroom; the
        // old backing is only released after the copy.
        unsafe {
            let node = self.ptr.as_ptr();
            ptr::copy_nonoverlapping(
                (*node).data,
                block.buf.add(min_headroom as usize),
                length as usize,
            );
            retarget(node, block, min_headroom as usize, length);
        }
        Ok(())
    }
}

impl fmt::Debug for ChainBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainBuf")
            .field("segments", &self.count_elements())
            .field("total_length", &self.total_length())
            .field("headroom", &self.headroom())
            .field("length", &self.len())
            .field("tailroom", &self.tailroom())
            .field("shared", &self.is_shared_one())
            .finish()
    }
}

impl Drop for ChainBuf {
    /// Destroys the whole ring. The walk is iterative so arbitrarily long
    /// chains cannot exhaust the stack.
    fn drop(&mut self) {
        // SAFETY: the handle owns every node in the ring; each node is
        // destroyed exactly once and never revisited.
        unsafe {
            let head = self.ptr;
            let mut cursor = (*head.as_ptr()).next;
            while cursor != head {
                let next = (*cursor.as_ptr()).next;
                destroy_node(cursor);
                cursor = next;
            }
            destroy_node(head);
        }
    }
}

/// Release callback for [`ChainBuf::from_owner`]: drops the boxed container,
/// running its destructor.
unsafe fn drop_owner<T>(_buf: *mut u8, user_data: *mut ()) {
    // SAFETY: user_data was produced by Box::into_raw::<T> at creation and
    // this callback runs exactly once.
    drop(unsafe { Box::from_raw(user_data as *mut T) });
}

//! Sharing checks, copy-on-write, cloning, and the coalesce engine.
//!
//! Cloning a descriptor is O(1): the clone references the same backing
//! buffer and the refcount goes up. The price is paid on the write side.
//! Before mutating bytes, a caller runs `unshare`/`unshare_one`, which copy
//! the bytes into private storage only when the buffer really is shared.
//!
//! Coalescing rebuilds a chain's bytes into one contiguous buffer. The full
//! variant leaves a solitary descriptor; `gather` fuses only a prefix, for
//! parsers that need the next N bytes contiguous without flattening a whole
//! stream.
//!
//! Every fallible operation here either completes or leaves the chain
//! untouched: overflow is checked before allocating, and allocation happens
//! before any descriptor or link is modified.

use std::ptr::{self, NonNull};

use super::{destroy_node, flags, new_node, retarget, ChainBuf, Node};
use crate::error::{ChainBufError, Result};
use crate::shared;
use crate::storage;

impl ChainBuf {
    /// Returns true if other descriptors are also pointing at this buffer's
    /// backing storage.
    ///
    /// Buffers wrapped from caller-owned memory are always considered
    /// shared. Only this descriptor is checked; see
    /// [`is_shared`](Self::is_shared) for the whole chain.
    ///
    /// The check is cheap when the buffer is known private: the atomic
    /// refcount is consulted only while the maybe-shared hint is set, and a
    /// load that observes a count of 1 clears the hint again.
    #[inline]
    pub fn is_shared_one(&self) -> bool {
        self.node().is_shared_one()
    }

    /// Returns true if at least one descriptor in this chain is shared.
    pub fn is_shared(&self) -> bool {
        let head = self.ptr;
        let mut cursor = head;
        loop {
            // SAFETY: the handle keeps the whole ring alive.
            let node = unsafe { cursor.as_ref() };
            if node.is_shared_one() {
                return true;
            }
            cursor = node.next;
            if cursor == head {
                return false;
            }
        }
    }

    /// Ensures this descriptor has a private backing buffer, copying the
    /// bytes if it is currently shared.
    ///
    /// Only this descriptor is touched; other descriptors in the chain may
    /// still be shared afterwards. Headroom and data are preserved (the
    /// whole capacity range is copied, so the window geometry survives; the
    /// private buffer may round up to a larger capacity).
    ///
    /// # Errors
    ///
    /// [`ChainBufError::AllocationFailed`] if the private copy cannot be
    /// allocated; the descriptor is unchanged.
    pub fn unshare_one(&mut self) -> Result<()> {
        if !self.is_shared_one() {
            return Ok(());
        }
        self.unshare_one_slow()
    }

    fn unshare_one_slow(&mut self) -> Result<()> {
        let node = self.ptr.as_ptr();
        // SAFETY: the old backing is read in full before being released;
        // retarget performs the release after the copy.
        unsafe {
            let capacity = (*node).capacity;
            let block = storage::allocate_separate(capacity)?;
            ptr::copy_nonoverlapping((*node).buf, block.buf, capacity as usize);
            let offset = (*node).data as usize - (*node).buf as usize;
            let length = (*node).length;
            crate::logging::note_unshare();
            retarget(node, block, offset, length);
        }
        Ok(())
    }

    /// Ensures this chain as a whole references no shared buffers.
    ///
    /// A solitary descriptor is unshared in place. A chain that contains any
    /// shared descriptor is coalesced, which both privatizes and flattens
    /// it; the descriptors fused away are destroyed.
    ///
    /// # Errors
    ///
    /// [`ChainBufError::AllocationFailed`] or, for a chain longer than the
    /// 32-bit capacity limit, [`ChainBufError::Overflow`]. The chain is
    /// unchanged on error.
    pub fn unshare(&mut self) -> Result<()> {
        if !self.is_chained() {
            return self.unshare_one();
        }
        if !self.is_shared() {
            return Ok(());
        }
        self.coalesce().map(|_| ())
    }

    /// Coalesces this chain into a single contiguous buffer and returns the
    /// data.
    ///
    /// A no-op for solitary descriptors. Otherwise all data bytes are copied
    /// in ring order into one fresh buffer, this descriptor is retargeted
    /// onto it, and every other descriptor in the chain is destroyed. The
    /// result keeps this descriptor's original headroom and the last
    /// descriptor's original tailroom.
    ///
    /// # Errors
    ///
    /// [`ChainBufError::Overflow`] when the fused span does not fit the
    /// 32-bit capacity width, [`ChainBufError::AllocationFailed`] when the
    /// allocator refuses. The chain is unchanged on error.
    pub fn coalesce(&mut self) -> Result<&[u8]> {
        if self.is_chained() {
            let new_length = self.total_length();
            let new_headroom = self.headroom();
            // SAFETY: the handle keeps the ring alive; prev is the last
            // node in ring order.
            let new_tailroom = unsafe { (*(*self.ptr.as_ptr()).prev.as_ptr()).tailroom() };
            let end = self.ptr; // the whole ring
            // SAFETY: end is this ring's head, so the span is the full ring.
            unsafe { self.coalesce_and_reallocate(new_headroom, new_length, end, new_tailroom)? };
        }
        Ok(self.as_slice())
    }

    /// Coalesces descriptors from the front of the chain until this
    /// descriptor holds at least `max_length` contiguous bytes (or the chain
    /// is exhausted).
    ///
    /// Descriptors beyond the fused prefix stay in the chain, directly
    /// following this one. Afterwards `len() >= max_length` or
    /// `!is_chained()` holds. The fused region keeps this descriptor's
    /// headroom and the tailroom of the last descriptor it absorbed.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`coalesce`](Self::coalesce); the chain is
    /// unchanged on error.
    pub fn gather(&mut self, max_length: u32) -> Result<()> {
        if !self.is_chained() || self.len() >= max_length {
            return Ok(());
        }
        let head = self.ptr;
        let mut new_length = 0u64;
        let mut cursor = head;
        // SAFETY: the handle keeps the ring alive during the walk.
        let (end, new_tailroom) = loop {
            let node = unsafe { cursor.as_ref() };
            new_length += node.length as u64;
            let next = node.next;
            if new_length >= max_length as u64 || next == head {
                break (next, node.tailroom());
            }
            cursor = next;
        };
        let new_headroom = self.headroom();
        // SAFETY: end lies on this ring, downstream of the head.
        unsafe { self.coalesce_and_reallocate(new_headroom, new_length, end, new_tailroom) }
    }

    /// Copies the data of every descriptor in `[head, end)` into one fresh
    /// buffer, retargets the head onto it, destroys the fused descriptors,
    /// and closes the ring again. `end == head` means the whole ring.
    ///
    /// # Safety
    ///
    /// `end` must be a node of this ring and `new_length` must be the exact
    /// sum of data lengths over `[head, end)`.
    unsafe fn coalesce_and_reallocate(
        &mut self,
        new_headroom: u32,
        new_length: u64,
        end: NonNull<Node>,
        new_tailroom: u32,
    ) -> Result<()> {
        let span = new_headroom as u64 + new_length + new_tailroom as u64;
        if span > u32::MAX as u64 {
            return Err(ChainBufError::Overflow { total: new_length });
        }
        let block = storage::allocate_separate(span as u32)?;

        // SAFETY (whole body): the ring is owned by self and stays
        // structurally intact until the copy is done; nodes are destroyed
        // only after their bytes are in the new block.
        unsafe {
            let head = self.ptr;
            let mut dst = block.buf.add(new_headroom as usize);
            let mut cursor = head;
            loop {
                let node = cursor.as_ref();
                ptr::copy_nonoverlapping(node.data, dst, node.length as usize);
                dst = dst.add(node.length as usize);
                cursor = node.next;
                if cursor == end {
                    break;
                }
            }

            let mut cursor = (*head.as_ptr()).next;
            while cursor != end && cursor != head {
                let next = (*cursor.as_ptr()).next;
                destroy_node(cursor);
                cursor = next;
            }

            retarget(head.as_ptr(), block, new_headroom as usize, new_length as u32);
            if end == head {
                (*head.as_ptr()).next = head;
                (*head.as_ptr()).prev = head;
            } else {
                (*head.as_ptr()).next = end;
                (*end.as_ptr()).prev = head;
            }
        }
        crate::logging::note_coalesce();
        Ok(())
    }

    /// Returns a new solitary descriptor referencing the same backing
    /// buffer and the same data window as this one.
    ///
    /// The refcount goes up and both descriptors are marked maybe-shared.
    /// Cloning a wrapped caller-owned buffer produces another wrapped
    /// descriptor; there is no refcount to bump and the caller's lifetime
    /// obligation now covers the clone too.
    pub fn clone_one(&self) -> ChainBuf {
        ChainBuf::from_node(clone_node(self.node()))
    }

    /// Returns a new chain sharing the same data as this chain: every
    /// descriptor cloned, spliced in the same order.
    pub fn clone_chain(&self) -> ChainBuf {
        let mut clone = self.clone_one();
        let head = self.ptr;
        // SAFETY: the handle keeps the ring alive during the walk.
        let mut cursor = unsafe { (*head.as_ptr()).next };
        while cursor != head {
            let node = unsafe { cursor.as_ref() };
            // Splicing before the clone's head appends in ring order.
            clone.prepend_chain(ChainBuf::from_node(clone_node(node)));
            cursor = node.next;
        }
        clone
    }
}

/// Clones one node into a fresh solitary heap node sharing its backing.
fn clone_node(node: &Node) -> NonNull<Node> {
    let mut flag_bits = node.flags.get() & (flags::USER_OWNED | flags::FREE_SHARED_INFO);
    if !node.has_flag(flags::USER_OWNED) {
        // SAFETY: non-user-owned nodes always carry a live SharedInfo, and
        // this node's own reference covers the increment.
        unsafe { shared::acquire(node.shared) };
        node.set_flag(flags::MAYBE_SHARED);
        flag_bits |= flags::MAYBE_SHARED;
    }
    new_node(
        node.buf,
        node.capacity,
        node.data,
        node.length,
        flag_bits,
        node.kind,
        node.shared,
    )
}

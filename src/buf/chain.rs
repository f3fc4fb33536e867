//! Ring operations: splicing, splitting, and walking buffer chains.
//!
//! Chains are circular and doubly linked with no sentinel node, so every
//! operation here preserves two structural invariants at every public-entry
//! return: `next` and `prev` are never null (a solitary node points at
//! itself), and for every node `n`, `n.next.prev == n` and `n.prev.next == n`.
//!
//! Ownership of the ring travels with the [`ChainBuf`] handle. Splice
//! operations therefore consume the donor handle by value, and split
//! operations mint fresh handles for the detached pieces; at no point do two
//! handles refer into the same ring.

use std::mem;
use std::ptr::NonNull;

use super::{ChainBuf, Node};

impl ChainBuf {
    /// Returns true if this buffer is part of a chain of more than one
    /// descriptor.
    #[inline]
    pub fn is_chained(&self) -> bool {
        let node = self.node();
        debug_assert_eq!(node.next == self.ptr, node.prev == self.ptr);
        node.next != self.ptr
    }

    /// Number of descriptors in this chain. Walks the whole ring; use
    /// [`is_chained`](Self::is_chained) for a constant-time "more than one"
    /// check.
    pub fn count_elements(&self) -> usize {
        let mut count = 0;
        self.for_each_node(|_| count += 1);
        count
    }

    /// Total valid-data bytes across the whole chain. Walks the whole ring.
    pub fn total_length(&self) -> u64 {
        let mut total = 0u64;
        self.for_each_node(|node| total += node.length as u64);
        total
    }

    /// Returns true if every descriptor in the chain has a data length of
    /// zero.
    ///
    /// Semantically `total_length() == 0`, but short-circuits on the first
    /// non-empty descriptor.
    pub fn is_empty(&self) -> bool {
        let head = self.ptr;
        let mut cursor = head;
        loop {
            // SAFETY: the handle keeps the whole ring alive.
            let node = unsafe { cursor.as_ref() };
            if node.length != 0 {
                return false;
            }
            cursor = node.next;
            if cursor == head {
                return true;
            }
        }
    }

    /// Splices the entire chain of `other` in immediately before this
    /// buffer.
    ///
    /// Because chains are circular and iteration starts at the head, the
    /// spliced bytes land at the end of the logical stream. `other`'s
    /// descriptors become owned by this handle; the donor handle is consumed
    /// by the call.
    pub fn prepend_chain(&mut self, other: ChainBuf) {
        self.splice_before_head(other);
    }

    /// Appends the entire chain of `other` at the end of this chain.
    ///
    /// The end of a circular chain is the position just before its head, so
    /// this is the same splice as [`prepend_chain`](Self::prepend_chain);
    /// both names are kept because call sites read better with one or the
    /// other. `other`'s descriptors become owned by this handle.
    ///
    /// ```
    /// use chainbuf::ChainBuf;
    ///
    /// let mut chain = ChainBuf::from_slice(b"he")?;
    /// chain.append_chain(ChainBuf::from_slice(b"llo")?);
    /// assert_eq!(chain.count_elements(), 2);
    /// assert_eq!(chain.total_length(), 5);
    /// # Ok::<(), chainbuf::ChainBufError>(())
    /// ```
    pub fn append_chain(&mut self, other: ChainBuf) {
        self.splice_before_head(other);
    }

    fn splice_before_head(&mut self, other: ChainBuf) {
        let other_head = other.raw();
        // Ownership of the donor ring transfers to self; its handle must not
        // run its destructor.
        mem::forget(other);

        let head = self.ptr;
        // SAFETY: both rings are alive and disjoint (each handle owns its
        // own); the four link writes re-close a single combined ring.
        unsafe {
            let this_tail = (*head.as_ptr()).prev;
            let other_tail = (*other_head.as_ptr()).prev;
            (*this_tail.as_ptr()).next = other_head;
            (*other_head.as_ptr()).prev = this_tail;
            (*other_tail.as_ptr()).next = head;
            (*head.as_ptr()).prev = other_tail;
        }
    }

    /// Detaches the head from its chain.
    ///
    /// Returns the head as a solitary handle together with the remainder of
    /// the chain (headed by the former second descriptor), or `None` when
    /// the buffer was already solitary.
    pub fn pop(self) -> (ChainBuf, Option<ChainBuf>) {
        let head = self.ptr;
        mem::forget(self);
        // SAFETY: we own the ring; the head is detached and self-linked, and
        // the neighbors are joined, before any new handle is created.
        unsafe {
            let next = (*head.as_ptr()).next;
            if next == head {
                return (ChainBuf::from_node(head), None);
            }
            let prev = (*head.as_ptr()).prev;
            (*next.as_ptr()).prev = prev;
            (*prev.as_ptr()).next = next;
            (*head.as_ptr()).next = head;
            (*head.as_ptr()).prev = head;
            (ChainBuf::from_node(head), Some(ChainBuf::from_node(next)))
        }
    }

    /// Detaches the descriptor `index` hops after the head and returns it as
    /// a solitary handle; its former neighbors are joined.
    ///
    /// The head itself cannot be unlinked through its own handle, so `index`
    /// starts at 1 (the descriptor right after the head).
    ///
    /// # Panics
    ///
    /// Panics if `index` is zero or not less than
    /// [`count_elements`](Self::count_elements).
    pub fn unlink_at(&mut self, index: usize) -> ChainBuf {
        assert!(index >= 1, "cannot unlink the head through its own handle");
        let target = self.nth_node(index);
        // SAFETY: target is an interior node of the ring we own; joining its
        // neighbors and self-linking it keeps both rings consistent.
        unsafe {
            let prev = (*target.as_ptr()).prev;
            let next = (*target.as_ptr()).next;
            (*prev.as_ptr()).next = next;
            (*next.as_ptr()).prev = prev;
            (*target.as_ptr()).next = target;
            (*target.as_ptr()).prev = target;
        }
        ChainBuf::from_node(target)
    }

    /// Removes the sub-chain spanning positions `from ..= to` (in hops after
    /// the head) and returns it as its own handle.
    ///
    /// The sub-chain keeps its internal order; the donor chain closes around
    /// the gap. The head cannot be part of the removed span, so `from`
    /// starts at 1.
    ///
    /// # Panics
    ///
    /// Panics if `from` is zero, `from > to`, or `to` is not less than
    /// [`count_elements`](Self::count_elements).
    pub fn separate_chain(&mut self, from: usize, to: usize) -> ChainBuf {
        assert!(from >= 1, "cannot separate a span containing the head");
        assert!(from <= to, "separate_chain span is inverted");
        let first = self.nth_node(from);
        let mut last = first;
        for _ in from..to {
            // SAFETY: the ring is alive; the bound check below catches a
            // span that would wrap back through the head.
            last = unsafe { (*last.as_ptr()).next };
            assert!(last != self.ptr, "separate_chain span out of range");
        }
        // SAFETY: [first ..= last] is an interior span excluding the head;
        // four writes close both rings.
        unsafe {
            let before = (*first.as_ptr()).prev;
            let after = (*last.as_ptr()).next;
            (*before.as_ptr()).next = after;
            (*after.as_ptr()).prev = before;
            (*first.as_ptr()).prev = last;
            (*last.as_ptr()).next = first;
        }
        ChainBuf::from_node(first)
    }

    /// Walks `index` hops from the head, panicking if the walk would wrap.
    fn nth_node(&self, index: usize) -> NonNull<Node> {
        let head = self.ptr;
        let mut cursor = head;
        for _ in 0..index {
            // SAFETY: the handle keeps the whole ring alive.
            cursor = unsafe { (*cursor.as_ptr()).next };
            assert!(cursor != head, "chain index out of range");
        }
        cursor
    }

    /// Read-only visit of every node in ring order, starting at the head.
    pub(crate) fn for_each_node(&self, mut visit: impl FnMut(&Node)) {
        let head = self.ptr;
        let mut cursor = head;
        loop {
            // SAFETY: the handle keeps the whole ring alive; visit only gets
            // a shared borrow.
            let node = unsafe { cursor.as_ref() };
            visit(node);
            cursor = node.next;
            if cursor == head {
                break;
            }
        }
    }

    /// Structural self-check used by the test suite.
    #[cfg(test)]
    pub(crate) fn assert_ring_consistent(&self) {
        let head = self.ptr;
        let mut cursor = head;
        loop {
            // SAFETY: test-only walk over a ring this handle owns.
            unsafe {
                let node = cursor.as_ref();
                assert_eq!((*node.next.as_ptr()).prev, cursor, "next.prev mismatch");
                assert_eq!((*node.prev.as_ptr()).next, cursor, "prev.next mismatch");
                assert_eq!(
                    node.headroom() as u64 + node.length as u64 + node.tailroom() as u64,
                    node.capacity as u64,
                    "window does not tile the capacity"
                );
                cursor = node.next;
            }
            if cursor == head {
                break;
            }
        }
    }
}

//! Segment iteration and scatter/gather export.
//!
//! Iteration is at segment granularity: each step yields one descriptor's
//! valid data as a byte slice, in ring order starting at the head. Because
//! the ring has no sentinel node, the iterator tracks its origin; that is
//! what distinguishes "back at the start" from "at my only node".

use std::io::IoSlice;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::slice;

use super::{ChainBuf, Node};

/// Forward iterator over the data segments of a chain.
///
/// Created by [`ChainBuf::iter`]. Yields one `&[u8]` per descriptor,
/// including empty ones, in ring order starting at the chain head.
#[derive(Clone, Debug)]
pub struct ChainIter<'a> {
    pos: Option<NonNull<Node>>,
    origin: NonNull<Node>,
    _marker: PhantomData<&'a ChainBuf>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let cursor = self.pos?;
        // SAFETY: the borrow of the ChainBuf in _marker keeps the ring alive
        // and unmutated for 'a.
        let node = unsafe { cursor.as_ref() };
        let segment = unsafe { slice::from_raw_parts(node.data, node.length as usize) };
        self.pos = (node.next != self.origin).then_some(node.next);
        Some(segment)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.pos {
            Some(_) => (1, None),
            None => (0, Some(0)),
        }
    }
}

impl FusedIterator for ChainIter<'_> {}

impl<'a> IntoIterator for &'a ChainBuf {
    type Item = &'a [u8];
    type IntoIter = ChainIter<'a>;

    fn into_iter(self) -> ChainIter<'a> {
        self.iter()
    }
}

impl ChainBuf {
    /// Iterates over the data segments of this chain, head first.
    ///
    /// ```
    /// use chainbuf::ChainBuf;
    ///
    /// let mut chain = ChainBuf::from_slice(b"he")?;
    /// chain.append_chain(ChainBuf::from_slice(b"llo")?);
    ///
    /// let flat: Vec<u8> = chain.iter().flatten().copied().collect();
    /// assert_eq!(flat, b"hello");
    /// # Ok::<(), chainbuf::ChainBufError>(())
    /// ```
    pub fn iter(&self) -> ChainIter<'_> {
        ChainIter {
            pos: Some(self.raw()),
            origin: self.raw(),
            _marker: PhantomData,
        }
    }

    /// Exports the chain as a scatter/gather vector: one entry per
    /// descriptor, in ring order.
    ///
    /// [`IoSlice`] is ABI-compatible with POSIX `iovec`, so the returned
    /// vector can feed `writev`-style vectored I/O directly. The pointers
    /// borrow from this chain; the borrow checker therefore invalidates the
    /// vector on any chain or window mutation, which is exactly when the
    /// pointers would go stale.
    pub fn io_slices(&self) -> Vec<IoSlice<'_>> {
        self.iter().map(IoSlice::new).collect()
    }
}

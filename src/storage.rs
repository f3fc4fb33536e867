//! Backing-store allocation for buffer descriptors.
//!
//! This module owns the raw block layouts behind every buffer the crate
//! allocates itself. Two flavors exist:
//!
//! - **Separate blocks** hold the bytes and the [`SharedInfo`] record in one
//!   allocation, with the record at the tail of the block. The descriptor is
//!   allocated on its own. Releasing the last buffer reference frees the
//!   whole block.
//! - **Combined blocks** additionally embed the descriptor itself, saving one
//!   allocation when descriptor and buffer have similar lifetimes. The block
//!   is freed only after both the descriptor and the backing are dead, which
//!   a block-level reference pair arbitrates.
//!
//! Requested capacities are rounded up to allocator-friendly size classes;
//! the rounding is observable through `capacity()` on the descriptor. All
//! blocks are zero-initialized so freshly reserved tailroom can be handed out
//! as initialized memory.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::mem::{self, MaybeUninit};
use std::ptr;

use crate::buf::Node;
use crate::error::{ChainBufError, Result};
use crate::loom::sync::atomic::{fence, AtomicU32, Ordering};
use crate::shared::SharedInfo;

/// Smallest block handed out by the allocator, bookkeeping included.
///
/// Requests below this are rounded up; tiny buffers gain a little slack at
/// no extra allocator cost.
pub(crate) const MIN_BLOCK_SIZE: usize = 64;

/// Block sizes above one page are rounded to whole pages.
const PAGE_SIZE: usize = 4096;

/// Alignment for every block this module allocates.
const BLOCK_ALIGN: usize = mem::align_of::<SharedInfo>();

/// Bookkeeping bytes appended to a separate block.
const SEPARATE_HEADER: usize = mem::size_of::<SharedInfo>();

/// Returns a good block size for a buffer of at least `min_capacity` bytes.
///
/// The result covers `min_capacity` plus the shared-ownership bookkeeping
/// that rides in the same allocation, rounded up to an allocator-friendly
/// size class: the next power of two up to one page, whole pages beyond
/// that. Factories built on this always report `capacity() >=` the capacity
/// they were asked for; the surplus shows up as extra tailroom.
pub fn good_buffer_size(min_capacity: u32) -> usize {
    round_block_size(min_capacity as usize + SEPARATE_HEADER)
}

fn round_block_size(needed: usize) -> usize {
    let needed = needed.max(MIN_BLOCK_SIZE);
    if needed <= PAGE_SIZE {
        needed.next_power_of_two()
    } else {
        (needed + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
    }
}

fn usable_capacity(block_size: usize, header: usize) -> u32 {
    (block_size - header).min(u32::MAX as usize) as u32
}

/// A freshly allocated separate block: bytes first, `SharedInfo` at the end.
pub(crate) struct SeparateBlock {
    pub(crate) buf: *mut u8,
    pub(crate) capacity: u32,
    pub(crate) info: *mut SharedInfo,
}

/// Allocates a separate block with room for at least `min_capacity` bytes.
///
/// The embedded `SharedInfo` is initialized with a refcount of 1 and a
/// release callback that frees the whole block, so the standard refcount
/// path needs no special casing for crate-owned buffers.
pub(crate) fn allocate_separate(min_capacity: u32) -> Result<SeparateBlock> {
    let block_size = good_buffer_size(min_capacity);
    let layout = layout_for(block_size)?;

    // SAFETY: layout is non-zero-sized; null is handled below. The info
    // record is written inside the block at an address aligned for it
    // because both the block size and the header size are multiples of
    // BLOCK_ALIGN.
    unsafe {
        let buf = alloc_zeroed(layout);
        if buf.is_null() {
            return Err(ChainBufError::AllocationFailed { bytes: block_size });
        }
        let info = buf.add(block_size - SEPARATE_HEADER) as *mut SharedInfo;
        ptr::write(info, SharedInfo::new(free_separate, block_size as *mut ()));

        crate::logging::note_alloc(block_size);
        Ok(SeparateBlock {
            buf,
            capacity: usable_capacity(block_size, SEPARATE_HEADER),
            info,
        })
    }
}

/// Release callback for separate blocks; `user_data` carries the block size.
unsafe fn free_separate(buf: *mut u8, user_data: *mut ()) {
    let block_size = user_data as usize;
    crate::logging::note_free(block_size);
    // SAFETY: buf was produced by alloc_zeroed with exactly this layout.
    unsafe {
        dealloc(
            buf,
            Layout::from_size_align_unchecked(block_size, BLOCK_ALIGN),
        );
    }
}

/// Header of a combined block. The buffer bytes follow the struct directly.
///
/// `refs` counts the two logical tenants of the block: the descriptor slot
/// and the backing buffer. Each side releases its reference when it dies;
/// the second release deallocates the block.
#[repr(C)]
pub(crate) struct CombinedBlock {
    refs: AtomicU32,
    alloc_size: usize,
    pub(crate) info: SharedInfo,
    pub(crate) node: MaybeUninit<Node>,
}

/// Bytes occupied by the combined header before the buffer region.
const COMBINED_HEADER: usize = mem::size_of::<CombinedBlock>();

/// A freshly allocated combined block with its interior pointers resolved.
pub(crate) struct CombinedAlloc {
    pub(crate) block: *mut CombinedBlock,
    pub(crate) buf: *mut u8,
    pub(crate) capacity: u32,
    pub(crate) info: *mut SharedInfo,
    pub(crate) node_slot: *mut Node,
}

/// Allocates a combined block: header, descriptor slot, then bytes.
///
/// The descriptor slot is left uninitialized; the caller writes the node
/// into it and owns the descriptor-side block reference from then on. The
/// backing-side reference is released through the embedded `SharedInfo`'s
/// callback when the buffer refcount reaches zero.
pub(crate) fn allocate_combined(min_capacity: u32) -> Result<CombinedAlloc> {
    let block_size = round_block_size(min_capacity as usize + COMBINED_HEADER);
    let layout = layout_for(block_size)?;

    // SAFETY: layout is non-zero-sized; null is handled below. CombinedBlock
    // is written at the block start, which satisfies its alignment because
    // BLOCK_ALIGN equals the struct's alignment.
    unsafe {
        let raw = alloc_zeroed(layout);
        if raw.is_null() {
            return Err(ChainBufError::AllocationFailed { bytes: block_size });
        }
        let block = raw as *mut CombinedBlock;
        // Field-by-field initialization through raw pointers; no reference
        // to the block may exist before its fields are written.
        ptr::write(
            ptr::addr_of_mut!((*block).refs),
            AtomicU32::new(2), // descriptor slot + backing
        );
        ptr::write(ptr::addr_of_mut!((*block).alloc_size), block_size);
        ptr::write(
            ptr::addr_of_mut!((*block).info),
            SharedInfo::new(free_combined_backing, block as *mut ()),
        );

        crate::logging::note_alloc(block_size);
        Ok(CombinedAlloc {
            block,
            buf: raw.add(COMBINED_HEADER),
            capacity: usable_capacity(block_size, COMBINED_HEADER),
            info: ptr::addr_of_mut!((*block).info),
            node_slot: ptr::addr_of_mut!((*block).node) as *mut Node,
        })
    }
}

/// Release callback for the backing side of a combined block.
unsafe fn free_combined_backing(_buf: *mut u8, user_data: *mut ()) {
    // SAFETY: user_data was registered as the owning block pointer.
    unsafe { release_block(user_data as *mut CombinedBlock) };
}

/// Drops one of the two block references; the second drop frees the block.
///
/// # Safety
///
/// `block` must point to a live combined block and the caller must own one
/// of its references (descriptor slot or backing).
pub(crate) unsafe fn release_block(block: *mut CombinedBlock) {
    // SAFETY: caller owns a block reference, so the block is live.
    unsafe {
        if (*block).refs.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        fence(Ordering::Acquire);
        let block_size = (*block).alloc_size;
        crate::logging::note_free(block_size);
        dealloc(
            block as *mut u8,
            Layout::from_size_align_unchecked(block_size, BLOCK_ALIGN),
        );
    }
}

fn layout_for(block_size: usize) -> Result<Layout> {
    Layout::from_size_align(block_size, BLOCK_ALIGN)
        .map_err(|_| ChainBufError::AllocationFailed { bytes: block_size })
}

//! # Chainbuf: Zero-Copy Chained Byte Buffers
//!
//! A buffer primitive for high-performance networking code, modelled after
//! the classic kernel buffer structures (BSD's `mbuf`, Linux's `sk_buff`).
//! A [`ChainBuf`] is a small descriptor over a reference-counted byte
//! buffer; descriptors link into circular chains that represent one logical
//! byte stream stored across multiple non-contiguous buffers. Payloads can
//! be passed, sliced, shared, and reassembled without copying bytes.
//!
//! ## Key Features
//!
//! ### Zero-Copy Sharing
//! - **O(1) cloning**: [`clone_one`](ChainBuf::clone_one) makes a second
//!   view of the same bytes by bumping a refcount
//! - **Copy-on-write**: [`unshare`](ChainBuf::unshare) gives a writer a
//!   private copy only when the buffer really is shared
//! - **Foreign buffers**: take ownership of caller memory with a custom
//!   release callback, or wrap caller-owned memory without taking ownership
//!
//! ### Chain Management
//! - **Circular chains**: any descriptor can serve as the head; the head
//!   owns the rest through a single move-only handle
//! - **Reshaping**: splice, split, pop, and unlink without touching bytes
//! - **Coalescing**: flatten a whole chain, or just enough of a prefix for
//!   a parser that needs N contiguous bytes ([`gather`](ChainBuf::gather))
//!
//! ### Headroom and Tailroom
//! - Every buffer tracks spare capacity before and after its valid data, so
//!   protocol headers can be prepended without reallocating
//! - [`reserve`](ChainBuf::reserve) grows the spare room, in place when it
//!   can and by reallocating when it must
//!
//! ## Quick Start
//!
//! ```
//! use chainbuf::ChainBuf;
//!
//! # fn main() -> chainbuf::Result<()> {
//! // Parse two messages out of one read buffer without copying: clone the
//! // view, then narrow each clone to its message.
//! let recv = ChainBuf::from_slice(b"PINGPONG")?;
//! let mut first = recv.clone_one();
//! let mut second = recv.clone_one();
//! first.trim_end(4);
//! second.trim_start(4);
//! assert_eq!(first.as_slice(), b"PING");
//! assert_eq!(second.as_slice(), b"PONG");
//!
//! // Build an outgoing stream from independent pieces, then flatten it.
//! let mut out = ChainBuf::from_slice(b"HTTP/1.1 200 OK\r\n")?;
//! out.append_chain(ChainBuf::from_slice(b"\r\n")?);
//! out.append_chain(ChainBuf::from_slice(b"hello")?);
//! assert_eq!(out.count_elements(), 3);
//! assert_eq!(out.coalesce()?, b"HTTP/1.1 200 OK\r\n\r\nhello");
//! assert!(!out.is_chained());
//! # Ok(())
//! # }
//! ```
//!
//! ## Writing Into a Buffer
//!
//! ```
//! use chainbuf::ChainBuf;
//!
//! # fn main() -> chainbuf::Result<()> {
//! let mut buf = ChainBuf::with_capacity(64)?;
//! buf.advance(8); // keep 8 bytes of headroom for a header
//!
//! buf.writable_tail()[..5].copy_from_slice(b"hello");
//! buf.append(5);
//!
//! // A 4-byte header goes in front without moving the payload.
//! buf.prepend(4);
//! buf.writable_data()[..4].copy_from_slice(b"LEN5");
//! assert_eq!(buf.as_slice(), b"LEN5hello");
//! # Ok(())
//! # }
//! ```
//!
//! ## Vectored I/O
//!
//! A chain exports its segments as an [`std::io::IoSlice`] vector
//! ([`io_slices`](ChainBuf::io_slices)), ABI-compatible with POSIX `iovec`
//! for `writev`-style syscalls.
//!
//! ## Capacity Limits
//!
//! Lengths and capacities are `u32`, matching the reference layout this
//! design comes from; chain-wide totals are reported as `u64`. Operations
//! that would fuse more than `u32::MAX` bytes fail with
//! [`ChainBufError::Overflow`] and leave the chain untouched.
//!
//! ## Thread Safety
//!
//! A handle (and the chain it owns) belongs to one thread at a time; there
//! is no internal locking and `ChainBuf` is deliberately `Send` but not
//! `Sync`. Two handles may reference the same backing buffer from different
//! threads: the refcount is atomic, reads are always safe, and writers make
//! themselves private with [`unshare_one`](ChainBuf::unshare_one) first.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, rust_2018_idioms)]

// Core modules - the descriptor, its backing stores, and their bookkeeping
mod buf;
pub mod error;
mod loom; // atomics shim so the refcount is loom-checkable
mod shared; // refcount records for shared backing buffers
mod storage; // block layouts and size-class rounding

// Supporting modules
pub mod logging; // structured logging and allocation accounting

// Re-exports for convenience - commonly used types at crate root
pub use buf::{ChainBuf, ChainIter};
pub use error::{ChainBufError, Result};
pub use logging::{AllocationMetrics, LogLevel, Logger};
pub use shared::FreeFn;
pub use storage::good_buffer_size;

//! Atomic primitives, swapped for loom's checked versions under `cfg(loom)`.
//!
//! The reference count on shared backing buffers is the only cross-thread
//! state in this crate. Routing its atomics through this shim lets the loom
//! model checker explore clone/drop interleavings (`tests/loom_refcount.rs`)
//! without changing the production code path.

#[cfg(loom)]
pub(crate) use ::loom::sync;

#[cfg(not(loom))]
pub(crate) use std::sync;

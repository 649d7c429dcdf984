//! A fixed-capacity pool of equally-sized raw memory slots with a
//! cross-thread release path.
//!
//! This crate provides [`FixedPool`], which acquires all of its storage up
//! front as one contiguous slab carved into `capacity` slots of a caller-chosen
//! [`std::alloc::Layout`], and hands slots out as opaque pointers. It is built
//! for pipelines where one thread allocates and returns slots at high rate
//! while other threads hand slots back asynchronously: the two return paths
//! ([`free`][FixedPool::free] and [`release`][FixedPool::release]) feed
//! separate queues so the allocator's fast path never contends with a
//! background releaser.
//!
//! # Features
//!
//! - **Bounded memory**: capacity is fixed at construction; the pool never
//!   grows and never reallocates.
//! - **Type-erased slots**: any layout of at least 8 bytes, accessed via raw
//!   pointers.
//! - **Double-free detection**: a free marker stamped into resident slots lets
//!   the pool reject a slot that is returned twice, at zero side-table cost.
//! - **Thread-mobile**: every operation takes `&self` behind one mutex; the
//!   pool and its slot handles can be shared and sent freely.
//!
//! # Example
//!
//! ```rust
//! use std::alloc::Layout;
//! use std::num::NonZero;
//!
//! use fixed_pool::FixedPool;
//!
//! // A pool of four 64-byte slots.
//! let pool = FixedPool::new(
//!     NonZero::new(4).expect("static capacity"),
//!     Layout::from_size_align(64, 8).expect("static layout"),
//! )
//! .expect("slot layout can hold the free marker");
//!
//! let slot = pool.alloc().expect("a fresh pool has free slots");
//!
//! // Fill the slot with payload.
//! // SAFETY: The pointer designates 64 bytes owned exclusively by us.
//! unsafe {
//!     slot.ptr().cast::<u64>().as_ptr().write_unaligned(0x1234);
//! }
//!
//! // Read it back.
//! // SAFETY: The pointer is valid and we just initialized the bytes.
//! let value = unsafe { slot.ptr().cast::<u64>().as_ptr().read_unaligned() };
//! assert_eq!(value, 0x1234);
//!
//! // Hand the slot back; it becomes available to the next alloc.
//! // SAFETY: The slot came from this pool and nothing else is using it.
//! unsafe { pool.free(slot) }.expect("first return of an in-use slot succeeds");
//!
//! assert_eq!(pool.counters().freed, 4);
//! ```
//!
//! # Safety
//!
//! Pool management itself is safe, but slot contents are raw memory: reading
//! and writing them requires `unsafe` code, and the caller is responsible for
//!
//! - not touching a slot after handing it back (the marker check catches
//!   repeated returns, not reads or writes through stale copies of the handle),
//! - returning each slot to the pool it came from (pointers from elsewhere are
//!   rejected),
//! - treating slot contents as uninitialized until written: beyond the marker
//!   bytes, a freshly allocated slot carries whatever was there before.

mod error;
mod pool;
mod ring;
mod slab;

pub use error::*;
pub use pool::*;
pub(crate) use ring::*;
pub(crate) use slab::*;

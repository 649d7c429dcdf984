use thiserror::Error;

/// Errors that can occur when constructing a [`FixedPool`][crate::FixedPool].
///
/// Construction is all-or-nothing: on error, every partially acquired resource
/// has already been released and no pool object exists.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// The slot layout is smaller than the 8-byte free marker that the pool
    /// stamps into the start of every resident slot.
    #[error("slot layout of {size} bytes cannot hold the 8-byte free marker")]
    SlotTooSmall {
        /// Size of the rejected slot layout, in bytes.
        size: usize,
    },

    /// The requested slot count times the slot stride does not fit in the
    /// address space.
    #[error("slab of {capacity} slots with a stride of {stride} bytes exceeds the address space")]
    CapacityOverflow {
        /// Requested number of slots.
        capacity: usize,
        /// Distance between consecutive slots, in bytes.
        stride: usize,
    },

    /// The allocator declined to provide the slab's backing storage.
    #[error("failed to allocate {bytes} bytes of slab storage for {capacity} slots")]
    SlabAllocation {
        /// Requested number of slots.
        capacity: usize,
        /// Total size of the failed allocation, in bytes.
        bytes: usize,
    },
}

/// Errors returned when handing a slot back to the pool via
/// [`free`][crate::FixedPool::free] or [`release`][crate::FixedPool::release].
///
/// A failed return leaves the pool unchanged: the slot is not enqueued and no
/// marker is written.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum ReturnError {
    /// The slot already carries the free marker, so it is resident in one of
    /// the pool's queues and this return is a double free.
    #[error("slot is already marked free (double return)")]
    DoubleFree,

    /// The pointer does not designate a slot of this pool: it lies outside the
    /// slab or is not aligned to a slot boundary.
    #[error("pointer does not designate a slot of this pool")]
    ForeignSlot,

    /// The destination queue has no room left. Unreachable while the pool's
    /// conservation invariant holds, since each queue has one cell per slot.
    #[error("return queue is full")]
    QueueFull,
}

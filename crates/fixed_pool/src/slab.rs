use std::alloc::{Layout, alloc, dealloc};
use std::num::NonZero;
use std::ptr::NonNull;

use crate::BuildError;

/// Contiguous backing storage for a fixed number of equally-sized slots.
///
/// The slab is a single heap allocation of `capacity * stride` bytes, where the
/// stride is the slot layout padded to its alignment. Slot `i` starts at
/// `base + i * stride`; the slab hands out these addresses and can answer
/// whether an arbitrary pointer designates one of them, but keeps no record of
/// which slots are in use. Occupancy bookkeeping belongs to the pool's queues.
///
/// The storage is not zero-initialized. Callers must not rely on the contents
/// of a slot they have not written.
#[derive(Debug)]
pub(crate) struct Slab {
    /// Layout of a single slot, as supplied by the pool's caller.
    slot_layout: Layout,

    /// Distance between consecutive slot starts, in bytes. This is the slot
    /// layout padded to its alignment, so every slot start is properly aligned.
    stride: usize,

    capacity: NonZero<usize>,

    base: NonNull<u8>,

    /// Layout of the whole backing allocation, kept for `dealloc`.
    region_layout: Layout,
}

impl Slab {
    /// Allocates storage for `capacity` slots of `slot_layout` each.
    ///
    /// The returned slab owns the storage and releases it on drop. Allocator
    /// refusal and address-space overflow are reported as errors rather than
    /// panics so the caller can surface a failed construction.
    pub(crate) fn new(slot_layout: Layout, capacity: NonZero<usize>) -> Result<Self, BuildError> {
        let stride = slot_layout.pad_to_align().size();

        let total_bytes =
            stride
                .checked_mul(capacity.get())
                .ok_or(BuildError::CapacityOverflow {
                    capacity: capacity.get(),
                    stride,
                })?;

        let region_layout = Layout::from_size_align(total_bytes, slot_layout.align()).map_err(
            |_| BuildError::CapacityOverflow {
                capacity: capacity.get(),
                stride,
            },
        )?;

        // SAFETY: The region layout has non-zero size because the pool rejects
        // slot layouts smaller than the free marker before building the slab.
        let base = NonNull::new(unsafe { alloc(region_layout) }).ok_or(
            BuildError::SlabAllocation {
                capacity: capacity.get(),
                bytes: total_bytes,
            },
        )?;

        Ok(Self {
            slot_layout,
            stride,
            capacity,
            base,
            region_layout,
        })
    }

    #[must_use]
    pub(crate) fn slot_layout(&self) -> Layout {
        self.slot_layout
    }

    /// Returns the address of slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub(crate) fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        assert!(
            index < self.capacity.get(),
            "slot index {index} out of bounds in slab of capacity {}",
            self.capacity.get()
        );

        let offset = index
            .checked_mul(self.stride)
            .expect("offset stays within the allocated region because index is bounded by capacity");

        // SAFETY: The bounds check above guarantees the offset lands inside the
        // allocation that base points into.
        unsafe { self.base.add(offset) }
    }

    /// Whether `ptr` designates the start of one of this slab's slots.
    ///
    /// True only for pointers inside the backing allocation that sit on a slot
    /// boundary. Used by the pool to reject foreign pointers on the return path.
    #[must_use]
    pub(crate) fn owns(&self, ptr: NonNull<u8>) -> bool {
        let base = self.base.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;

        let Some(offset) = addr.checked_sub(base) else {
            return false;
        };

        offset < self.region_layout.size()
            && offset
                .checked_rem(self.stride)
                .expect("stride is non-zero because the slot layout is non-empty")
                == 0
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        // SAFETY: base was obtained from alloc with this exact layout in new()
        // and is released exactly once here.
        unsafe {
            dealloc(self.base.as_ptr(), self.region_layout);
        }
    }
}

// SAFETY: The slab is a plain allocation plus bookkeeping; nothing about it is
// tied to the thread that created it.
unsafe impl Send for Slab {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use super::*;

    fn layout(size: usize, align: usize) -> Layout {
        Layout::from_size_align(size, align).expect("test layouts are valid")
    }

    #[test]
    fn slots_are_distinct_and_stride_spaced() {
        let slab = Slab::new(layout(16, 8), NonZero::new(4).unwrap()).unwrap();

        let base = slab.slot_ptr(0).as_ptr() as usize;
        for index in 0..4 {
            let addr = slab.slot_ptr(index).as_ptr() as usize;
            assert_eq!(addr, base + index * 16);
        }
    }

    #[test]
    fn stride_is_padded_to_alignment() {
        // A 12-byte slot with 8-byte alignment strides at 16 so every slot
        // start stays aligned.
        let slab = Slab::new(layout(12, 8), NonZero::new(3).unwrap()).unwrap();
        assert_eq!(slab.stride, 16);

        for index in 0..3 {
            assert_eq!(slab.slot_ptr(index).as_ptr() as usize % 8, 0);
        }
    }

    #[test]
    fn owns_accepts_every_slot_start() {
        let slab = Slab::new(layout(16, 8), NonZero::new(4).unwrap()).unwrap();

        for index in 0..4 {
            assert!(slab.owns(slab.slot_ptr(index)));
        }
    }

    #[test]
    fn owns_rejects_interior_and_outside_pointers() {
        let slab = Slab::new(layout(16, 8), NonZero::new(4).unwrap()).unwrap();

        // Interior of a slot: in range but off the stride grid.
        let interior = unsafe { slab.slot_ptr(1).add(8) };
        assert!(!slab.owns(interior));

        // One past the end is stride-aligned but out of range.
        let past_end = unsafe { slab.slot_ptr(0).add(4 * 16) };
        assert!(!slab.owns(past_end));

        // A pointer into unrelated storage.
        let mut local = 0_u8;
        assert!(!slab.owns(NonNull::from(&mut local)));
    }

    #[test]
    fn slot_bytes_are_writable_across_the_whole_region() {
        let slab = Slab::new(layout(16, 8), NonZero::new(4).unwrap()).unwrap();

        for index in 0..4 {
            let ptr = slab.slot_ptr(index);
            unsafe {
                ptr.as_ptr().write_bytes(0xA5, 16);
                assert_eq!(ptr.as_ptr().read(), 0xA5);
                assert_eq!(ptr.as_ptr().add(15).read(), 0xA5);
            }
        }
    }

    #[test]
    #[should_panic]
    fn slot_ptr_out_of_bounds_panics() {
        let slab = Slab::new(layout(16, 8), NonZero::new(2).unwrap()).unwrap();
        let _ = slab.slot_ptr(2);
    }

    #[test]
    fn absurd_capacity_is_reported_not_panicked() {
        let result = Slab::new(layout(usize::MAX / 2, 1), NonZero::new(4).unwrap());
        assert!(matches!(result, Err(BuildError::CapacityOverflow { .. })));
    }
}

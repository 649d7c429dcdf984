use std::alloc::Layout;
use std::fmt;
use std::num::NonZero;
use std::ptr::NonNull;

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::{BuildError, ReturnError, Slab, SlotRing};

/// Marker stamped into the first 8 bytes of every slot that is resident in one
/// of the pool's queues.
///
/// An in-use slot never carries the marker: [`alloc`][FixedPool::alloc] clears
/// it before handing the slot out, and the return paths refuse slots that still
/// carry it (double free). The marker lives in-band, inside the slot's own
/// storage, so detecting reuse bugs costs no side-table memory.
pub const FREE_MAGIC: u64 = 0x2525_2525_2525_2525;

/// Leading slot bytes reserved for [`FREE_MAGIC`] while a slot is queued.
const MARKER_BYTES: usize = size_of::<u64>();

/// A fixed-capacity pool of equally-sized raw memory slots.
///
/// All storage is acquired up front: the pool owns one contiguous slab of
/// `capacity` slots and never grows. [`alloc`][Self::alloc] hands out slots,
/// and two return paths bring them back: [`free`][Self::free] for the
/// allocating thread and [`release`][Self::release] for any other thread.
/// Keeping the paths on separate queues means an allocator draining the free
/// queue does not contend with a background releaser filling the released
/// queue; the allocator only touches the released queue once the free queue is
/// empty.
///
/// Every operation serializes on one internal mutex, so the pool can be shared
/// freely across threads. Critical sections are a queue push or pop plus an
/// 8-byte marker access.
///
/// # Out of band access
///
/// The pool never creates references to slot contents. Between `alloc` and the
/// matching return, the caller owns the slot's bytes exclusively and accesses
/// them via the raw pointer in [`Slot`]; the pool only ever touches the first
/// 8 bytes of slots resident in its queues.
///
/// # Lifetime
///
/// Dropping the pool releases the slab and both queues in one step; there is
/// no quiescence protocol. Slots still held by callers at that point are
/// logged, and every outstanding [`Slot`] handle becomes dangling the moment
/// the pool goes away.
///
/// # Example
///
/// ```rust
/// use std::alloc::Layout;
/// use std::num::NonZero;
///
/// use fixed_pool::FixedPool;
///
/// let pool = FixedPool::new(
///     NonZero::new(2).expect("static capacity"),
///     Layout::from_size_align(32, 8).expect("static layout"),
/// )
/// .expect("slot layout can hold the free marker");
///
/// let slot = pool.alloc().expect("a fresh pool has free slots");
///
/// // Write payload into the slot.
/// // SAFETY: The pointer designates 32 bytes owned exclusively by us.
/// unsafe {
///     slot.ptr().cast::<u64>().as_ptr().write_unaligned(0xF00D);
/// }
///
/// assert_eq!(pool.counters().allocated, 1);
///
/// // Hand the slot back on the synchronous path.
/// // SAFETY: The slot came from this pool and nothing else is using it.
/// unsafe { pool.free(slot) }.expect("first return of an in-use slot succeeds");
///
/// assert_eq!(pool.counters().allocated, 0);
/// ```
pub struct FixedPool {
    slab: Slab,

    /// Both queues live behind one mutex so that every operation observes and
    /// updates them as a unit.
    queues: Mutex<Queues>,

    /// Number of slots installed at construction. Immutable afterwards.
    total: usize,
}

struct Queues {
    free: SlotRing,
    released: SlotRing,
}

/// Which return path a slot is being handed back on.
#[derive(Clone, Copy, Debug)]
enum ReturnPath {
    Free,
    Released,
}

impl FixedPool {
    /// Creates a pool of `capacity` slots, each laid out per `slot_layout`.
    ///
    /// Every slot is stamped with [`FREE_MAGIC`] and queued on the free path,
    /// so the pool starts with `capacity` slots available. Slots are spaced at
    /// `slot_layout` padded to its alignment; beyond the 8-byte marker their
    /// contents start out unspecified.
    ///
    /// # Errors
    ///
    /// Fails if `slot_layout` cannot hold the 8-byte marker, if the requested
    /// slab does not fit in the address space, or if the allocator declines to
    /// provide it. On error nothing is left allocated.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::alloc::Layout;
    /// use std::num::NonZero;
    ///
    /// use fixed_pool::{BuildError, FixedPool};
    ///
    /// let capacity = NonZero::new(8).expect("static capacity");
    ///
    /// let pool = FixedPool::new(capacity, Layout::from_size_align(64, 8).expect("static layout"))
    ///     .expect("valid configuration");
    /// assert_eq!(pool.capacity(), 8);
    ///
    /// // A slot smaller than the marker is rejected up front.
    /// let too_small = FixedPool::new(capacity, Layout::new::<u32>());
    /// assert!(matches!(too_small, Err(BuildError::SlotTooSmall { .. })));
    /// ```
    pub fn new(capacity: NonZero<usize>, slot_layout: Layout) -> Result<Self, BuildError> {
        if slot_layout.size() < MARKER_BYTES {
            return Err(BuildError::SlotTooSmall {
                size: slot_layout.size(),
            });
        }

        let slab = match Slab::new(slot_layout, capacity) {
            Ok(slab) => slab,
            Err(build_error) => {
                error!(
                    capacity = capacity.get(),
                    slot_size = slot_layout.size(),
                    %build_error,
                    "slab storage could not be acquired"
                );
                return Err(build_error);
            }
        };

        let mut free = SlotRing::with_capacity(capacity);
        let released = SlotRing::with_capacity(capacity);

        for index in 0..capacity.get() {
            let ptr = slab.slot_ptr(index);

            // SAFETY: The pointer is the start of a slot inside the slab and
            // every slot is at least MARKER_BYTES long, so the unaligned store
            // stays in bounds.
            unsafe {
                ptr.cast::<u64>().as_ptr().write_unaligned(FREE_MAGIC);
            }

            free.push(ptr)
                .expect("the free queue is created with one cell per slot");
        }

        Ok(Self {
            slab,
            queues: Mutex::new(Queues { free, released }),
            total: capacity.get(),
        })
    }

    /// Takes a slot out of the pool, or returns `None` when every slot is in
    /// use.
    ///
    /// The free queue is drained first; the released queue is only consulted
    /// when the free queue is empty, which keeps the common path clear of
    /// cross-thread return traffic. Callers must not assume which slot they
    /// receive.
    ///
    /// The slot's first 8 bytes are zeroed before it is handed out; the rest of
    /// its contents are unspecified. A queued slot found without its free
    /// marker indicates memory corruption and is logged, but the slot is still
    /// returned.
    ///
    /// The returned handle stays valid until the slot is handed to
    /// [`free`][Self::free] or [`release`][Self::release].
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::alloc::Layout;
    /// use std::num::NonZero;
    ///
    /// use fixed_pool::FixedPool;
    ///
    /// let pool = FixedPool::new(
    ///     NonZero::new(1).expect("static capacity"),
    ///     Layout::from_size_align(16, 8).expect("static layout"),
    /// )
    /// .expect("valid configuration");
    ///
    /// let only = pool.alloc().expect("one slot installed");
    ///
    /// // The pool is now exhausted.
    /// assert!(pool.alloc().is_none());
    ///
    /// // SAFETY: The slot came from this pool and nothing else is using it.
    /// unsafe { pool.release(only) }.expect("first return succeeds");
    ///
    /// // The released queue is drained once the free queue is empty.
    /// assert!(pool.alloc().is_some());
    /// ```
    #[must_use]
    pub fn alloc(&self) -> Option<Slot> {
        let mut queues = self.queues.lock();

        #[cfg(debug_assertions)]
        self.integrity_check(&queues);

        let ptr = queues.free.pop().or_else(|| queues.released.pop())?;

        // SAFETY: The pointer came out of one of the queues, so it designates a
        // slot inside the slab; the first MARKER_BYTES of a queued slot belong
        // to the pool.
        let marker = unsafe { ptr.cast::<u64>().as_ptr().read_unaligned() };
        if marker != FREE_MAGIC {
            error!(slot = ?ptr, marker, "queued slot lost its free marker");
        }

        // Clear the marker so an in-use slot is distinguishable from a queued
        // one even before the caller writes any payload.
        // SAFETY: Same bounds as the read above; the caller cannot see the slot
        // until we return it.
        unsafe {
            ptr.cast::<u64>().as_ptr().write_unaligned(0);
        }

        Some(Slot { ptr })
    }

    /// Returns a slot on the synchronous path, back onto the free queue.
    ///
    /// Fails without touching the pool when the pointer does not designate a
    /// slot of this pool, when the free queue is full, or when the slot already
    /// carries the free marker (double free). On success the marker is stamped
    /// and the slot becomes available to future [`alloc`][Self::alloc] calls.
    ///
    /// # Errors
    ///
    /// See [`ReturnError`] for the failure cases; none of them alter the pool.
    ///
    /// # Safety
    ///
    /// `slot` must have been obtained from this pool's `alloc`, and no other
    /// party may access the slot's storage from the moment this call starts.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::alloc::Layout;
    /// use std::num::NonZero;
    ///
    /// use fixed_pool::{FixedPool, ReturnError};
    ///
    /// let pool = FixedPool::new(
    ///     NonZero::new(2).expect("static capacity"),
    ///     Layout::from_size_align(16, 8).expect("static layout"),
    /// )
    /// .expect("valid configuration");
    ///
    /// let slot = pool.alloc().expect("a fresh pool has free slots");
    ///
    /// // SAFETY: The slot came from this pool and nothing else is using it.
    /// unsafe { pool.free(slot) }.expect("first return succeeds");
    ///
    /// // Returning the same slot again is detected and rejected.
    /// // SAFETY: The slot is resident in the pool, whose storage stays valid.
    /// let second = unsafe { pool.free(slot) };
    /// assert_eq!(second, Err(ReturnError::DoubleFree));
    /// ```
    pub unsafe fn free(&self, slot: Slot) -> Result<(), ReturnError> {
        let mut queues = self.queues.lock();

        #[cfg(debug_assertions)]
        self.integrity_check(&queues);

        // SAFETY: Forwarded from our caller.
        unsafe { self.hand_back(&mut queues, ReturnPath::Free, slot) }
    }

    /// Returns a slot from a thread other than the allocating one, onto the
    /// released queue.
    ///
    /// Semantics are identical to [`free`][Self::free] except for the target
    /// queue. The split exists so that a background releaser never contends
    /// with the allocator for the free queue: released slots wait on their own
    /// queue until the allocator drains them, without the releaser needing to
    /// know whether the free queue has room.
    ///
    /// # Errors
    ///
    /// See [`ReturnError`] for the failure cases; none of them alter the pool.
    ///
    /// # Safety
    ///
    /// `slot` must have been obtained from this pool's `alloc`, and no other
    /// party may access the slot's storage from the moment this call starts.
    pub unsafe fn release(&self, slot: Slot) -> Result<(), ReturnError> {
        let mut queues = self.queues.lock();

        #[cfg(debug_assertions)]
        self.integrity_check(&queues);

        // SAFETY: Forwarded from our caller.
        unsafe { self.hand_back(&mut queues, ReturnPath::Released, slot) }
    }

    /// Shared return-path subroutine: validate, stamp the marker, enqueue.
    ///
    /// The double-free check runs before the push, so a rejected slot is never
    /// transiently visible to a concurrent `alloc`.
    ///
    /// # Safety
    ///
    /// As for [`free`][Self::free].
    unsafe fn hand_back(
        &self,
        queues: &mut Queues,
        path: ReturnPath,
        slot: Slot,
    ) -> Result<(), ReturnError> {
        let ptr = slot.ptr;

        if !self.slab.owns(ptr) {
            error!(slot = ?ptr, ?path, "returned pointer does not designate a slot of this pool");
            return Err(ReturnError::ForeignSlot);
        }

        let queue = match path {
            ReturnPath::Free => &mut queues.free,
            ReturnPath::Released => &mut queues.released,
        };

        if queue.is_full() {
            // One cell exists per slot, so a full queue here means slots were
            // conjured from outside the pool.
            error!(slot = ?ptr, ?path, "return queue is full");
            return Err(ReturnError::QueueFull);
        }

        // SAFETY: owns() established that the pointer is the start of a slot
        // inside the slab, and the caller guarantees exclusive access.
        let marker = unsafe { ptr.cast::<u64>().as_ptr().read_unaligned() };
        if marker == FREE_MAGIC {
            warn!(slot = ?ptr, ?path, "double return of a slot that is already free");
            return Err(ReturnError::DoubleFree);
        }

        // SAFETY: In-bounds store under the same reasoning as the marker read.
        unsafe {
            ptr.cast::<u64>().as_ptr().write_unaligned(FREE_MAGIC);
        }

        queue
            .push(ptr)
            .expect("fullness was checked above and the queue lock is still held");

        Ok(())
    }

    /// Takes a consistent snapshot of the occupancy counters.
    ///
    /// All three counts come from one critical section, so they always satisfy
    /// `allocated + freed + released == capacity`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::alloc::Layout;
    /// use std::num::NonZero;
    ///
    /// use fixed_pool::FixedPool;
    ///
    /// let pool = FixedPool::new(
    ///     NonZero::new(3).expect("static capacity"),
    ///     Layout::from_size_align(16, 8).expect("static layout"),
    /// )
    /// .expect("valid configuration");
    ///
    /// let slot = pool.alloc().expect("a fresh pool has free slots");
    ///
    /// let counters = pool.counters();
    /// assert_eq!(counters.allocated, 1);
    /// assert_eq!(counters.freed, 2);
    /// assert_eq!(counters.released, 0);
    /// # // SAFETY: The slot came from this pool and nothing else is using it.
    /// # unsafe { pool.free(slot) }.expect("first return succeeds");
    /// ```
    #[must_use]
    pub fn counters(&self) -> PoolCounters {
        let queues = self.queues.lock();

        let freed = queues.free.used();
        let released = queues.released.used();
        let allocated = self
            .total
            .checked_sub(freed)
            .and_then(|rest| rest.checked_sub(released))
            .expect("the queues never hold more slots than were installed");

        PoolCounters {
            allocated,
            freed,
            released,
        }
    }

    /// Number of slots currently held by callers.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.counters().allocated
    }

    /// Number of slots waiting on the free queue.
    #[must_use]
    pub fn freed(&self) -> usize {
        self.counters().freed
    }

    /// Number of slots waiting on the released queue.
    #[must_use]
    pub fn released(&self) -> usize {
        self.counters().released
    }

    /// Total number of slots installed at construction.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.total
    }

    /// Layout of a single slot, as supplied at construction.
    #[must_use]
    pub fn slot_layout(&self) -> Layout {
        self.slab.slot_layout()
    }

    /// Asserts the queue occupancy invariants while holding the queue lock.
    /// Reads only; pool state is never altered.
    #[cfg_attr(test, mutants::skip)] // Verification-only logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    fn integrity_check(&self, queues: &Queues) {
        assert!(
            queues.free.used() <= queues.free.capacity(),
            "free queue holds {} slots but has room for {}",
            queues.free.used(),
            queues.free.capacity()
        );

        assert!(
            queues.released.used() <= queues.released.capacity(),
            "released queue holds {} slots but has room for {}",
            queues.released.used(),
            queues.released.capacity()
        );

        let resident = queues
            .free
            .used()
            .checked_add(queues.released.used())
            .expect("queue occupancy is bounded by capacity, far below usize::MAX");

        assert!(
            resident <= self.total,
            "queues hold {resident} slots but only {} were installed",
            self.total
        );
    }
}

impl fmt::Debug for FixedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedPool")
            .field("capacity", &self.total)
            .field("slot_layout", &self.slab.slot_layout())
            .field("counters", &self.counters())
            .finish_non_exhaustive()
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        let queues = self.queues.get_mut();

        let resident = queues
            .free
            .used()
            .checked_add(queues.released.used())
            .expect("queue occupancy is bounded by capacity, far below usize::MAX");

        let outstanding = self
            .total
            .checked_sub(resident)
            .expect("the queues never hold more slots than were installed");

        if outstanding > 0 {
            warn!(outstanding, "pool dropped while slots are still in use");
        }
    }
}

// SAFETY: Every operation takes &self and serializes on the internal mutex,
// and the raw pointers inside only ever designate the slab allocation the pool
// itself owns.
unsafe impl Send for FixedPool {}

// SAFETY: As for Send - shared access is fully serialized by the mutex.
unsafe impl Sync for FixedPool {}

/// Handle to a slot obtained from [`FixedPool::alloc`].
///
/// The handle is a plain address: it is `Copy`, freely sendable, and never
/// dereferenced by safe code. The caller owns the slot's bytes exclusively
/// until the handle is given to [`FixedPool::free`] or
/// [`FixedPool::release`]; copies of the handle become dangling at that point
/// and the pool detects attempts to return them again.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Slot {
    ptr: NonNull<u8>,
}

impl Slot {
    /// Address of the slot's storage.
    #[must_use]
    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }
}

// SAFETY: The handle is only an address; every dereference happens in caller
// unsafe code governed by the pool's alloc/return protocol.
unsafe impl Send for Slot {}

// SAFETY: As for Send - the handle exposes no state of its own.
unsafe impl Sync for Slot {}

/// Consistent snapshot of a pool's occupancy, taken by
/// [`FixedPool::counters`].
///
/// The three counts always sum to the pool's capacity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolCounters {
    /// Slots currently held by callers.
    pub allocated: usize,

    /// Slots waiting on the free queue.
    pub freed: usize,

    /// Slots waiting on the released queue.
    pub released: usize,
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[cfg(not(miri))]
    const STRESS_ITERATIONS: usize = 1_000_000;

    // Under Miri, we use a smaller iteration count because Miri test runtime
    // scales with the amount of work performed.
    #[cfg(miri)]
    const STRESS_ITERATIONS: usize = 200;

    fn pool(capacity: usize, slot_size: usize) -> FixedPool {
        FixedPool::new(
            NonZero::new(capacity).expect("test capacities are non-zero"),
            Layout::from_size_align(slot_size, 8).expect("test layouts are valid"),
        )
        .expect("test configurations are valid")
    }

    fn write_payload(slot: Slot, value: u64) {
        unsafe {
            slot.ptr().cast::<u64>().as_ptr().write_unaligned(value);
        }
    }

    fn read_payload(slot: Slot) -> u64 {
        unsafe { slot.ptr().cast::<u64>().as_ptr().read_unaligned() }
    }

    #[test]
    fn exhaustion_after_capacity_allocs() {
        let pool = pool(3, 16);

        let p1 = pool.alloc().expect("slot 1 of 3");
        let p2 = pool.alloc().expect("slot 2 of 3");
        let p3 = pool.alloc().expect("slot 3 of 3");

        assert!(pool.alloc().is_none());
        assert_eq!(
            pool.counters(),
            PoolCounters {
                allocated: 3,
                freed: 0,
                released: 0
            }
        );

        unsafe {
            pool.free(p1).unwrap();
            pool.free(p2).unwrap();
            pool.free(p3).unwrap();
        }
    }

    #[test]
    fn freed_slot_is_reallocated() {
        let pool = pool(2, 16);

        let p1 = pool.alloc().expect("slot 1 of 2");
        let p2 = pool.alloc().expect("slot 2 of 2");

        unsafe {
            pool.free(p1).unwrap();
        }

        // p1 is the only slot available, so it must come back.
        let again = pool.alloc().expect("a freed slot is available again");
        assert_eq!(again, p1);
        assert_eq!(pool.allocated(), 2);

        unsafe {
            pool.free(p2).unwrap();
            pool.free(again).unwrap();
        }
    }

    #[test]
    fn released_slot_drains_when_free_is_empty() {
        let pool = pool(1, 16);

        let only = pool.alloc().expect("the single slot");

        unsafe {
            pool.release(only).unwrap();
        }
        assert_eq!(pool.released(), 1);

        let again = pool.alloc().expect("the released slot is drained");
        assert_eq!(again, only);
        assert_eq!(
            pool.counters(),
            PoolCounters {
                allocated: 1,
                freed: 0,
                released: 0
            }
        );

        unsafe {
            pool.free(again).unwrap();
        }
    }

    #[test]
    fn double_free_is_rejected() {
        let pool = pool(2, 16);

        let p1 = pool.alloc().expect("slot 1 of 2");
        let _p2 = pool.alloc().expect("slot 2 of 2");

        unsafe {
            pool.free(p1).unwrap();
        }
        assert_eq!(pool.freed(), 1);

        let second = unsafe { pool.free(p1) };
        assert_eq!(second, Err(ReturnError::DoubleFree));

        // The rejected return must not have changed any counter.
        assert_eq!(pool.freed(), 1);
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn double_release_is_rejected() {
        let pool = pool(1, 16);

        let only = pool.alloc().expect("the single slot");

        unsafe {
            pool.release(only).unwrap();
        }
        assert_eq!(unsafe { pool.release(only) }, Err(ReturnError::DoubleFree));
        assert_eq!(pool.released(), 1);
    }

    #[test]
    fn construction_rejects_slots_smaller_than_the_marker() {
        let capacity = NonZero::new(4).unwrap();

        let result = FixedPool::new(capacity, Layout::new::<u32>());
        assert!(matches!(result, Err(BuildError::SlotTooSmall { size: 4 })));

        // Zero-slot pools are unrepresentable at the type level.
        assert!(NonZero::new(0_usize).is_none());
    }

    #[test]
    fn alloc_prefers_the_free_queue() {
        let pool = pool(2, 16);

        let a = pool.alloc().expect("slot 1 of 2");
        let b = pool.alloc().expect("slot 2 of 2");

        unsafe {
            pool.release(a).unwrap();
            pool.free(b).unwrap();
        }

        // b sits on the free queue and must come out first even though a was
        // returned earlier.
        assert_eq!(pool.alloc().expect("free queue first"), b);
        assert_eq!(pool.alloc().expect("then the released queue"), a);

        unsafe {
            pool.free(a).unwrap();
            pool.free(b).unwrap();
        }
    }

    #[test]
    fn conservation_holds_across_mixed_traffic() {
        let pool = pool(4, 16);
        let total = pool.capacity();

        let assert_conserved = |pool: &FixedPool| {
            let counters = pool.counters();
            assert_eq!(counters.allocated + counters.freed + counters.released, total);
        };

        assert_conserved(&pool);

        let a = pool.alloc().unwrap();
        assert_conserved(&pool);
        let b = pool.alloc().unwrap();
        assert_conserved(&pool);
        let c = pool.alloc().unwrap();
        assert_conserved(&pool);

        unsafe {
            pool.free(a).unwrap();
        }
        assert_conserved(&pool);

        unsafe {
            pool.release(b).unwrap();
        }
        assert_conserved(&pool);

        let d = pool.alloc().unwrap();
        assert_conserved(&pool);

        unsafe {
            pool.free(c).unwrap();
            pool.free(d).unwrap();
        }
        assert_conserved(&pool);
    }

    #[test]
    fn alloc_results_never_alias() {
        let pool = pool(4, 16);

        let slots: Vec<Slot> = (0..4)
            .map(|index| {
                let slot = pool.alloc().expect("within capacity");
                write_payload(slot, 0x1000 + index);
                slot
            })
            .collect();

        for (index, slot) in slots.iter().enumerate() {
            for other in slots.iter().skip(index + 1) {
                assert_ne!(slot.ptr(), other.ptr());
            }
            assert_eq!(read_payload(*slot), 0x1000 + index as u64);
        }

        for slot in slots {
            unsafe {
                pool.free(slot).unwrap();
            }
        }
    }

    #[test]
    fn queued_slots_carry_the_marker() {
        let pool = pool(2, 16);

        let a = pool.alloc().expect("slot 1 of 2");
        let b = pool.alloc().expect("slot 2 of 2");

        // Destroy any trace of the marker with payload writes.
        write_payload(a, 0xDEAD_BEEF);
        write_payload(b, 0xCAFE_F00D);

        unsafe {
            pool.free(a).unwrap();
            pool.release(b).unwrap();
        }

        // Quiescent pool: both queued slots must carry the marker again. The
        // stale handles still point at pool-owned storage, which makes them a
        // convenient window for this check.
        assert_eq!(read_payload(a), FREE_MAGIC);
        assert_eq!(read_payload(b), FREE_MAGIC);
    }

    #[test]
    fn alloc_clears_the_marker() {
        let pool = pool(1, 16);

        let slot = pool.alloc().expect("the single slot");

        // An in-use slot is recognisable without any caller write.
        assert_ne!(read_payload(slot), FREE_MAGIC);

        unsafe {
            pool.free(slot).unwrap();
        }
    }

    #[test]
    fn corrupted_queued_slot_is_still_handed_out() {
        let pool = pool(1, 16);

        let slot = pool.alloc().expect("the single slot");
        unsafe {
            pool.free(slot).unwrap();
        }

        // Scribble over the queued slot's marker from outside the pool. The
        // next alloc logs the corruption but still returns the slot.
        write_payload(slot, 0xBAD_C0DE);

        let again = pool.alloc().expect("corruption does not fail the call");
        assert_eq!(again, slot);

        unsafe {
            pool.free(again).unwrap();
        }
    }

    #[test]
    fn foreign_pointers_are_rejected() {
        let first = pool(2, 16);
        let second = pool(2, 16);

        let from_first = first.alloc().expect("slot of the first pool");

        // A slot of another pool.
        assert_eq!(
            unsafe { second.free(from_first) },
            Err(ReturnError::ForeignSlot)
        );

        // An interior pointer of our own slab, off the slot grid.
        let interior = Slot {
            ptr: unsafe { from_first.ptr().add(8) },
        };
        assert_eq!(
            unsafe { first.free(interior) },
            Err(ReturnError::ForeignSlot)
        );

        unsafe {
            first.free(from_first).unwrap();
        }
    }

    #[test]
    fn drop_with_outstanding_slots_does_not_panic() {
        let pool = pool(2, 16);

        let _held = pool.alloc().expect("slot stays out across the drop");
        drop(pool);
    }

    #[test]
    fn debug_output_reports_counters() {
        let pool = pool(2, 16);
        let slot = pool.alloc().expect("a fresh pool has free slots");

        let rendered = format!("{pool:?}");
        assert!(rendered.contains("FixedPool"));
        assert!(rendered.contains("allocated: 1"));

        unsafe {
            pool.free(slot).unwrap();
        }
    }

    /// One thread loops alloc/free while another loops alloc/release, each
    /// verifying its own payload tag before returning the slot. A double-alloc
    /// of the same slot would tear the tags apart.
    #[test]
    fn concurrent_alloc_free_and_alloc_release() {
        let pool = Arc::new(pool(4, 16));

        let frees = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for iteration in 0..STRESS_ITERATIONS {
                    let Some(slot) = pool.alloc() else {
                        thread::yield_now();
                        continue;
                    };

                    let tag = 0xA000_0000_0000_0000 | iteration as u64;
                    write_payload(slot, tag);
                    assert_eq!(read_payload(slot), tag);

                    unsafe {
                        pool.free(slot).expect("first return of an in-use slot");
                    }
                }
            })
        };

        let releases = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for iteration in 0..STRESS_ITERATIONS {
                    let Some(slot) = pool.alloc() else {
                        thread::yield_now();
                        continue;
                    };

                    let tag = 0xB000_0000_0000_0000 | iteration as u64;
                    write_payload(slot, tag);
                    assert_eq!(read_payload(slot), tag);

                    unsafe {
                        pool.release(slot).expect("first return of an in-use slot");
                    }
                }
            })
        };

        frees.join().expect("freeing thread must not panic");
        releases.join().expect("releasing thread must not panic");

        let counters = pool.counters();
        assert_eq!(counters.allocated, 0);
        assert_eq!(counters.freed + counters.released, pool.capacity());
    }
}

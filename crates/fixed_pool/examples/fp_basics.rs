//! Basic usage example for `FixedPool`.
//!
//! This example demonstrates allocating raw slots from a fixed-capacity pool,
//! writing payload into them and handing them back on the synchronous path.

use std::alloc::Layout;
use std::num::NonZero;

use fixed_pool::FixedPool;

fn main() {
    // A pool of eight 128-byte slots, all allocated up front.
    let pool = FixedPool::new(
        NonZero::new(8).expect("static capacity"),
        Layout::from_size_align(128, 8).expect("static layout"),
    )
    .expect("slot layout can hold the free marker");

    println!("Created FixedPool with capacity: {}", pool.capacity());

    // Take three slots and give each a payload.
    let slots: Vec<_> = (0..3_u64)
        .map(|index| {
            let slot = pool.alloc().expect("within capacity");

            // SAFETY: The slot's bytes are ours exclusively until we return it.
            unsafe {
                slot.ptr().cast::<u64>().as_ptr().write_unaligned(0xB100D_0000 + index);
            }

            slot
        })
        .collect();

    let counters = pool.counters();
    println!(
        "Occupancy: allocated={} freed={} released={}",
        counters.allocated, counters.freed, counters.released
    );

    // Read the payloads back through the handles.
    for slot in &slots {
        // SAFETY: The pointers are valid and we initialized the bytes above.
        let value = unsafe { slot.ptr().cast::<u64>().as_ptr().read_unaligned() };
        println!("Slot at {:?} contains {value:#x}", slot.ptr());
    }

    // Hand everything back. The slots become available to future allocs.
    for slot in slots {
        // SAFETY: The slot came from this pool and nothing else is using it.
        unsafe {
            pool.free(slot).expect("first return of an in-use slot");
        }
    }

    // The pool notices a repeated return: allocate a slot, return it once and
    // watch the second attempt get rejected.
    let slot = pool.alloc().expect("pool is full again");

    // SAFETY: The slot came from this pool and nothing else is using it.
    unsafe {
        pool.free(slot).expect("first return of an in-use slot");
    }

    // SAFETY: The slot is resident in the pool, whose storage stays valid.
    let double = unsafe { pool.free(slot) };
    println!("Second return of the same slot: {double:?}");

    println!("Final occupancy: {:?}", pool.counters());
    println!("FixedPool example completed successfully!");
}

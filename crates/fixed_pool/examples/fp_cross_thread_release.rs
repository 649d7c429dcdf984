//! Cross-thread release example for `FixedPool`.
//!
//! One thread plays the packet processor: it allocates slots, fills them and
//! ships them off. A second thread plays the background consumer: it finishes
//! with each slot and hands it back via `release`, which targets its own queue
//! so the processor's alloc/free fast path stays uncontended.

use std::alloc::Layout;
use std::num::NonZero;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use fixed_pool::{FixedPool, Slot};

const SHIPMENTS: u64 = 1_000;

fn main() {
    let pool = Arc::new(
        FixedPool::new(
            NonZero::new(16).expect("static capacity"),
            Layout::from_size_align(256, 8).expect("static layout"),
        )
        .expect("slot layout can hold the free marker"),
    );

    let (sender, receiver) = mpsc::channel::<Slot>();

    // The background consumer: verify the payload, then release the slot from
    // this thread.
    let consumer = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let mut received = 0_u64;

            for slot in receiver {
                // SAFETY: The producer initialized the first 8 bytes and gave
                // up access when it shipped the slot to us.
                let sequence = unsafe { slot.ptr().cast::<u64>().as_ptr().read_unaligned() };
                assert_eq!(sequence, received);
                received += 1;

                // SAFETY: The slot came from this pool and we are done with it.
                unsafe {
                    pool.release(slot).expect("first return of an in-use slot");
                }
            }

            received
        })
    };

    // The processor: allocate, stamp a sequence number, ship. When the pool
    // runs dry it waits for the consumer to release slots back.
    let mut shipped = 0_u64;
    while shipped < SHIPMENTS {
        let Some(slot) = pool.alloc() else {
            // Every slot is in flight; the consumer will release some shortly.
            thread::yield_now();
            continue;
        };

        // SAFETY: The slot's bytes are ours exclusively until we ship it.
        unsafe {
            slot.ptr().cast::<u64>().as_ptr().write_unaligned(shipped);
        }

        sender.send(slot).expect("consumer outlives the producer loop");
        shipped += 1;
    }

    drop(sender);
    let received = consumer.join().expect("consumer must not panic");

    println!("Shipped {shipped} slots, consumer processed {received}");
    println!("Final occupancy: {:?}", pool.counters());
    assert_eq!(pool.counters().allocated, 0);

    println!("Cross-thread release example completed successfully!");
}

//! Basic benchmarks for the `fixed_pool` crate.

#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::alloc::Layout;
use std::hint::black_box;
use std::num::NonZero;

use criterion::{Criterion, criterion_group, criterion_main};
use fixed_pool::FixedPool;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const SLOT_BYTES: usize = 256;
const POOL_SLOTS: usize = 1024;

fn test_pool() -> FixedPool {
    FixedPool::new(
        NonZero::new(POOL_SLOTS).expect("POOL_SLOTS is a non-zero constant"),
        Layout::from_size_align(SLOT_BYTES, 8).expect("benchmark layout is valid"),
    )
    .expect("benchmark configuration is valid")
}

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fp_build");

    group.bench_function("build_and_drop", |b| {
        b.iter(|| {
            drop(black_box(test_pool()));
        });
    });

    group.finish();

    let mut group = c.benchmark_group("fp_cycle");

    group.bench_function("alloc_free", |b| {
        let pool = test_pool();

        b.iter(|| {
            let slot = pool.alloc().expect("capacity is never exceeded here");

            // SAFETY: We own the slot between alloc and free.
            unsafe {
                slot.ptr().cast::<u64>().as_ptr().write_unaligned(1);
            }

            // SAFETY: The slot came from this pool and nothing else is using it.
            unsafe {
                pool.free(slot).expect("first return of an in-use slot");
            }
        });
    });

    group.bench_function("alloc_release", |b| {
        let pool = test_pool();

        b.iter(|| {
            let slot = pool.alloc().expect("capacity is never exceeded here");

            // SAFETY: We own the slot between alloc and release.
            unsafe {
                slot.ptr().cast::<u64>().as_ptr().write_unaligned(1);
            }

            // SAFETY: The slot came from this pool and nothing else is using it.
            unsafe {
                pool.release(slot).expect("first return of an in-use slot");
            }
        });
    });

    group.bench_function("drain_then_refill", |b| {
        let pool = test_pool();

        b.iter(|| {
            let mut slots = Vec::with_capacity(POOL_SLOTS);

            while let Some(slot) = pool.alloc() {
                // SAFETY: We own the slot between alloc and free.
                unsafe {
                    slot.ptr().cast::<u64>().as_ptr().write_unaligned(1);
                }
                slots.push(slot);
            }

            for slot in slots {
                // SAFETY: The slot came from this pool and nothing else is using it.
                unsafe {
                    pool.free(slot).expect("first return of an in-use slot");
                }
            }
        });
    });

    group.finish();

    let mut group = c.benchmark_group("fp_counters");

    group.bench_function("snapshot", |b| {
        let pool = test_pool();
        let slot = pool.alloc().expect("a fresh pool has free slots");

        b.iter(|| {
            black_box(pool.counters());
        });

        // SAFETY: The slot came from this pool and nothing else is using it.
        unsafe {
            pool.free(slot).expect("first return of an in-use slot");
        }
    });

    group.finish();
}

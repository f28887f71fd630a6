//! Basic benchmarks for the `unit_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::num::NonZero;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use new_zealand::nz;
use unit_pool::UnitPool;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = [u64; 2];
const TEST_VALUE: TestItem = [1024, 2048];

/// How many units each of the bulk benchmarks allocates and releases.
const BULK_UNITS: usize = 10_000;

fn new_pool(units_per_increment: NonZero<usize>) -> UnitPool {
    UnitPool::builder()
        .unit_layout_of::<TestItem>()
        .units_per_increment(units_per_increment)
        .build()
        .unwrap()
}

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("unit_basic");

    let allocs_op = allocs.operation("build");
    group.bench_function("build", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(new_pool(nz!(128))));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("allocate_one");
    group.bench_function("allocate_one", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(|| new_pool(nz!(128)))
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.allocate());
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("deallocate_one");
    group.bench_function("deallocate_one", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(|| new_pool(nz!(128)))
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let units = pools
                .iter_mut()
                .map(|pool| pool.allocate().unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for (pool, unit) in pools.iter_mut().zip(units) {
                // SAFETY: The unit came from this pool and is released once.
                unsafe { pool.deallocate(unit.as_ptr()) };
            }

            start.elapsed()
        });
    });

    group.finish();

    let mut group = c.benchmark_group("unit_bulk");

    // Allocate and release many units, for a range of increment sizes and for the
    // global allocator as a baseline.
    for units_per_increment in [nz!(2), nz!(128), nz!(1024)] {
        let name = format!("pool_{units_per_increment}");

        let allocs_op = allocs.operation(name.clone());
        group.bench_function(&name, |b| {
            b.iter_custom(|iters| {
                let mut pool = new_pool(units_per_increment);
                let mut units = Vec::with_capacity(BULK_UNITS);

                let _span = allocs_op.measure_thread().iterations(iters);

                let start = Instant::now();

                for _ in 0..iters {
                    for _ in 0..BULK_UNITS {
                        let unit = pool.allocate().unwrap().cast::<TestItem>();

                        // SAFETY: The unit is valid for a TestItem until released.
                        unsafe { unit.write(black_box(TEST_VALUE)) };

                        units.push(unit);
                    }

                    #[expect(clippy::iter_with_drain, reason = "to reuse the allocation")]
                    for unit in units.drain(..) {
                        // SAFETY: The unit came from this pool and is released once.
                        unsafe { pool.deallocate(unit.as_ptr().cast()) };
                    }
                }

                start.elapsed()
            });
        });
    }

    let allocs_op = allocs.operation("box");
    group.bench_function("box", |b| {
        b.iter_custom(|iters| {
            let mut boxes = Vec::with_capacity(BULK_UNITS);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                for _ in 0..BULK_UNITS {
                    boxes.push(Box::new(black_box(TEST_VALUE)));
                }

                boxes.clear();
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}

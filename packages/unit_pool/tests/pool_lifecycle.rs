//! Integration tests for the `unit_pool` package.
//!
//! These tests exercise `UnitPool` through its public API only, covering growth, recycling,
//! teardown and the release contract with a backing allocator that records every region.

#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]

use std::collections::HashSet;
use std::num::NonZero;
use std::ptr::{self, NonNull};

use testing::CountingAlloc;
use unit_pool::{Error, ReleasePolicy, UnitPool};

fn nz(value: usize) -> NonZero<usize> {
    NonZero::new(value).unwrap()
}

fn counting_pool(units_per_increment: usize, unit_size: usize) -> UnitPool<CountingAlloc> {
    UnitPool::builder()
        .units_per_increment(nz(units_per_increment))
        .unit_size(nz(unit_size))
        .backing(CountingAlloc::new())
        .build()
        .unwrap()
}

#[test]
fn create_and_drop_releases_everything() {
    for units_per_increment in [1, 2, 3, 128, 1024] {
        for unit_size in [1, 7, 16, 100] {
            let pool = counting_pool(units_per_increment, unit_size);
            let backing = pool.backing().clone();

            assert_eq!(backing.live_regions(), 2);

            drop(pool);

            backing.assert_no_leaks();
        }
    }
}

#[test]
fn growth_happens_exactly_when_free_list_runs_out() {
    for units_per_increment in [1, 2, 5, 64] {
        let mut pool = counting_pool(units_per_increment, 8);

        for _ in 0..units_per_increment {
            _ = pool.allocate().unwrap();
        }

        assert_eq!(pool.increments(), 1);
        assert_eq!(pool.free_len(), 0);

        _ = pool.allocate().unwrap();

        assert_eq!(pool.increments(), 2);
        assert_eq!(pool.free_len(), units_per_increment - 1);
        assert_eq!(pool.backing().acquired_regions(), 4);
    }
}

#[test]
fn outstanding_units_are_distinct_and_disjoint() {
    let unit_size = 24;
    let mut pool = counting_pool(4, unit_size);

    let mut live: Vec<NonNull<u8>> = Vec::new();

    for step in 0..200_usize {
        // Release a unit on every fourth step, picking a different position each time.
        if step % 4 == 3 && !live.is_empty() {
            let unit = live.swap_remove(step % live.len());
            unsafe { pool.deallocate(unit.as_ptr()) };
        } else {
            let unit = pool.allocate().unwrap();

            // Stamp the whole unit so that any overlap with another live unit shows up below.
            unsafe { unit.write_bytes(u8::try_from(step % 251).unwrap(), unit_size) };
            live.push(unit);
        }

        let distinct: HashSet<_> = live.iter().copied().collect();
        assert_eq!(distinct.len(), live.len());
    }

    // No two live units overlap.
    let mut starts: Vec<usize> = live.iter().map(|unit| unit.addr().get()).collect();
    starts.sort_unstable();

    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= unit_size);
    }

    assert_eq!(pool.len(), live.len());
}

#[test]
fn reallocation_after_release_has_unit_size() {
    let mut pool = counting_pool(8, 40);

    let first = pool.allocate().unwrap();
    unsafe { pool.deallocate(first.as_ptr()) };

    let second = pool.allocate().unwrap();

    // The whole unit is usable, whatever address we got.
    unsafe {
        second.write_bytes(0x5A, pool.unit_size());
        assert_eq!(second.add(pool.unit_size() - 1).read(), 0x5A);
    }

    assert_eq!(pool.unit_size(), 40);
}

#[test]
fn releasing_null_or_with_nothing_outstanding_is_noop() {
    let mut pool = counting_pool(3, 8);

    unsafe { pool.deallocate(ptr::null_mut()) };
    assert_eq!(pool.free_len(), 3);

    let mut not_from_pool = [0_u8; 8];
    unsafe { pool.deallocate(not_from_pool.as_mut_ptr()) };
    assert_eq!(pool.free_len(), 3);
    assert_eq!(pool.len(), 0);

    let unit = pool.allocate().unwrap();
    unsafe { pool.deallocate(ptr::null_mut()) };
    assert_eq!(pool.len(), 1);

    unsafe { pool.deallocate(unit.as_ptr()) };
    assert_eq!(pool.len(), 0);
    assert_eq!(pool.free_len(), 3);

    // All three units are still handed out distinct.
    let units: HashSet<_> = (0..3).map(|_| pool.allocate().unwrap()).collect();
    assert_eq!(units.len(), 3);
    assert_eq!(pool.increments(), 1);
}

#[test]
fn repeated_fill_and_drain_cycles_do_not_grow_further() {
    let units_per_increment = 4;
    let mut pool = counting_pool(units_per_increment, 16);

    let mut previous_capacity = pool.capacity();

    for _round in 0..3 {
        let units: Vec<_> = (0..5 * units_per_increment)
            .map(|_| pool.allocate().unwrap())
            .collect();

        assert!(pool.capacity() >= previous_capacity);
        previous_capacity = pool.capacity();

        for unit in units {
            unsafe { pool.deallocate(unit.as_ptr()) };
        }

        // Five increments are exactly enough for the demand of every round.
        assert_eq!(pool.increments(), 5);
        assert_eq!(pool.free_len(), 5 * units_per_increment);
        assert!(pool.is_empty());
    }

    let backing = pool.backing().clone();
    drop(pool);

    backing.assert_no_leaks();
    assert_eq!(backing.released_regions(), 10);
}

#[test]
fn two_units_of_sixteen_bytes() {
    let mut pool = counting_pool(2, 16);
    assert_eq!(pool.free_len(), 2);

    let first = pool.allocate().unwrap();
    let _second = pool.allocate().unwrap();
    assert_eq!(pool.free_len(), 0);

    let _third = pool.allocate().unwrap();
    assert_eq!(pool.increments(), 2);
    assert_eq!(pool.free_len(), 1);

    unsafe { pool.deallocate(first.as_ptr()) };
    assert_eq!(pool.free_len(), 2);

    let backing = pool.backing().clone();
    drop(pool);

    backing.assert_no_leaks();
    assert_eq!(backing.released_regions(), 4);
}

#[test]
fn construction_failure_leaks_nothing() {
    for grants in [0, 1] {
        let backing = CountingAlloc::new();
        backing.refuse_after(grants);

        let result = UnitPool::builder()
            .unit_size(nz(8))
            .units_per_increment(nz(16))
            .backing(backing.clone())
            .build();

        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
        backing.assert_no_leaks();
    }
}

#[test]
fn allocation_failure_is_recoverable() {
    let mut pool = counting_pool(2, 8);

    let units: Vec<_> = (0..2).map(|_| pool.allocate().unwrap()).collect();

    pool.backing().refuse_all();
    assert!(pool.allocate().is_none());
    assert!(pool.allocate().is_none());

    assert_eq!(pool.capacity(), 2);
    assert_eq!(pool.len(), 2);

    unsafe { pool.deallocate(units[0].as_ptr()) };
    assert!(pool.allocate().is_some());

    let backing = pool.backing().clone();
    drop(pool);
    backing.assert_no_leaks();
}

#[test]
fn strict_policy_rejects_misuse_and_keeps_working() {
    let mut pool = UnitPool::builder()
        .unit_layout_of::<u64>()
        .units_per_increment(nz(2))
        .release_policy(ReleasePolicy::Strict)
        .build()
        .unwrap();

    let mut foreign = 0_u64;
    let foreign_ptr = ptr::from_mut(&mut foreign).cast::<u8>();

    assert!(matches!(
        pool.try_deallocate(foreign_ptr),
        Err(Error::NothingOutstanding { .. })
    ));

    let a = pool.allocate().unwrap();
    let b = pool.allocate().unwrap();
    let c = pool.allocate().unwrap();

    assert!(matches!(
        pool.try_deallocate(foreign_ptr),
        Err(Error::ForeignAddress { .. })
    ));

    pool.try_deallocate(b.as_ptr()).unwrap();
    assert!(matches!(
        pool.try_deallocate(b.as_ptr()),
        Err(Error::AlreadyReleased { .. })
    ));

    // A pointer into the middle of a unit is not a unit.
    let inside = unsafe { a.add(1) };
    assert!(matches!(
        pool.try_deallocate(inside.as_ptr()),
        Err(Error::ForeignAddress { .. })
    ));

    assert_eq!(pool.len(), 2);

    pool.try_deallocate(a.as_ptr()).unwrap();
    pool.try_deallocate(c.as_ptr()).unwrap();
    assert!(pool.is_empty());
    assert_eq!(pool.free_len(), 4);
}

#[test]
fn integrity_holds_through_mixed_workload() {
    let mut pool = UnitPool::builder()
        .unit_size(nz(12))
        .units_per_increment(nz(3))
        .release_policy(ReleasePolicy::Strict)
        .build()
        .unwrap();

    let mut live = Vec::new();

    for step in 0..60_usize {
        if step % 5 < 2 && !live.is_empty() {
            let unit: NonNull<u8> = live.remove(0);
            pool.try_deallocate(unit.as_ptr()).unwrap();
        } else {
            live.push(pool.allocate().unwrap());
        }

        pool.integrity_check();
    }
}

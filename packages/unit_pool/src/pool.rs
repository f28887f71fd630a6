use std::alloc::{GlobalAlloc, Layout, System};
use std::any::type_name;
use std::num::NonZero;
use std::ptr::NonNull;
use std::{fmt, iter, mem, ptr};

use foldhash::{HashSet, HashSetExt};
use new_zealand::nz;
use tracing::{debug, trace, warn};

use crate::{
    Error, IncrementLayout, Region, ReleasePolicy, Result, Unit, UnitIndex, UnitPoolBuilder,
};

/// A pool of fixed-size memory units that grows in constant increments.
///
/// `UnitPool` hands out uninitialized memory units of one size and alignment, fixed when the
/// pool is created. Memory is acquired from the backing allocator in growth increments of
/// a fixed number of units and is only returned to the backing allocator when the pool is
/// dropped. Allocating and releasing a unit is O(1) and does not touch the backing
/// allocator unless the pool has no free unit left, in which case it grows by one increment.
///
/// # Memory Management
///
/// Each growth increment acquires two regions: a descriptor region holding the bookkeeping
/// for the units and a client region holding the units themselves. The pool never grows by
/// more than one increment at a time and never shrinks. Dropping the pool releases every
/// region, even if units are still outstanding; pointers to those units become dangling.
///
/// # Examples
///
/// ```rust
/// use std::num::NonZero;
///
/// use unit_pool::UnitPool;
///
/// let mut pool = UnitPool::new(NonZero::new(2).unwrap(), NonZero::new(16).unwrap()).unwrap();
///
/// let a = pool.allocate().unwrap();
/// let b = pool.allocate().unwrap();
/// assert_ne!(a, b);
/// assert_eq!(pool.increments(), 1);
///
/// // The free list is empty, so this grows the pool by another two units.
/// let c = pool.allocate().unwrap();
/// assert_eq!(pool.increments(), 2);
/// assert_eq!(pool.free_len(), 1);
///
/// // SAFETY: All three pointers came from this pool and are released once.
/// unsafe {
///     pool.deallocate(a.as_ptr());
///     pool.deallocate(b.as_ptr());
///     pool.deallocate(c.as_ptr());
/// }
///
/// assert!(pool.is_empty());
/// ```
///
/// # Thread Safety
///
/// The pool is single-threaded. It is neither [`Send`] nor [`Sync`]; callers that need to
/// use units from several threads must create one pool per thread.
pub struct UnitPool<A: GlobalAlloc + Clone = System> {
    /// The layout of every unit handed out by the pool.
    unit_layout: Layout,

    /// Number of units created by each growth increment.
    units_per_increment: NonZero<usize>,

    /// Precomputed region layouts, shared by every growth increment.
    increment_layout: IncrementLayout,

    release_policy: ReleasePolicy,

    backing: A,

    /// Every descriptor region ever acquired, indexed by increment. A `UnitIndex` refers to
    /// a descriptor in one of these.
    descriptor_regions: Vec<Region<A>>,

    /// Every client region ever acquired, indexed by increment.
    client_regions: Vec<Region<A>>,

    /// Head of the list of descriptors whose units are available.
    free_head: Option<UnitIndex>,

    /// Head of the list of descriptors whose units are issued to callers.
    in_use_head: Option<UnitIndex>,

    /// Length of the free list, tracked to avoid walking the list.
    free_len: usize,

    /// Length of the in-use list, tracked to avoid walking the list.
    in_use_len: usize,

    /// Addresses currently issued to callers. Only maintained under
    /// [`ReleasePolicy::Strict`], `None` otherwise.
    issued: Option<HashSet<NonNull<u8>>>,
}

/// Number of units in a growth increment when the builder is not told otherwise.
#[cfg(not(miri))]
pub(crate) const DEFAULT_UNITS_PER_INCREMENT: NonZero<usize> = nz!(128);

// Under Miri, we use a smaller increment because Miri test runtime scales by memory usage.
#[cfg(miri)]
pub(crate) const DEFAULT_UNITS_PER_INCREMENT: NonZero<usize> = nz!(16);

impl UnitPool {
    /// Creates a builder for configuring and constructing a [`UnitPool`].
    ///
    /// You must specify the unit size or layout before calling `.build()`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::num::NonZero;
    ///
    /// use unit_pool::UnitPool;
    ///
    /// let pool = UnitPool::builder()
    ///     .unit_layout_of::<[u64; 4]>()
    ///     .units_per_increment(NonZero::new(64).unwrap())
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.unit_size(), 32);
    /// assert_eq!(pool.capacity(), 64);
    /// ```
    #[inline]
    pub fn builder() -> UnitPoolBuilder {
        UnitPoolBuilder::new()
    }

    /// Creates a pool of `unit_size`-byte units that grows by `units_per_increment` units at a
    /// time, backed by the system allocator.
    ///
    /// The first growth increment is performed immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the first growth increment cannot acquire its memory
    /// and [`Error::CapacityOverflow`] if one increment would exceed the maximum allocation size.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::num::NonZero;
    ///
    /// use unit_pool::UnitPool;
    ///
    /// let pool = UnitPool::new(NonZero::new(1024).unwrap(), NonZero::new(24).unwrap()).unwrap();
    ///
    /// assert_eq!(pool.unit_size(), 24);
    /// assert_eq!(pool.free_len(), 1024);
    /// ```
    pub fn new(units_per_increment: NonZero<usize>, unit_size: NonZero<usize>) -> Result<Self> {
        Self::builder()
            .units_per_increment(units_per_increment)
            .unit_size(unit_size)
            .build()
    }
}

impl<A: GlobalAlloc + Clone> UnitPool<A> {
    /// Creates a new [`UnitPool`] with the specified configuration and performs the first
    /// growth increment.
    ///
    /// This method is used internally by the builder to construct the actual pool.
    ///
    /// # Panics
    ///
    /// Panics if the layout has zero size.
    pub(crate) fn new_inner(
        unit_layout: Layout,
        units_per_increment: NonZero<usize>,
        release_policy: ReleasePolicy,
        backing: A,
    ) -> Result<Self> {
        assert!(unit_layout.size() > 0, "UnitPool must have non-zero unit size");

        let increment_layout = IncrementLayout::calculate(unit_layout, units_per_increment)?;

        let issued = match release_policy {
            ReleasePolicy::Unchecked => None,
            ReleasePolicy::Strict => Some(HashSet::new()),
        };

        let mut pool = Self {
            unit_layout,
            units_per_increment,
            increment_layout,
            release_policy,
            backing,
            descriptor_regions: Vec::new(),
            client_regions: Vec::new(),
            free_head: None,
            in_use_head: None,
            free_len: 0,
            in_use_len: 0,
            issued,
        };

        pool.grow()?;

        Ok(pool)
    }

    /// Number of units created by each growth increment.
    #[must_use]
    #[inline]
    pub fn units_per_increment(&self) -> NonZero<usize> {
        self.units_per_increment
    }

    /// The layout of every unit handed out by the pool.
    #[must_use]
    #[inline]
    pub fn unit_layout(&self) -> Layout {
        self.unit_layout
    }

    /// The size in bytes of every unit handed out by the pool.
    #[must_use]
    #[inline]
    pub fn unit_size(&self) -> usize {
        self.unit_layout.size()
    }

    /// How the pool validates released units.
    #[must_use]
    #[inline]
    pub fn release_policy(&self) -> ReleasePolicy {
        self.release_policy
    }

    /// The allocator the pool acquires its memory from.
    #[must_use]
    #[inline]
    pub fn backing(&self) -> &A {
        &self.backing
    }

    /// The number of units that are currently allocated and not yet released.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.in_use_len
    }

    /// Whether no unit is currently allocated.
    ///
    /// An empty pool still holds all the memory it has ever acquired.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.in_use_len == 0
    }

    /// The number of units that can be allocated without growing the pool.
    #[must_use]
    #[inline]
    pub fn free_len(&self) -> usize {
        self.free_len
    }

    /// The total number of units the pool has ever created, allocated or not.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        // Overflow here would imply capacity is greater than virtual memory - impossible.
        self.increments()
            .wrapping_mul(self.units_per_increment.get())
    }

    /// The number of growth increments performed so far, including the one performed when
    /// the pool was created.
    #[must_use]
    #[inline]
    pub fn increments(&self) -> usize {
        self.descriptor_regions.len()
    }

    /// Allocates one unit, growing the pool by one increment if no unit is free.
    ///
    /// The returned memory is uninitialized and valid for reads and writes of
    /// [`unit_size()`](Self::unit_size) bytes, aligned to the alignment of
    /// [`unit_layout()`](Self::unit_layout). It stays valid until it is passed to
    /// [`deallocate()`](Self::deallocate) or the pool is dropped.
    ///
    /// Returns `None` if the pool had to grow and the backing allocator refused the memory.
    /// The pool is unchanged in that case and remains fully usable.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::num::NonZero;
    ///
    /// use unit_pool::UnitPool;
    ///
    /// let mut pool = UnitPool::builder().unit_layout_of::<u64>().build().unwrap();
    ///
    /// let unit = pool.allocate().unwrap().cast::<u64>();
    ///
    /// // SAFETY: The unit is valid for a u64 until we release it.
    /// unsafe {
    ///     unit.write(42);
    ///     assert_eq!(unit.read(), 42);
    /// }
    ///
    /// // SAFETY: The unit came from this pool and is released once.
    /// unsafe { pool.deallocate(unit.as_ptr().cast()) };
    /// ```
    #[must_use]
    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        if self.free_head.is_none() && self.grow().is_err() {
            return None;
        }

        let index = self
            .free_head
            .expect("the free list is never empty after a successful growth increment");

        // Move the descriptor from the head of the free list to the head of the in-use list.
        let in_use_head = self.in_use_head;
        let unit = self.unit_mut(index);
        let address = unit.address;
        let next_free = mem::replace(&mut unit.next, in_use_head);

        self.free_head = next_free;
        self.in_use_head = Some(index);

        // Cannot overflow or underflow because the descriptor moved from one list to the other.
        self.free_len = self.free_len.wrapping_sub(1);
        self.in_use_len = self.in_use_len.wrapping_add(1);

        if let Some(issued) = &mut self.issued {
            let newly_issued = issued.insert(address);
            debug_assert!(newly_issued, "unit {address:p} was issued twice");
        }

        Some(address)
    }

    /// Releases a unit previously returned by [`allocate()`](Self::allocate).
    ///
    /// Releasing a null pointer is a no-op. Under the default [`ReleasePolicy::Unchecked`],
    /// releasing while no unit is outstanding is also a no-op and no other validation is
    /// performed. Under [`ReleasePolicy::Strict`], every invalid release panics.
    ///
    /// # Safety
    ///
    /// Unless the pool uses [`ReleasePolicy::Strict`], the caller must ensure that `ptr` is
    /// either null or an address returned by [`allocate()`](Self::allocate) on this pool that
    /// has not been released since. Violating this may cause the pool to issue the same
    /// address twice, or to issue memory it does not own.
    ///
    /// The caller must not access the unit after releasing it.
    ///
    /// # Panics
    ///
    /// Under [`ReleasePolicy::Strict`], panics if the release is rejected for any reason
    /// [`try_deallocate()`](Self::try_deallocate) would return an error for.
    pub unsafe fn deallocate(&mut self, ptr: *mut u8) {
        if self.issued.is_some() {
            if let Err(error) = self.try_deallocate(ptr) {
                panic!("invalid release of unit: {error}");
            }

            return;
        }

        let Some(address) = NonNull::new(ptr) else {
            trace!("ignoring release of null pointer");
            return;
        };

        self.release(address);
    }

    /// Releases a unit previously returned by [`allocate()`](Self::allocate), after checking
    /// that the address is currently issued by this pool.
    ///
    /// Releasing a null pointer is a no-op. The pool is not modified if an error is returned.
    ///
    /// # Errors
    ///
    /// * [`Error::StrictPolicyRequired`] if the pool does not use [`ReleasePolicy::Strict`].
    /// * [`Error::NothingOutstanding`] if no unit is currently allocated.
    /// * [`Error::AlreadyReleased`] if the address is a unit of this pool that is not
    ///   currently allocated.
    /// * [`Error::ForeignAddress`] if the address is not a unit of this pool.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::num::NonZero;
    ///
    /// use unit_pool::{Error, ReleasePolicy, UnitPool};
    ///
    /// let mut pool = UnitPool::builder()
    ///     .unit_size(NonZero::new(8).unwrap())
    ///     .release_policy(ReleasePolicy::Strict)
    ///     .build()
    ///     .unwrap();
    ///
    /// let unit = pool.allocate().unwrap();
    /// pool.try_deallocate(unit.as_ptr()).unwrap();
    ///
    /// assert!(matches!(
    ///     pool.try_deallocate(unit.as_ptr()),
    ///     Err(Error::NothingOutstanding { .. })
    /// ));
    /// ```
    pub fn try_deallocate(&mut self, ptr: *mut u8) -> Result<()> {
        if self.issued.is_none() {
            return Err(Error::StrictPolicyRequired);
        }

        let Some(address) = NonNull::new(ptr) else {
            trace!("ignoring release of null pointer");
            return Ok(());
        };

        self.validate_release(address)?;

        if let Some(issued) = &mut self.issued {
            issued.remove(&address);
        }

        self.release(address);

        Ok(())
    }

    fn validate_release(&self, address: NonNull<u8>) -> Result<()> {
        let addr = address.addr().get();

        if self.in_use_len == 0 {
            return Err(Error::NothingOutstanding { address: addr });
        }

        if self
            .issued
            .as_ref()
            .is_some_and(|issued| issued.contains(&address))
        {
            return Ok(());
        }

        let stride = self.increment_layout.unit_stride();

        if self
            .client_regions
            .iter()
            .any(|region| region.contains_slot(address, stride))
        {
            Err(Error::AlreadyReleased { address: addr })
        } else {
            Err(Error::ForeignAddress { address: addr })
        }
    }

    /// Moves the head of the in-use list to the free list, making it stand for `address`.
    fn release(&mut self, address: NonNull<u8>) {
        let Some(index) = self.in_use_head else {
            trace!(?address, "ignoring release because no unit is outstanding");
            return;
        };

        let free_head = self.free_head;
        let unit = self.unit_mut(index);
        unit.address = address;
        let next_in_use = mem::replace(&mut unit.next, free_head);

        self.in_use_head = next_in_use;
        self.free_head = Some(index);

        // Cannot overflow or underflow because the descriptor moved from one list to the other.
        self.in_use_len = self.in_use_len.wrapping_sub(1);
        self.free_len = self.free_len.wrapping_add(1);
    }

    /// Performs one growth increment, adding `units_per_increment` units to the free list.
    ///
    /// If any memory cannot be acquired, everything acquired by this attempt is released and
    /// the pool is left exactly as it was.
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    fn grow(&mut self) -> Result<()> {
        // Registry slots are reserved before acquiring the regions, so that once the regions
        // exist nothing can fail anymore.
        if self.descriptor_regions.try_reserve(1).is_err()
            || self.client_regions.try_reserve(1).is_err()
        {
            let bytes = mem::size_of::<Region<A>>();
            warn!(bytes, "unit pool could not grow its region registry");
            return Err(Error::OutOfMemory { bytes });
        }

        let descriptors_layout = self.increment_layout.descriptors();
        let Some(descriptors) = Region::acquire(descriptors_layout, &self.backing) else {
            let bytes = descriptors_layout.size();
            warn!(bytes, "unit pool could not acquire a descriptor region");
            return Err(Error::OutOfMemory { bytes });
        };

        let clients_layout = self.increment_layout.clients();
        let Some(clients) = Region::acquire(clients_layout, &self.backing) else {
            // The descriptor region is released when dropped here.
            let bytes = clients_layout.size();
            warn!(bytes, "unit pool could not acquire a client region");
            return Err(Error::OutOfMemory { bytes });
        };

        let increment = self.descriptor_regions.len();
        let stride = self.increment_layout.unit_stride();
        let first_unit_ptr = descriptors.ptr().cast::<Unit>();

        // Link in reverse, so units are handed out in ascending address order.
        for index_in_increment in (0..self.units_per_increment.get()).rev() {
            // Cannot overflow because the client region is this large.
            let offset = index_in_increment.wrapping_mul(stride);

            // SAFETY: offset is within the client region, which holds units_per_increment
            // units of stride bytes each.
            let address = unsafe { clients.ptr().add(offset) };

            // SAFETY: The descriptor region was allocated for units_per_increment descriptors
            // with the layout of Unit, so this stays in bounds and is aligned.
            let unit_ptr = unsafe { first_unit_ptr.add(index_in_increment) };

            // SAFETY: unit_ptr points to uninitialized memory owned by us, valid for writes.
            unsafe {
                ptr::write(
                    unit_ptr.as_ptr(),
                    Unit {
                        address,
                        next: self.free_head,
                    },
                );
            }

            self.free_head = Some(UnitIndex::from_parts(increment, index_in_increment));
        }

        // These cannot reallocate because we reserved the space above.
        self.descriptor_regions.push(descriptors);
        self.client_regions.push(clients);

        // Cannot overflow because that would imply more units than fit in virtual memory.
        self.free_len = self
            .free_len
            .wrapping_add(self.units_per_increment.get());

        debug!(
            increment,
            units = self.units_per_increment.get(),
            bytes = clients_layout.size(),
            "unit pool grew"
        );

        Ok(())
    }

    fn unit_ptr(&self, index: UnitIndex) -> NonNull<Unit> {
        assert!(
            index.index_in_increment() < self.units_per_increment.get(),
            "unit {} out of bounds in increment of {} units",
            index.index_in_increment(),
            self.units_per_increment.get()
        );

        let region = self
            .descriptor_regions
            .get(index.increment())
            .expect("unit index refers to a growth increment that was never performed");

        // SAFETY: The region holds units_per_increment descriptors and the bounds check above
        // keeps us within them.
        unsafe { region.ptr().cast::<Unit>().add(index.index_in_increment()) }
    }

    fn unit(&self, index: UnitIndex) -> &Unit {
        // SAFETY: unit_ptr() returns a pointer to a descriptor initialized by grow(), which
        // lives as long as the pool. We hold a shared reference to the pool.
        unsafe { self.unit_ptr(index).as_ref() }
    }

    #[expect(clippy::needless_pass_by_ref_mut, reason = "false positive")]
    fn unit_mut(&mut self, index: UnitIndex) -> &mut Unit {
        let mut unit_ptr = self.unit_ptr(index);

        // SAFETY: unit_ptr() returns a pointer to a descriptor initialized by grow(), and we
        // hold an exclusive reference to the pool that owns it.
        unsafe { unit_ptr.as_mut() }
    }

    /// Iterates over the descriptors of the list starting at `head`.
    fn list(&self, head: Option<UnitIndex>) -> impl Iterator<Item = UnitIndex> + '_ {
        iter::successors(head, |&index| self.unit(index).next)
    }

    /// Performs an integrity check on the free and in-use lists.
    ///
    /// Verifies that every descriptor the pool has created is in exactly one of the lists
    /// and that the tracked lengths match the lists. Under [`ReleasePolicy::Strict`], also
    /// verifies that every free descriptor stands for a unit of this pool that is not issued.
    ///
    /// This walks every descriptor the pool has ever created, so it is meant for tests and
    /// diagnostics, not for regular use.
    ///
    /// # Panics
    ///
    /// Panics if the pool is corrupted.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    pub fn integrity_check(&self) {
        let capacity = self.capacity();
        let mut observed = vec![false; capacity];

        // Walking at most capacity + 1 steps catches cycles without looping forever.
        let mut visit = |head: Option<UnitIndex>, name: &str| -> usize {
            let mut count: usize = 0;

            for index in self.list(head).take(capacity.wrapping_add(1)) {
                let flat = index.flatten(self.units_per_increment);
                let seen = observed
                    .get_mut(flat)
                    .expect("unit_ptr() bounds checks every index we visit");

                assert!(!*seen, "unit {flat} is reachable twice, found again in {name} list");
                *seen = true;
                count = count.wrapping_add(1);
            }

            count
        };

        let free_count = visit(self.free_head, "free");
        let in_use_count = visit(self.in_use_head, "in-use");

        assert_eq!(
            free_count, self.free_len,
            "free list has {free_count} units but free_len is {}",
            self.free_len
        );
        assert_eq!(
            in_use_count, self.in_use_len,
            "in-use list has {in_use_count} units but in_use_len is {}",
            self.in_use_len
        );
        assert!(
            observed.iter().all(|seen| *seen),
            "some units are in neither the free nor the in-use list"
        );

        if let Some(issued) = &self.issued {
            assert_eq!(issued.len(), self.in_use_len);

            let stride = self.increment_layout.unit_stride();

            for index in self.list(self.free_head) {
                let address = self.unit(index).address;

                assert!(
                    !issued.contains(&address),
                    "free unit {address:p} is also issued"
                );
                assert!(
                    self.client_regions
                        .iter()
                        .any(|region| region.contains_slot(address, stride)),
                    "free unit {address:p} is not a unit of this pool"
                );
            }
        }
    }
}

impl<A: GlobalAlloc + Clone> Drop for UnitPool<A> {
    fn drop(&mut self) {
        debug!(
            increments = self.increments(),
            outstanding = self.in_use_len,
            "releasing unit pool"
        );

        // The lists refer into the descriptor regions, so forget them before the regions go.
        self.free_head = None;
        self.in_use_head = None;

        self.client_regions.clear();
        self.descriptor_regions.clear();
    }
}

impl<A: GlobalAlloc + Clone> fmt::Debug for UnitPool<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("unit_layout", &self.unit_layout)
            .field("units_per_increment", &self.units_per_increment)
            .field("release_policy", &self.release_policy)
            .field("increments", &self.increments())
            .field("len", &self.in_use_len)
            .field("free_len", &self.free_len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::collections::HashSet as StdHashSet;
    use std::fmt::Debug;

    use static_assertions::{assert_impl_all, assert_not_impl_any};
    use testing::CountingAlloc;

    use super::*;

    assert_impl_all!(UnitPool: Debug);
    assert_not_impl_any!(UnitPool: Send, Sync);

    fn counting_pool(
        units_per_increment: NonZero<usize>,
        unit_size: NonZero<usize>,
    ) -> UnitPool<CountingAlloc> {
        UnitPool::builder()
            .units_per_increment(units_per_increment)
            .unit_size(unit_size)
            .backing(CountingAlloc::new())
            .build()
            .unwrap()
    }

    #[test]
    fn smoke_test() {
        let mut pool = UnitPool::new(nz!(3), nz!(4)).unwrap();

        let a = pool.allocate().unwrap().cast::<u32>();
        let b = pool.allocate().unwrap().cast::<u32>();
        let c = pool.allocate().unwrap().cast::<u32>();

        unsafe {
            a.write_unaligned(42);
            b.write_unaligned(43);
            c.write_unaligned(44);

            assert_eq!(a.read_unaligned(), 42);
            assert_eq!(b.read_unaligned(), 43);
            assert_eq!(c.read_unaligned(), 44);
        }

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.free_len(), 0);

        unsafe { pool.deallocate(b.as_ptr().cast()) };
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.free_len(), 1);

        let d = pool.allocate().unwrap().cast::<u32>();
        unsafe {
            d.write_unaligned(45);
            assert_eq!(a.read_unaligned(), 42);
            assert_eq!(c.read_unaligned(), 44);
            assert_eq!(d.read_unaligned(), 45);
        }

        assert_eq!(pool.increments(), 1);
        pool.integrity_check();
    }

    #[test]
    fn construction_performs_one_increment() {
        let pool = counting_pool(nz!(4), nz!(10));

        assert_eq!(pool.increments(), 1);
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.free_len(), 4);
        assert!(pool.is_empty());
        assert_eq!(pool.backing().acquired_regions(), 2);
        assert_eq!(
            pool.backing().acquired_bytes(),
            4 * 10 + 4 * mem::size_of::<Unit>()
        );

        pool.integrity_check();
    }

    #[test]
    fn drop_releases_everything() {
        let pool = counting_pool(nz!(4), nz!(10));
        let backing = pool.backing().clone();

        drop(pool);

        assert_eq!(backing.live_regions(), 0);
        backing.assert_no_leaks();
    }

    #[test]
    fn drop_with_outstanding_units_releases_everything() {
        let mut pool = counting_pool(nz!(2), nz!(8));
        let backing = pool.backing().clone();

        for _ in 0..5 {
            _ = pool.allocate().unwrap();
        }

        assert_eq!(pool.increments(), 3);

        drop(pool);

        backing.assert_no_leaks();
        assert_eq!(backing.released_regions(), 6);
    }

    #[test]
    fn units_per_increment_allocations_do_not_grow() {
        let mut pool = counting_pool(nz!(5), nz!(8));

        for _ in 0..5 {
            _ = pool.allocate().unwrap();
        }

        assert_eq!(pool.increments(), 1);
        assert_eq!(pool.backing().acquired_regions(), 2);

        _ = pool.allocate().unwrap();

        assert_eq!(pool.increments(), 2);
        assert_eq!(pool.backing().acquired_regions(), 4);
        assert_eq!(pool.free_len(), 4);

        pool.integrity_check();
    }

    #[test]
    fn two_by_sixteen_scenario() {
        let mut pool = counting_pool(nz!(2), nz!(16));
        assert_eq!(pool.free_len(), 2);

        let first = pool.allocate().unwrap();
        let _second = pool.allocate().unwrap();
        assert_eq!(pool.free_len(), 0);
        assert_eq!(pool.increments(), 1);

        let _third = pool.allocate().unwrap();
        assert_eq!(pool.increments(), 2);
        assert_eq!(pool.free_len(), 1);

        unsafe { pool.deallocate(first.as_ptr()) };
        assert_eq!(pool.free_len(), 2);
        assert_eq!(pool.len(), 2);

        pool.integrity_check();

        let backing = pool.backing().clone();
        drop(pool);

        backing.assert_no_leaks();
        assert_eq!(backing.released_regions(), 4);
    }

    #[test]
    fn outstanding_units_never_alias() {
        let mut pool = UnitPool::new(nz!(3), nz!(8)).unwrap();
        let mut live = Vec::new();

        // Interleave allocations and releases in an irregular pattern.
        for round in 0..40_usize {
            if round % 3 == 2 {
                let ptr: NonNull<u8> = live.remove(round % live.len());
                unsafe { pool.deallocate(ptr.as_ptr()) };
            } else {
                live.push(pool.allocate().unwrap());
            }

            let distinct: StdHashSet<_> = live.iter().copied().collect();
            assert_eq!(distinct.len(), live.len());
            assert_eq!(pool.len(), live.len());
        }

        pool.integrity_check();
    }

    #[test]
    fn release_then_allocate_returns_unit_of_same_size() {
        let mut pool = UnitPool::new(nz!(4), nz!(32)).unwrap();

        let unit = pool.allocate().unwrap();
        unsafe { pool.deallocate(unit.as_ptr()) };

        let again = pool.allocate().unwrap();

        // The full unit is writable.
        unsafe { again.write_bytes(0xAB, pool.unit_size()) };
        assert_eq!(pool.unit_size(), 32);
    }

    #[test]
    fn release_null_is_noop() {
        let mut pool = UnitPool::new(nz!(2), nz!(8)).unwrap();
        let _unit = pool.allocate().unwrap();

        unsafe { pool.deallocate(ptr::null_mut()) };

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.free_len(), 1);
        pool.integrity_check();
    }

    #[test]
    fn release_with_nothing_outstanding_is_noop() {
        let mut pool = UnitPool::new(nz!(2), nz!(8)).unwrap();
        let mut bogus = 0_u64;

        unsafe { pool.deallocate(ptr::from_mut(&mut bogus).cast()) };

        assert_eq!(pool.len(), 0);
        assert_eq!(pool.free_len(), 2);
        pool.integrity_check();
    }

    #[test]
    fn construction_fails_when_descriptor_region_refused() {
        let backing = CountingAlloc::new();
        backing.refuse_all();

        let result = UnitPool::builder()
            .unit_size(nz!(8))
            .units_per_increment(nz!(4))
            .backing(backing.clone())
            .build();

        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
        backing.assert_no_leaks();
    }

    #[test]
    fn construction_fails_when_client_region_refused() {
        let backing = CountingAlloc::new();
        backing.refuse_after(1);

        let result = UnitPool::builder()
            .unit_size(nz!(8))
            .units_per_increment(nz!(4))
            .backing(backing.clone())
            .build();

        assert!(matches!(result, Err(Error::OutOfMemory { bytes: 32 })));
        assert_eq!(backing.acquired_regions(), 1);
        backing.assert_no_leaks();
    }

    #[test]
    fn failed_growth_returns_none_and_leaves_pool_intact() {
        let mut pool = counting_pool(nz!(2), nz!(8));

        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();

        pool.backing().refuse_after(1);

        assert!(pool.allocate().is_none());
        assert_eq!(pool.increments(), 1);
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.free_len(), 0);
        assert_eq!(pool.backing().live_regions(), 2);
        pool.integrity_check();

        // Releasing a unit makes allocation possible again without growing.
        unsafe { pool.deallocate(a.as_ptr()) };
        assert!(pool.allocate().is_some());
        assert_eq!(pool.increments(), 1);

        // Once the backing allocator cooperates again, the pool grows as usual.
        pool.backing().allow_all();
        assert!(pool.allocate().is_some());
        assert_eq!(pool.increments(), 2);
    }

    #[test]
    fn units_honor_alignment() {
        let layout = Layout::from_size_align(24, 16).unwrap();
        let mut pool = UnitPool::builder()
            .unit_layout(layout)
            .units_per_increment(nz!(3))
            .build()
            .unwrap();

        for _ in 0..10 {
            let unit = pool.allocate().unwrap();
            assert_eq!(unit.addr().get() % 16, 0);
        }
    }

    #[test]
    fn units_are_handed_out_in_ascending_order() {
        let mut pool = UnitPool::new(nz!(4), nz!(8)).unwrap();

        let units: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();

        for pair in units.windows(2) {
            assert_eq!(pair[1].addr().get() - pair[0].addr().get(), 8);
        }
    }

    #[test]
    fn strict_detects_double_release() {
        let mut pool = UnitPool::builder()
            .unit_size(nz!(8))
            .units_per_increment(nz!(4))
            .release_policy(ReleasePolicy::Strict)
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();

        pool.try_deallocate(a.as_ptr()).unwrap();

        let result = pool.try_deallocate(a.as_ptr());
        assert!(matches!(result, Err(Error::AlreadyReleased { .. })));

        // The rejected release did not change the pool.
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.free_len(), 3);
        pool.integrity_check();
    }

    #[test]
    fn strict_detects_foreign_address() {
        let mut pool = UnitPool::builder()
            .unit_size(nz!(8))
            .release_policy(ReleasePolicy::Strict)
            .build()
            .unwrap();

        let _a = pool.allocate().unwrap();
        let mut foreign = 0_u64;

        let result = pool.try_deallocate(ptr::from_mut(&mut foreign).cast());
        assert!(matches!(result, Err(Error::ForeignAddress { .. })));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn strict_detects_release_with_nothing_outstanding() {
        let mut pool = UnitPool::builder()
            .unit_size(nz!(8))
            .release_policy(ReleasePolicy::Strict)
            .build()
            .unwrap();

        let mut foreign = 0_u64;

        let result = pool.try_deallocate(ptr::from_mut(&mut foreign).cast());
        assert!(matches!(result, Err(Error::NothingOutstanding { .. })));
    }

    #[test]
    fn strict_accepts_null() {
        let mut pool = UnitPool::builder()
            .unit_size(nz!(8))
            .release_policy(ReleasePolicy::Strict)
            .build()
            .unwrap();

        pool.try_deallocate(ptr::null_mut()).unwrap();
        unsafe { pool.deallocate(ptr::null_mut()) };
    }

    #[test]
    #[should_panic]
    fn strict_deallocate_panics_on_double_release() {
        let mut pool = UnitPool::builder()
            .unit_size(nz!(8))
            .release_policy(ReleasePolicy::Strict)
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();

        unsafe {
            pool.deallocate(a.as_ptr());
            pool.deallocate(a.as_ptr());
        }
    }

    #[test]
    fn unchecked_pool_cannot_validate() {
        let mut pool = UnitPool::new(nz!(2), nz!(8)).unwrap();
        let a = pool.allocate().unwrap();

        let result = pool.try_deallocate(a.as_ptr());
        assert!(matches!(result, Err(Error::StrictPolicyRequired)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn capacity_overflow_is_reported() {
        let result = UnitPool::new(NonZero::new(usize::MAX / 4).unwrap(), nz!(1024));

        assert!(matches!(result, Err(Error::CapacityOverflow { .. })));
    }

    #[test]
    fn debug_output_includes_counts() {
        let mut pool = UnitPool::new(nz!(2), nz!(8)).unwrap();
        _ = pool.allocate().unwrap();

        let debug_output = format!("{pool:?}");
        assert!(debug_output.contains("UnitPool"));
        assert!(debug_output.contains("len: 1"));
        assert!(debug_output.contains("free_len: 1"));
    }
}

use std::alloc::{GlobalAlloc, Layout};
use std::ptr::NonNull;

/// A raw memory region acquired from a backing allocator, released when dropped.
///
/// The pool keeps every region it ever acquires in a registry of these and never releases
/// a region before the pool itself is dropped.
#[derive(Debug)]
pub(crate) struct Region<A: GlobalAlloc + Clone> {
    ptr: NonNull<u8>,
    layout: Layout,

    /// The allocator that provided the region and will take it back.
    backing: A,
}

impl<A: GlobalAlloc + Clone> Region<A> {
    /// Acquires a region with the given layout, returning `None` if the backing allocator
    /// refuses the request.
    ///
    /// # Panics
    ///
    /// Panics if the layout has zero size.
    #[must_use]
    pub(crate) fn acquire(layout: Layout, backing: &A) -> Option<Self> {
        assert!(layout.size() > 0, "cannot acquire a zero-sized region");

        // SAFETY: The layout is not zero-sized, which is the only requirement of alloc().
        let ptr = NonNull::new(unsafe { backing.alloc(layout) })?;

        Some(Self {
            ptr,
            layout,
            backing: backing.clone(),
        })
    }

    /// Start of the region. The memory is uninitialized until the owner writes to it.
    #[must_use]
    pub(crate) fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[must_use]
    pub(crate) fn layout(&self) -> Layout {
        self.layout
    }

    /// Whether `address` is the start of a `stride`-sized slot inside this region.
    #[must_use]
    pub(crate) fn contains_slot(&self, address: NonNull<u8>, stride: usize) -> bool {
        let Some(offset) = address.addr().get().checked_sub(self.ptr.addr().get()) else {
            return false;
        };

        offset < self.layout.size() && offset.checked_rem(stride) == Some(0)
    }
}

impl<A: GlobalAlloc + Clone> Drop for Region<A> {
    fn drop(&mut self) {
        // SAFETY: The region was allocated by this allocator with this layout in acquire()
        // and this is the only place it is released.
        unsafe {
            self.backing.dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::alloc::System;

    use testing::CountingAlloc;

    use super::*;

    #[test]
    fn released_on_drop() {
        let backing = CountingAlloc::new();
        let layout = Layout::from_size_align(64, 8).unwrap();

        let region = Region::acquire(layout, &backing).unwrap();
        assert_eq!(backing.live_regions(), 1);
        assert_eq!(region.layout(), layout);
        assert_eq!(region.ptr().addr().get() % 8, 0);

        drop(region);

        assert_eq!(backing.live_regions(), 0);
        backing.assert_no_leaks();
    }

    #[test]
    fn refused_request_is_none() {
        let backing = CountingAlloc::new();
        backing.refuse_all();

        let layout = Layout::from_size_align(64, 8).unwrap();
        assert!(Region::acquire(layout, &backing).is_none());
        assert_eq!(backing.acquired_regions(), 0);
    }

    #[test]
    fn contains_slot_checks_bounds_and_stride() {
        let layout = Layout::from_size_align(32, 1).unwrap();
        let region = Region::acquire(layout, &System).unwrap();
        let base = region.ptr();

        assert!(region.contains_slot(base, 8));
        assert!(region.contains_slot(unsafe { base.add(8) }, 8));
        assert!(region.contains_slot(unsafe { base.add(24) }, 8));

        // Inside the region but not on a slot boundary.
        assert!(!region.contains_slot(unsafe { base.add(3) }, 8));

        // One past the end.
        assert!(!region.contains_slot(unsafe { base.add(32) }, 8));

        let elsewhere = [0_u8; 1];
        assert!(!region.contains_slot(NonNull::from(&elsewhere[0]), 8));
    }

    #[test]
    #[should_panic]
    fn zero_sized_region_panics() {
        let layout = Layout::from_size_align(0, 1).unwrap();
        _ = Region::acquire(layout, &System);
    }
}

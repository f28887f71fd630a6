use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A backing allocator that forwards to [`System`] while recording every region it hands out
/// and takes back, and that can be told to refuse requests.
///
/// Clones share the same records, so a test can keep a clone and inspect it after the
/// allocator has been moved into the code under test.
///
/// This is not meant to be a global allocator. It is single-threaded and never panics from
/// inside the allocator methods; anomalies are recorded and reported by
/// [`assert_no_leaks()`](Self::assert_no_leaks).
///
/// # Example
///
/// ```rust
/// use std::alloc::{GlobalAlloc, Layout};
///
/// use testing::CountingAlloc;
///
/// let backing = CountingAlloc::new();
/// let layout = Layout::from_size_align(64, 8).unwrap();
///
/// // SAFETY: The layout is not zero-sized and the region is released with the same layout.
/// unsafe {
///     let ptr = backing.alloc(layout);
///     assert_eq!(backing.live_regions(), 1);
///     backing.dealloc(ptr, layout);
/// }
///
/// backing.assert_no_leaks();
/// ```
#[derive(Clone, Debug, Default)]
pub struct CountingAlloc {
    records: Rc<Records>,
}

#[derive(Debug, Default)]
struct Records {
    acquired_bytes: Cell<usize>,
    released_bytes: Cell<usize>,
    acquired_regions: Cell<usize>,
    released_regions: Cell<usize>,

    /// How many more requests will be granted. `None` means no limit.
    remaining_grants: Cell<Option<usize>>,

    /// Regions handed out and not yet taken back.
    live: RefCell<Vec<(usize, Layout)>>,

    /// Releases of regions that were not live, or were released with a different layout.
    bad_releases: Cell<usize>,
}

impl CountingAlloc {
    /// Creates an allocator that grants every request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants the next `grants` requests, then refuses all requests after that.
    pub fn refuse_after(&self, grants: usize) {
        self.records.remaining_grants.set(Some(grants));
    }

    /// Refuses all requests from now on.
    pub fn refuse_all(&self) {
        self.refuse_after(0);
    }

    /// Grants all requests from now on.
    pub fn allow_all(&self) {
        self.records.remaining_grants.set(None);
    }

    /// Total bytes handed out so far.
    #[must_use]
    pub fn acquired_bytes(&self) -> usize {
        self.records.acquired_bytes.get()
    }

    /// Total bytes taken back so far.
    #[must_use]
    pub fn released_bytes(&self) -> usize {
        self.records.released_bytes.get()
    }

    /// Number of regions handed out so far.
    #[must_use]
    pub fn acquired_regions(&self) -> usize {
        self.records.acquired_regions.get()
    }

    /// Number of regions taken back so far.
    #[must_use]
    pub fn released_regions(&self) -> usize {
        self.records.released_regions.get()
    }

    /// Number of regions handed out and not yet taken back.
    #[must_use]
    pub fn live_regions(&self) -> usize {
        self.records.live.borrow().len()
    }

    /// Asserts that every region handed out was taken back exactly once, with the layout it
    /// was handed out with.
    ///
    /// # Panics
    ///
    /// Panics if any region is still live or any release did not match a live region.
    pub fn assert_no_leaks(&self) {
        assert_eq!(
            self.records.bad_releases.get(),
            0,
            "regions were released that were not live or had a different layout"
        );
        assert_eq!(
            self.live_regions(),
            0,
            "{} regions were never released",
            self.live_regions()
        );
        assert_eq!(self.acquired_bytes(), self.released_bytes());
        assert_eq!(self.acquired_regions(), self.released_regions());
    }

    fn try_grant(&self) -> bool {
        match self.records.remaining_grants.get() {
            None => true,
            Some(0) => false,
            Some(remaining) => {
                self.records
                    .remaining_grants
                    .set(Some(remaining.wrapping_sub(1)));
                true
            }
        }
    }
}

// SAFETY: We forward to the system allocator, which upholds the GlobalAlloc contract. The
// bookkeeping does not touch the memory handed out.
unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !self.try_grant() {
            return std::ptr::null_mut();
        }

        // SAFETY: Forwarding the caller's guarantees about the layout.
        let ptr = unsafe { System.alloc(layout) };

        if !ptr.is_null() {
            let records = &self.records;
            records
                .acquired_bytes
                .set(records.acquired_bytes.get().wrapping_add(layout.size()));
            records
                .acquired_regions
                .set(records.acquired_regions.get().wrapping_add(1));
            records.live.borrow_mut().push((ptr.addr(), layout));
        }

        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let records = &self.records;

        {
            let mut live = records.live.borrow_mut();

            match live
                .iter()
                .position(|&(addr, live_layout)| addr == ptr.addr() && live_layout == layout)
            {
                Some(position) => {
                    live.swap_remove(position);
                }
                None => {
                    records
                        .bad_releases
                        .set(records.bad_releases.get().wrapping_add(1));

                    // We cannot safely hand this to the system allocator.
                    return;
                }
            }
        }

        records
            .released_bytes
            .set(records.released_bytes.get().wrapping_add(layout.size()));
        records
            .released_regions
            .set(records.released_regions.get().wrapping_add(1));

        // SAFETY: The region was handed out by alloc() above with this layout and is live.
        unsafe {
            System.dealloc(ptr, layout);
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use super::*;

    fn layout(size: usize) -> Layout {
        Layout::from_size_align(size, 8).unwrap()
    }

    #[test]
    fn counts_regions_and_bytes() {
        let backing = CountingAlloc::new();

        unsafe {
            let a = backing.alloc(layout(16));
            let b = backing.alloc(layout(32));

            assert_eq!(backing.acquired_bytes(), 48);
            assert_eq!(backing.acquired_regions(), 2);
            assert_eq!(backing.live_regions(), 2);

            backing.dealloc(a, layout(16));
            backing.dealloc(b, layout(32));
        }

        assert_eq!(backing.released_bytes(), 48);
        backing.assert_no_leaks();
    }

    #[test]
    fn clones_share_records() {
        let backing = CountingAlloc::new();
        let observer = backing.clone();

        unsafe {
            let a = backing.alloc(layout(8));
            assert_eq!(observer.live_regions(), 1);
            backing.dealloc(a, layout(8));
        }

        observer.assert_no_leaks();
    }

    #[test]
    fn refuse_after_grants_then_refuses() {
        let backing = CountingAlloc::new();
        backing.refuse_after(1);

        unsafe {
            let a = backing.alloc(layout(8));
            assert!(!a.is_null());

            assert!(backing.alloc(layout(8)).is_null());

            backing.allow_all();
            let b = backing.alloc(layout(8));
            assert!(!b.is_null());

            backing.dealloc(a, layout(8));
            backing.dealloc(b, layout(8));
        }

        backing.assert_no_leaks();
    }

    #[test]
    #[should_panic]
    fn leak_is_detected() {
        let backing = CountingAlloc::new();

        unsafe {
            _ = backing.alloc(layout(8));
        }

        backing.assert_no_leaks();
    }

    #[test]
    #[should_panic]
    fn double_release_is_detected() {
        let backing = CountingAlloc::new();

        unsafe {
            let a = backing.alloc(layout(8));
            backing.dealloc(a, layout(8));
            backing.dealloc(a, layout(8));
        }

        backing.assert_no_leaks();
    }
}

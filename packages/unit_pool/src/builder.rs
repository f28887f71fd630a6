use std::alloc::{GlobalAlloc, Layout, System};
use std::num::NonZero;

use crate::{DEFAULT_UNITS_PER_INCREMENT, ReleasePolicy, Result, UnitPool};

/// Builder for creating an instance of [`UnitPool`].
///
/// [`UnitPool`] requires the unit memory layout to be specified at construction time.
/// Use `.unit_size()` for plain byte-sized units, `.unit_layout()` to provide a specific
/// layout or `.unit_layout_of::<T>()` to generate a layout based on the provided type.
///
/// The unit layout is mandatory, whereas other settings are optional.
///
/// # Examples
///
/// Using a plain unit size:
///
/// ```
/// use std::num::NonZero;
///
/// use unit_pool::UnitPool;
///
/// let pool = UnitPool::builder()
///     .unit_size(NonZero::new(48).unwrap())
///     .units_per_increment(NonZero::new(1024).unwrap())
///     .build()
///     .unwrap();
/// ```
///
/// Using type-based layout:
///
/// ```
/// use unit_pool::UnitPool;
///
/// let pool = UnitPool::builder().unit_layout_of::<u64>().build().unwrap();
/// ```
#[derive(Debug)]
#[must_use]
pub struct UnitPoolBuilder<A: GlobalAlloc + Clone = System> {
    unit_layout: Option<Layout>,
    units_per_increment: NonZero<usize>,
    release_policy: ReleasePolicy,
    backing: A,
}

impl UnitPoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            unit_layout: None,
            units_per_increment: DEFAULT_UNITS_PER_INCREMENT,
            release_policy: ReleasePolicy::default(),
            backing: System,
        }
    }
}

impl<A: GlobalAlloc + Clone> UnitPoolBuilder<A> {
    /// Sets the size of the units handed out by the pool. Units have no alignment
    /// requirement beyond that of a byte and are packed back to back.
    ///
    /// # Panics
    ///
    /// Panics if `unit_size` is greater than `isize::MAX`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::num::NonZero;
    ///
    /// use unit_pool::UnitPool;
    ///
    /// let pool = UnitPool::builder()
    ///     .unit_size(NonZero::new(3).unwrap())
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.unit_size(), 3);
    /// assert_eq!(pool.unit_layout().align(), 1);
    /// ```
    #[inline]
    pub fn unit_size(mut self, unit_size: NonZero<usize>) -> Self {
        let layout = Layout::from_size_align(unit_size.get(), 1)
            .expect("unit size must not exceed isize::MAX");
        self.unit_layout = Some(layout);
        self
    }

    /// Sets the memory layout of the units handed out by the pool.
    ///
    /// # Panics
    ///
    /// Panics if the layout has zero size.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use unit_pool::UnitPool;
    ///
    /// let layout = Layout::from_size_align(24, 8).unwrap();
    /// let pool = UnitPool::builder().unit_layout(layout).build().unwrap();
    ///
    /// assert_eq!(pool.unit_layout(), layout);
    /// ```
    #[inline]
    pub fn unit_layout(mut self, layout: Layout) -> Self {
        assert!(layout.size() > 0, "UnitPool must have non-zero unit size");
        self.unit_layout = Some(layout);
        self
    }

    /// Sets the memory layout of the units handed out by the pool based on a type.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    ///
    /// # Examples
    ///
    /// ```
    /// use unit_pool::UnitPool;
    ///
    /// let pool = UnitPool::builder().unit_layout_of::<u128>().build().unwrap();
    ///
    /// assert_eq!(pool.unit_size(), 16);
    /// ```
    #[inline]
    pub fn unit_layout_of<T>(self) -> Self {
        self.unit_layout(Layout::new::<T>())
    }

    /// Sets how many units the pool acquires each time it runs out of free units.
    ///
    /// The pool always grows by exactly this many units, no matter how large it already is.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::num::NonZero;
    ///
    /// use unit_pool::UnitPool;
    ///
    /// let pool = UnitPool::builder()
    ///     .unit_layout_of::<u64>()
    ///     .units_per_increment(NonZero::new(2).unwrap())
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.capacity(), 2);
    /// ```
    #[inline]
    pub fn units_per_increment(mut self, units: NonZero<usize>) -> Self {
        self.units_per_increment = units;
        self
    }

    /// Sets the [release policy][ReleasePolicy] for the pool. This governs whether the pool
    /// validates the addresses it is given back.
    #[inline]
    pub fn release_policy(mut self, policy: ReleasePolicy) -> Self {
        self.release_policy = policy;
        self
    }

    /// Sets the allocator the pool acquires its memory from. By default, this is
    /// [`System`].
    ///
    /// The pool keeps a clone of the allocator with every region it acquires.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::System;
    ///
    /// use unit_pool::UnitPool;
    ///
    /// let pool = UnitPool::builder()
    ///     .unit_layout_of::<u32>()
    ///     .backing(System)
    ///     .build()
    ///     .unwrap();
    /// ```
    #[inline]
    pub fn backing<B: GlobalAlloc + Clone>(self, backing: B) -> UnitPoolBuilder<B> {
        UnitPoolBuilder {
            unit_layout: self.unit_layout,
            units_per_increment: self.units_per_increment,
            release_policy: self.release_policy,
            backing,
        }
    }

    /// Builds the pool with the specified configuration, performing its first growth
    /// increment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`][crate::Error::OutOfMemory] if the backing allocator
    /// cannot provide the memory for the first growth increment and
    /// [`Error::CapacityOverflow`][crate::Error::CapacityOverflow] if one increment would
    /// exceed the maximum allocation size.
    ///
    /// # Panics
    ///
    /// Panics if no unit layout has been set using [`unit_size`](Self::unit_size),
    /// [`unit_layout`](Self::unit_layout) or [`unit_layout_of`](Self::unit_layout_of).
    pub fn build(self) -> Result<UnitPool<A>> {
        let unit_layout = self.unit_layout.expect(
            "unit layout must be set using .unit_size(), .unit_layout() or .unit_layout_of::<T>() before calling .build()",
        );

        UnitPool::new_inner(
            unit_layout,
            self.units_per_increment,
            self.release_policy,
            self.backing,
        )
    }
}

#[cfg(test)]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;
    use testing::CountingAlloc;

    use super::*;

    assert_impl_all!(UnitPoolBuilder: Send, Sync, std::fmt::Debug);

    #[test]
    fn builder_new_creates_default_state() {
        let builder = UnitPoolBuilder::new();
        assert!(builder.unit_layout.is_none());
        assert_eq!(builder.units_per_increment, DEFAULT_UNITS_PER_INCREMENT);
        assert_eq!(builder.release_policy, ReleasePolicy::Unchecked);
    }

    #[test]
    fn unit_size_sets_byte_aligned_layout() {
        let builder = UnitPoolBuilder::new().unit_size(nz!(7));
        assert_eq!(
            builder.unit_layout,
            Some(Layout::from_size_align(7, 1).unwrap())
        );
    }

    #[test]
    fn layout_of_sets_layout_correctly() {
        let builder = UnitPoolBuilder::new().unit_layout_of::<String>();
        assert_eq!(builder.unit_layout, Some(Layout::new::<String>()));
    }

    #[test]
    #[should_panic]
    fn layout_with_zero_size_panics() {
        let layout = Layout::new::<()>();
        _ = UnitPoolBuilder::new().unit_layout(layout);
    }

    #[test]
    #[should_panic]
    fn layout_of_zero_sized_type_panics() {
        _ = UnitPoolBuilder::new().unit_layout_of::<()>();
    }

    #[test]
    #[should_panic]
    fn build_without_layout_panics() {
        _ = UnitPoolBuilder::new().build();
    }

    #[test]
    fn last_layout_wins() {
        let builder = UnitPoolBuilder::new()
            .unit_size(nz!(3))
            .unit_layout_of::<u64>();
        assert_eq!(builder.unit_layout, Some(Layout::new::<u64>()));

        let builder = UnitPoolBuilder::new()
            .unit_layout_of::<u64>()
            .unit_size(nz!(3));
        assert_eq!(
            builder.unit_layout,
            Some(Layout::from_size_align(3, 1).unwrap())
        );
    }

    #[test]
    fn backing_keeps_other_settings() {
        let builder = UnitPoolBuilder::new()
            .unit_size(nz!(12))
            .units_per_increment(nz!(5))
            .release_policy(ReleasePolicy::Strict)
            .backing(CountingAlloc::new());

        assert_eq!(
            builder.unit_layout,
            Some(Layout::from_size_align(12, 1).unwrap())
        );
        assert_eq!(builder.units_per_increment, nz!(5));
        assert_eq!(builder.release_policy, ReleasePolicy::Strict);
    }

    #[test]
    fn build_applies_configuration() {
        let pool = UnitPoolBuilder::new()
            .unit_layout_of::<[u32; 3]>()
            .units_per_increment(nz!(7))
            .release_policy(ReleasePolicy::Strict)
            .build()
            .unwrap();

        assert_eq!(pool.unit_layout(), Layout::new::<[u32; 3]>());
        assert_eq!(pool.units_per_increment(), nz!(7));
        assert_eq!(pool.release_policy(), ReleasePolicy::Strict);
        assert_eq!(pool.capacity(), 7);
    }

    #[test]
    fn build_with_default_increment() {
        let pool = UnitPoolBuilder::new().unit_size(nz!(8)).build().unwrap();

        assert_eq!(pool.capacity(), DEFAULT_UNITS_PER_INCREMENT.get());
    }

    #[test]
    fn builder_is_debug() {
        let builder = UnitPoolBuilder::new().unit_layout_of::<u32>();
        let debug_output = format!("{builder:?}");
        assert!(debug_output.contains("UnitPoolBuilder"));
    }
}

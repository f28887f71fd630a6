use std::num::NonZero;
use std::ptr::NonNull;

/// Handle of a unit descriptor, locating it within the descriptor regions of the pool.
///
/// Every growth increment creates exactly the same number of descriptors, so a handle is
/// the index of the increment plus the position of the descriptor within that increment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct UnitIndex {
    /// The index of the growth increment (and therefore descriptor region) holding the unit.
    increment: usize,
    /// The index within the descriptor region where the descriptor is stored.
    index_in_increment: usize,
}

impl UnitIndex {
    #[must_use]
    pub(crate) fn from_parts(increment: usize, index_in_increment: usize) -> Self {
        Self {
            increment,
            index_in_increment,
        }
    }

    /// Returns the index of the growth increment holding this unit.
    #[must_use]
    pub(crate) fn increment(&self) -> usize {
        self.increment
    }

    /// Returns the index of the descriptor within its growth increment.
    #[must_use]
    pub(crate) fn index_in_increment(&self) -> usize {
        self.index_in_increment
    }

    /// Returns a dense index over all descriptors of a pool, for diagnostics.
    #[must_use]
    pub(crate) fn flatten(&self, units_per_increment: NonZero<usize>) -> usize {
        // Cannot overflow because the descriptors this indexes all exist in memory.
        self.increment
            .wrapping_mul(units_per_increment.get())
            .wrapping_add(self.index_in_increment)
    }
}

/// Descriptor of one unit, stored in a descriptor region separate from the unit memory.
///
/// A descriptor is a slot that can hold one client address. Which address it holds changes
/// over time because releases store the released address in whatever descriptor is at the
/// head of the in-use list.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Unit {
    /// Client memory this descriptor currently stands for.
    pub(crate) address: NonNull<u8>,

    /// Next descriptor in the list (free or in-use) that currently owns this one.
    pub(crate) next: Option<UnitIndex>,
}

#[cfg(test)]
mod tests {
    use new_zealand::nz;

    use super::*;

    #[test]
    fn parts_round_trip() {
        let index = UnitIndex::from_parts(3, 7);

        assert_eq!(index.increment(), 3);
        assert_eq!(index.index_in_increment(), 7);
    }

    #[test]
    fn flatten_is_dense() {
        let per_increment = nz!(4);

        assert_eq!(UnitIndex::from_parts(0, 0).flatten(per_increment), 0);
        assert_eq!(UnitIndex::from_parts(0, 3).flatten(per_increment), 3);
        assert_eq!(UnitIndex::from_parts(1, 0).flatten(per_increment), 4);
        assert_eq!(UnitIndex::from_parts(2, 1).flatten(per_increment), 9);
    }
}

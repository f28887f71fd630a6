use std::alloc::Layout;
use std::num::NonZero;

use crate::{Error, Result, Unit};

/// Layout calculations for one growth increment of a [`UnitPool`][crate::UnitPool].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct IncrementLayout {
    /// Distance between the start of consecutive units in a client region. This is the unit
    /// size rounded up to the unit alignment, so every unit is properly aligned.
    unit_stride: usize,

    /// Layout of the region holding the descriptors of one increment.
    descriptors: Layout,

    /// Layout of the region holding the client memory of one increment.
    clients: Layout,
}

impl IncrementLayout {
    /// Calculates the region layouts for increments of `units` units of `unit_layout`.
    ///
    /// # Panics
    ///
    /// Panics if the unit layout has zero size.
    pub(crate) fn calculate(unit_layout: Layout, units: NonZero<usize>) -> Result<Self> {
        assert!(
            unit_layout.size() > 0,
            "IncrementLayout cannot be calculated for zero-sized unit layout"
        );

        let unit_stride = unit_layout.pad_to_align().size();

        let overflow = Error::CapacityOverflow {
            units: units.get(),
            unit_stride,
        };

        let descriptors = Layout::array::<Unit>(units.get()).ok();

        let clients = unit_stride
            .checked_mul(units.get())
            .and_then(|size| Layout::from_size_align(size, unit_layout.align()).ok());

        match (descriptors, clients) {
            (Some(descriptors), Some(clients)) => Ok(Self {
                unit_stride,
                descriptors,
                clients,
            }),
            _ => Err(overflow),
        }
    }

    #[must_use]
    pub(crate) fn unit_stride(&self) -> usize {
        self.unit_stride
    }

    #[must_use]
    pub(crate) fn descriptors(&self) -> Layout {
        self.descriptors
    }

    #[must_use]
    pub(crate) fn clients(&self) -> Layout {
        self.clients
    }
}

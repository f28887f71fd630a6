use thiserror::Error;

/// Errors reported by a [`UnitPool`][crate::UnitPool].
///
/// Running out of memory while serving [`allocate()`][crate::UnitPool::allocate] is not an
/// error in this sense. That condition is reported per call by returning `None`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The backing allocator could not provide the memory for the initial growth increment,
    /// so the pool could not be created.
    #[error("backing allocator could not provide {bytes} bytes for a growth increment")]
    OutOfMemory {
        /// Size of the request that was refused.
        bytes: usize,
    },

    /// The memory needed for one growth increment is larger than any allocation can be.
    #[error(
        "growth increment of {units} units with a stride of {unit_stride} bytes exceeds the maximum allocation size"
    )]
    CapacityOverflow {
        /// Units per growth increment.
        units: usize,

        /// Distance in bytes between consecutive units.
        unit_stride: usize,
    },

    /// Validated release was requested from a pool that does not record issued addresses.
    #[error("validated release requires a pool built with ReleasePolicy::Strict")]
    StrictPolicyRequired,

    /// A unit was released while no unit was issued by the pool.
    #[error("cannot release {address:#x} because the pool has no outstanding units")]
    NothingOutstanding {
        /// The address that was passed in.
        address: usize,
    },

    /// The address is a unit of this pool but that unit is not currently issued.
    #[error("unit {address:#x} is not currently issued, it was already released")]
    AlreadyReleased {
        /// The address that was passed in.
        address: usize,
    },

    /// The address is not a unit of this pool.
    #[error("address {address:#x} is not a unit of this pool")]
    ForeignAddress {
        /// The address that was passed in.
        address: usize,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn messages_include_addresses_in_hex() {
        let error = Error::ForeignAddress { address: 0xbeef };
        assert_eq!(error.to_string(), "address 0xbeef is not a unit of this pool");

        let error = Error::AlreadyReleased { address: 0x10 };
        assert!(error.to_string().contains("0x10"));

        let error = Error::NothingOutstanding { address: 0x20 };
        assert!(error.to_string().contains("0x20"));
    }

    #[test]
    fn out_of_memory_reports_size() {
        let error = Error::OutOfMemory { bytes: 4096 };

        let result: Result<()> = Err(error);
        let message = result.expect_err("constructed as an error").to_string();
        assert!(message.contains("4096"));
    }
}

/// Determines how much checking the pool does when a unit is released.
///
/// By default, the pool trusts the caller and releases units without any validation.
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use unit_pool::{ReleasePolicy, UnitPool};
///
/// // The release policy is set at pool creation time.
/// let pool = UnitPool::builder()
///     .unit_size(NonZero::new(16).unwrap())
///     .release_policy(ReleasePolicy::Strict)
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.release_policy(), ReleasePolicy::Strict);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum ReleasePolicy {
    /// Released addresses are not validated. Releasing a null pointer or releasing while no
    /// unit is outstanding is silently ignored. This is the default.
    ///
    /// Releasing an address that did not come from the pool, or releasing the same address
    /// twice, corrupts the pool: the address may later be issued twice.
    #[default]
    Unchecked,

    /// The pool remembers every address it has issued and validates each release against
    /// that record. Invalid releases are reported as errors by
    /// [`try_deallocate()`][crate::UnitPool::try_deallocate] and cause a panic in
    /// [`deallocate()`][crate::UnitPool::deallocate].
    ///
    /// This costs a hash set insertion per allocation and a lookup per release.
    Strict,
}

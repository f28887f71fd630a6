//! A single-threaded pool of fixed-size memory units.
//!
//! This crate provides [`UnitPool`], an allocator that hands out equally sized, uninitialized
//! memory units and takes them back in O(1). The pool acquires memory from a backing allocator
//! in growth increments of a fixed number of units and keeps all of it until the pool is
//! dropped, which makes it a good fit for workloads that allocate and release many small,
//! short-lived objects in tight loops.
//!
//! # Key Features
//!
//! - **Constant-time allocation and release**: Free units are kept on a list; only an empty
//!   free list touches the backing allocator
//! - **Fixed growth increments**: The pool grows by the same number of units every time,
//!   it never doubles and never shrinks
//! - **Recoverable exhaustion**: A growth increment that cannot get memory makes that one
//!   [`allocate()`](UnitPool::allocate) call return `None` and leaves the pool usable
//! - **Pluggable backing allocator**: Any [`std::alloc::GlobalAlloc`] can provide the memory
//! - **Optional release validation**: [`ReleasePolicy::Strict`] detects double releases and
//!   foreign addresses
//!
//! # Release contract
//!
//! By default the pool does not validate what it is given back. Releasing an address that is
//! not currently issued by the pool corrupts it, which is why
//! [`deallocate()`](UnitPool::deallocate) is `unsafe`. Pools built with
//! [`ReleasePolicy::Strict`] also offer the safe [`try_deallocate()`](UnitPool::try_deallocate).
//!
//! # Examples
//!
//! ```rust
//! use std::num::NonZero;
//!
//! use unit_pool::UnitPool;
//!
//! let mut pool = UnitPool::new(NonZero::new(128).unwrap(), NonZero::new(32).unwrap()).unwrap();
//!
//! let units: Vec<_> = (0..200).map(|_| pool.allocate().unwrap()).collect();
//!
//! // 200 units need two increments of 128 units.
//! assert_eq!(pool.increments(), 2);
//! assert_eq!(pool.len(), 200);
//!
//! for unit in units {
//!     // SAFETY: Every unit came from this pool and is released once.
//!     unsafe { pool.deallocate(unit.as_ptr()) };
//! }
//!
//! // Released units are recycled, the pool keeps its capacity.
//! assert!(pool.is_empty());
//! assert_eq!(pool.capacity(), 256);
//! ```
//!
//! # Thread safety
//!
//! The pool is single-threaded and is neither [`Send`] nor [`Sync`]. Use one pool per thread
//! or put the pool behind your own lock.

mod builder;
mod error;
mod layout;
mod pool;
mod region;
mod release_policy;
mod unit;

pub use builder::*;
pub use error::Error;
pub(crate) use error::Result;
pub(crate) use layout::*;
pub use pool::UnitPool;
pub(crate) use pool::DEFAULT_UNITS_PER_INCREMENT;
pub(crate) use region::*;
pub use release_policy::*;
pub(crate) use unit::*;

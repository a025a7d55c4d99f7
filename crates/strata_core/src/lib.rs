//! # STRATA Core
//!
//! Engine-agnostic building blocks shared by the clustered vertex storage:
//! - Generation-checked handle pool for long-lived, relocatable records
//! - Render-thread affinity guard
//! - Frame clocks for deadline-bounded background work
//!
//! ## Architecture Rules
//!
//! 1. **Handles, not references** - Records are addressed by generational handles
//! 2. **One owner thread** - Mutating GPU-facing state happens on the render thread
//! 3. **Deterministic time in tests** - Deadlines are read through a [`Clock`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_core::PoolAllocator;
//!
//! let mut pool: PoolAllocator<u32> = PoolAllocator::new(1024);
//! let handle = pool.allocate(7);
//! assert_eq!(pool.free(handle), Some(7));
//! assert!(pool.get(handle).is_none()); // stale
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod memory;
pub mod sync;
pub mod time;

pub use memory::{PoolAllocator, PoolHandle};
pub use sync::ThreadAffinity;
pub use time::{Clock, ManualClock, MonotonicClock};

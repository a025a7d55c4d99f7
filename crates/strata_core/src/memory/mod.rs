//! # Memory Management
//!
//! Generation-checked pools for records that outlive a single frame.
//!
//! ## Design Philosophy
//!
//! Storage is reserved up front and slots are recycled. A released slot
//! bumps its generation, so any handle still pointing at it stops resolving:
//! - No dangling references
//! - No silent aliasing after reuse
//! - O(1) allocate, free and lookup

mod pool;

pub use pool::{PoolAllocator, PoolHandle};

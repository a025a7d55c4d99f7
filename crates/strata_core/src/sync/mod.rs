//! # Thread Ownership
//!
//! GPU resource handles cannot be mutated from several threads at once.
//! Instead of locking, every structure that touches them is owned by a single
//! render thread and checks that ownership on entry.
//!
//! ```text
//!   Worker threads (meshing)          Render thread
//!   ───────────────────────           ─────────────
//!   build vertex bytes      ──move──► allocate / release / compact
//!                                     (ThreadAffinity::assert_owner)
//! ```

mod affinity;

pub use affinity::ThreadAffinity;

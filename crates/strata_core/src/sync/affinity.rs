//! Render-thread affinity guard.

use std::thread::{self, ThreadId};

/// Records which thread owns a structure and checks it on entry.
///
/// The check is a `debug_assert!`: a violation is a programming error in the
/// caller, fatal in debug builds and free in release builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadAffinity {
    owner: ThreadId,
}

impl ThreadAffinity {
    /// Binds to the calling thread.
    #[must_use]
    pub fn current() -> Self {
        Self {
            owner: thread::current().id(),
        }
    }

    /// Returns the owning thread.
    #[inline]
    #[must_use]
    pub const fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Returns true if called from the owning thread.
    #[inline]
    #[must_use]
    pub fn is_owner(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Moves ownership to the calling thread.
    ///
    /// Used when a structure is built on one thread and then handed to the
    /// render thread before first use.
    pub fn rebind(&mut self) {
        self.owner = thread::current().id();
    }

    /// Panics in debug builds if called from any thread but the owner.
    #[inline]
    #[track_caller]
    pub fn assert_owner(&self) {
        debug_assert!(
            self.is_owner(),
            "render-thread structure used from {:?}, owned by {:?}",
            thread::current().id(),
            self.owner
        );
    }
}

impl Default for ThreadAffinity {
    fn default() -> Self {
        Self::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_thread_passes() {
        let affinity = ThreadAffinity::current();
        assert!(affinity.is_owner());
        affinity.assert_owner();
    }

    #[test]
    fn test_other_thread_is_not_owner() {
        let affinity = ThreadAffinity::current();
        let seen = thread::spawn(move || affinity.is_owner()).join().unwrap();
        assert!(!seen);
    }

    #[test]
    fn test_rebind_moves_ownership() {
        let affinity = ThreadAffinity::current();
        let rebound = thread::spawn(move || {
            let mut moved = affinity;
            moved.rebind();
            moved.is_owner()
        })
        .join()
        .unwrap();
        assert!(rebound);
    }
}

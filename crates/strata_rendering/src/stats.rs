//! Storage diagnostics.
//!
//! Snapshots are taken on the render thread and published through a
//! [`StatsHandle`] so overlays on other threads can read them. A snapshot
//! is only as fresh as the last [`end_frame`](crate::ClusteredVertexStorage::end_frame).

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cluster::RealmKind;

/// Per-realm counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RealmStats {
    /// Live clusters.
    pub clusters: usize,
    /// Live regions.
    pub regions: usize,
    /// Slabs held by clusters.
    pub slabs: usize,
    /// Sum of live region bytes.
    pub active_bytes: u64,
    /// Capacity of slabs held by clusters.
    pub capacity_bytes: u64,
}

/// Whole-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Counters indexed by [`RealmKind::index`].
    pub realms: [RealmStats; 2],
    /// Slabs not yet destroyed, including retired ones.
    pub slab_count: usize,
    /// Capacity of those slabs.
    pub slab_bytes: u64,
    /// Slabs awaiting destruction.
    pub retired_slabs: usize,
    /// Compaction tasks queued.
    pub pending_tasks: usize,
}

impl StorageStats {
    /// Counters of one realm.
    #[must_use]
    pub const fn realm(&self, kind: RealmKind) -> &RealmStats {
        &self.realms[kind.index()]
    }

    /// Live regions over both realms.
    #[must_use]
    pub fn regions(&self) -> usize {
        self.realms.iter().map(|r| r.regions).sum()
    }

    /// Live region bytes over both realms.
    #[must_use]
    pub fn active_bytes(&self) -> u64 {
        self.realms.iter().map(|r| r.active_bytes).sum()
    }

    /// Share of live slab capacity not holding live vertices, in `[0, 1]`.
    #[must_use]
    pub fn fragmentation(&self) -> f64 {
        let capacity: u64 = self.realms.iter().map(|r| r.capacity_bytes).sum();
        if capacity == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let used = self.active_bytes() as f64 / capacity as f64;
        1.0 - used
    }
}

impl fmt::Display for StorageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let solid = self.realm(RealmKind::Solid);
        let translucent = self.realm(RealmKind::Translucent);
        write!(
            f,
            "clusters {}/{} regions {} slabs {} ({} KiB, {} retired) active {} KiB frag {:.1}% tasks {}",
            solid.clusters,
            translucent.clusters,
            self.regions(),
            self.slab_count,
            self.slab_bytes / 1024,
            self.retired_slabs,
            self.active_bytes() / 1024,
            self.fragmentation() * 100.0,
            self.pending_tasks
        )
    }
}

/// Shared, read-only view of the latest published snapshot.
#[derive(Debug, Clone, Default)]
pub struct StatsHandle {
    inner: Arc<RwLock<StorageStats>>,
}

impl StatsHandle {
    /// Latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StorageStats {
        *self.inner.read()
    }

    pub(crate) fn publish(&self, stats: StorageStats) {
        *self.inner.write() = stats;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragmentation() {
        let mut stats = StorageStats::default();
        assert!(stats.fragmentation().abs() < f64::EPSILON);

        stats.realms[0].active_bytes = 1024;
        stats.realms[0].capacity_bytes = 4096;
        assert!((stats.fragmentation() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_display_summary() {
        let mut stats = StorageStats::default();
        stats.realms[0].clusters = 2;
        stats.realms[1].clusters = 1;
        stats.slab_count = 3;
        let line = stats.to_string();
        assert!(line.starts_with("clusters 2/1"));
        assert!(line.contains("slabs 3"));
    }

    #[test]
    fn test_handle_shares_snapshot() {
        let handle = StatsHandle::default();
        let reader = handle.clone();
        let stats = StorageStats {
            pending_tasks: 4,
            ..StorageStats::default()
        };
        handle.publish(stats);
        assert_eq!(reader.snapshot().pending_tasks, 4);
    }
}

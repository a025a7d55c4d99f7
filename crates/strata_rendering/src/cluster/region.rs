//! Live regions and the handles callers hold for them.

use strata_core::PoolHandle;

use super::realm::RealmKind;
use super::slab::SlabAllocation;
use super::storage::{RegionOrigin, StorageId};
use super::vertex_cluster::ClusterKey;

/// The allocation a live region holds in its cluster.
///
/// The wrapped [`SlabAllocation`] is swapped during compaction; the region's
/// identity, size and origin never change.
#[derive(Debug)]
pub struct RegionAllocation {
    storage_id: StorageId,
    origin: RegionOrigin,
    byte_count: u32,
    allocation: SlabAllocation,
}

impl RegionAllocation {
    pub(crate) fn new(
        storage_id: StorageId,
        origin: RegionOrigin,
        byte_count: u32,
        allocation: SlabAllocation,
    ) -> Self {
        Self {
            storage_id,
            origin,
            byte_count,
            allocation,
        }
    }

    /// Identity of the storage record this region was uploaded from.
    #[inline]
    #[must_use]
    pub const fn storage_id(&self) -> StorageId {
        self.storage_id
    }

    /// Region origin.
    #[inline]
    #[must_use]
    pub const fn origin(&self) -> RegionOrigin {
        self.origin
    }

    /// Vertex bytes held by the region.
    #[inline]
    #[must_use]
    pub const fn byte_count(&self) -> u32 {
        self.byte_count
    }

    /// Current backing range.
    #[inline]
    #[must_use]
    pub const fn allocation(&self) -> &SlabAllocation {
        &self.allocation
    }

    /// Re-homes the region and hands back the superseded allocation.
    ///
    /// `replacement` must already hold the region's vertices. The caller
    /// releases the returned allocation afterwards, so the region is never
    /// without a populated range.
    pub(crate) fn transfer(&mut self, replacement: SlabAllocation) -> SlabAllocation {
        debug_assert_eq!(
            replacement.quad_vertex_count(),
            self.allocation.quad_vertex_count(),
            "transfer changed the size of region {:?}",
            self.storage_id
        );
        debug_assert!(replacement.quad_vertex_count() > 0);
        std::mem::replace(&mut self.allocation, replacement)
    }

    pub(crate) fn into_allocation(self) -> SlabAllocation {
        self.allocation
    }
}

/// Caller-side handle to a live region.
///
/// Not `Clone`: releasing consumes the handle. Handles also go stale when
/// their realm is cleared, which lookups report instead of aliasing a
/// reused slot.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct RegionHandle {
    pub(crate) realm: RealmKind,
    pub(crate) cluster: ClusterKey,
    pub(crate) slot: PoolHandle,
    pub(crate) storage_id: StorageId,
    pub(crate) origin: RegionOrigin,
}

impl RegionHandle {
    /// Realm holding the region.
    #[inline]
    #[must_use]
    pub const fn realm(&self) -> RealmKind {
        self.realm
    }

    /// Cluster holding the region.
    #[inline]
    #[must_use]
    pub const fn cluster(&self) -> ClusterKey {
        self.cluster
    }

    /// Identity of the uploaded storage record.
    #[inline]
    #[must_use]
    pub const fn storage_id(&self) -> StorageId {
        self.storage_id
    }

    /// Region origin, for bounds tests by the draw list.
    #[inline]
    #[must_use]
    pub const fn origin(&self) -> RegionOrigin {
        self.origin
    }
}

//! Vertex clusters: the slabs of one spatial neighborhood.
//!
//! ## Lifecycle
//!
//! ```text
//!   Active ──(2nd slab claimed)──► Scheduled ──(compaction)──► Active
//!     │                                                          │
//!     └──────────────(last region released / clear)──────────────┴──► Closed
//! ```
//!
//! New regions go into the "hungry" slab. When it cannot take a region, a
//! new slab sized for everything live plus the newcomer becomes hungry, so
//! a later compaction can usually move the rest into it without claiming
//! yet another slab.

use std::collections::HashMap;

use strata_core::{PoolAllocator, PoolHandle};

use crate::error::{ClusterError, ClusterResult};
use crate::gpu::{DrawBindingId, GpuBackend, GpuBufferId};

use super::realm::RealmKind;
use super::region::RegionAllocation;
use super::slab::{Slab, SlabId};
use super::slab_allocator::SlabAllocator;
use super::storage::{ClusteredDrawableStorage, StorageId};

/// Region records of one realm.
pub(crate) type RegionPool = PoolAllocator<RegionAllocation>;

/// Coarsened region origin shared by every region of a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterKey {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
    /// Z coordinate.
    pub z: i32,
}

impl ClusterKey {
    /// Creates a key.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Where a cluster is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    /// Holds regions; no compaction pending.
    Active,
    /// A compaction task is queued.
    Scheduled,
    /// All regions and slabs released.
    Closed,
}

/// One drawable region range inside a slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRange {
    /// Storage record the range belongs to.
    pub storage_id: StorageId,
    /// First vertex record.
    pub base_quad_vertex_index: u32,
    /// Number of vertex records.
    pub quad_vertex_count: u32,
    /// Per-range draw binding.
    pub binding: DrawBindingId,
}

/// Every live range of one slab, in buffer order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlabBatch {
    /// Slab identity.
    pub slab: SlabId,
    /// GPU buffer to bind.
    pub buffer: Option<GpuBufferId>,
    /// Live ranges sorted by base vertex.
    pub ranges: Vec<DrawRange>,
}

/// Result of one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Regions copied into the hungry slab.
    pub moved_regions: usize,
    /// Bytes copied.
    pub moved_bytes: u64,
    /// Slabs retired by the pass.
    pub retired_slabs: usize,
}

/// All slabs and regions of one spatial cluster.
#[derive(Debug)]
pub struct VertexCluster {
    /// Distinguishes successive clusters that reuse the same key.
    id: u64,
    key: ClusterKey,
    realm: RealmKind,
    slabs: Vec<Slab>,
    hungry: Option<SlabId>,
    regions: HashMap<StorageId, PoolHandle>,
    /// Sum of live region sizes, independent of fragmentation.
    active_bytes: u64,
    is_scheduled: bool,
    is_closed: bool,
}

impl VertexCluster {
    pub(crate) fn new(id: u64, key: ClusterKey, realm: RealmKind) -> Self {
        Self {
            id,
            key,
            realm,
            slabs: Vec::new(),
            hungry: None,
            regions: HashMap::new(),
            active_bytes: 0,
            is_scheduled: false,
            is_closed: false,
        }
    }

    /// Instance id, unique within the realm.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Spatial key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> ClusterKey {
        self.key
    }

    /// Owning realm.
    #[inline]
    #[must_use]
    pub const fn realm(&self) -> RealmKind {
        self.realm
    }

    /// Slabs in claim order.
    #[inline]
    #[must_use]
    pub fn slabs(&self) -> &[Slab] {
        &self.slabs
    }

    /// Slab currently receiving new regions.
    #[must_use]
    pub fn hungry_slab(&self) -> Option<&Slab> {
        self.hungry_index().map(|i| &self.slabs[i])
    }

    /// Live region count.
    #[inline]
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Handles of every live region.
    pub fn regions(&self) -> impl Iterator<Item = PoolHandle> + '_ {
        self.regions.values().copied()
    }

    /// Sum of live region byte counts.
    #[inline]
    #[must_use]
    pub const fn active_bytes(&self) -> u64 {
        self.active_bytes
    }

    /// Total slab capacity.
    #[must_use]
    pub fn capacity_bytes(&self) -> u64 {
        self.slabs.iter().map(|s| u64::from(s.capacity_bytes())).sum()
    }

    /// True while a compaction task is queued.
    #[inline]
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        self.is_scheduled
    }

    /// True once every region and slab is gone.
    #[inline]
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.is_closed
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ClusterState {
        if self.is_closed {
            ClusterState::Closed
        } else if self.is_scheduled {
            ClusterState::Scheduled
        } else {
            ClusterState::Active
        }
    }

    /// Live ranges grouped per slab, for batched drawing.
    #[must_use]
    pub fn batches(&self, pool: &PoolAllocator<RegionAllocation>) -> Vec<SlabBatch> {
        let mut batches: Vec<SlabBatch> = self
            .slabs
            .iter()
            .map(|slab| SlabBatch {
                slab: slab.id(),
                buffer: slab.buffer(),
                ranges: Vec::new(),
            })
            .collect();

        for region in self.regions.values().filter_map(|slot| pool.get(*slot)) {
            let allocation = region.allocation();
            if let Some(batch) = batches.iter_mut().find(|b| b.slab == allocation.slab()) {
                batch.ranges.push(DrawRange {
                    storage_id: region.storage_id(),
                    base_quad_vertex_index: allocation.base_quad_vertex_index(),
                    quad_vertex_count: allocation.quad_vertex_count(),
                    binding: allocation.binding(),
                });
            }
        }

        for batch in &mut batches {
            batch.ranges.sort_unstable_by_key(|r| r.base_quad_vertex_index);
        }
        batches
    }

    /// Uploads a region into the hungry slab.
    ///
    /// Returns `Ok(None)` without touching the GPU if the region was closed
    /// while its upload was in flight, or if it holds no vertices.
    pub(crate) fn allocate<B: GpuBackend>(
        &mut self,
        storage: ClusteredDrawableStorage,
        pool: &mut RegionPool,
        allocator: &mut SlabAllocator<B>,
    ) -> ClusterResult<Option<PoolHandle>> {
        debug_assert!(!self.is_closed, "allocation into closed cluster {:?}", self.key);

        if storage.is_closed() {
            tracing::trace!("dropped upload of closed region {:?}", storage.id());
            return Ok(None);
        }

        let bytes_per_vertex = allocator.bytes_per_vertex();
        let byte_count = storage.byte_count();
        if byte_count % bytes_per_vertex != 0 {
            return Err(ClusterError::MisalignedTransfer {
                bytes: byte_count,
                bytes_per_vertex,
            });
        }
        if byte_count == 0 {
            return Ok(None);
        }

        let index = self.prepare_hungry(byte_count, allocator);
        let storage_id = storage.id();
        let origin = storage.origin();
        let Some(allocation) =
            self.slabs[index].allocate_and_load(allocator.backend_mut(), storage.into_transfer())
        else {
            return Ok(None);
        };

        let slot = pool.allocate(RegionAllocation::new(storage_id, origin, byte_count, allocation));
        self.regions.insert(storage_id, slot);
        self.active_bytes += u64::from(byte_count);
        self.release_vacated(allocator);

        tracing::trace!(
            "cluster {:?}: region {:?} +{} bytes ({} active, {} slabs)",
            self.key,
            storage_id,
            byte_count,
            self.active_bytes,
            self.slabs.len()
        );
        Ok(Some(slot))
    }

    /// True if a compaction task should be queued.
    #[inline]
    #[must_use]
    pub(crate) fn needs_compaction(&self) -> bool {
        !self.is_closed && !self.is_scheduled && self.slabs.len() > 1
    }

    pub(crate) fn mark_scheduled(&mut self) {
        self.is_scheduled = true;
    }

    /// Releases one region. Closes the cluster when it was the last one.
    pub(crate) fn on_region_closed<B: GpuBackend>(
        &mut self,
        slot: PoolHandle,
        pool: &mut RegionPool,
        allocator: &mut SlabAllocator<B>,
    ) -> ClusterResult<()> {
        let region = pool.free(slot).ok_or(ClusterError::StaleHandle)?;
        let removed = self.regions.remove(&region.storage_id());
        debug_assert_eq!(removed, Some(slot), "region not registered in cluster {:?}", self.key);

        self.active_bytes -= u64::from(region.byte_count());
        let slab_id = region.allocation().slab();
        let index = self.slab_index(slab_id);
        debug_assert!(index.is_some(), "region points at foreign slab {slab_id:?}");
        let Some(index) = index else {
            return Ok(());
        };

        let storage_id = region.storage_id();
        region
            .into_allocation()
            .release(&mut self.slabs[index], allocator.backend_mut());

        if self.slabs[index].is_empty() {
            if self.hungry == Some(slab_id) {
                self.slabs[index].reclaim();
            } else {
                // Fully vacated: no need to wait for compaction.
                let slab = self.slabs.remove(index);
                slab.release(allocator);
            }
        }

        tracing::trace!(
            "cluster {:?}: region {:?} released ({} active, {} slabs)",
            self.key,
            storage_id,
            self.active_bytes,
            self.slabs.len()
        );

        if self.regions.is_empty() {
            self.close(pool, allocator);
        }
        Ok(())
    }

    /// Moves every region into a single slab.
    ///
    /// Each region is copied before its old range is released, so it stays
    /// drawable throughout. The pass is not split across frames.
    pub(crate) fn compact<B: GpuBackend>(
        &mut self,
        pool: &mut RegionPool,
        allocator: &mut SlabAllocator<B>,
    ) -> CompactionReport {
        self.is_scheduled = false;
        let mut report = CompactionReport::default();
        if self.is_closed || self.slabs.len() < 2 {
            return report;
        }

        let target = self.prepare_compaction_target(allocator);
        let hungry_id = self.slabs[target].id();

        let slabs = &mut self.slabs;
        for slot in self.regions.values() {
            let region = pool.get_mut(*slot);
            debug_assert!(region.is_some(), "cluster holds stale region slot {slot:?}");
            let Some(region) = region else {
                continue;
            };
            let source_id = region.allocation().slab();
            if source_id == hungry_id {
                continue;
            }
            let source = slabs.iter().position(|s| s.id() == source_id);
            debug_assert!(source.is_some(), "region points at foreign slab {source_id:?}");
            let Some(source) = source else {
                continue;
            };
            let Some(source_buffer) = slabs[source].buffer() else {
                continue;
            };

            // The target was sized for every live region, so this cannot fail.
            let Some(replacement) =
                slabs[target].transfer_from(allocator.backend_mut(), region.allocation(), source_buffer)
            else {
                continue;
            };
            let superseded = region.transfer(replacement);
            superseded.release(&mut slabs[source], allocator.backend_mut());

            report.moved_regions += 1;
            report.moved_bytes += u64::from(region.byte_count());
        }

        allocator.backend_mut().submit();
        report.retired_slabs = self.release_vacated(allocator);
        debug_assert_eq!(self.slabs.len(), 1, "compaction left {} slabs", self.slabs.len());

        tracing::debug!(
            "compacted cluster {:?}: moved {} regions ({} bytes), retired {} slabs, {} bytes active in {} bytes",
            self.key,
            report.moved_regions,
            report.moved_bytes,
            report.retired_slabs,
            self.active_bytes,
            self.capacity_bytes()
        );
        report
    }

    /// Force-releases every region and slab.
    pub(crate) fn close<B: GpuBackend>(
        &mut self,
        pool: &mut RegionPool,
        allocator: &mut SlabAllocator<B>,
    ) {
        if self.is_closed {
            return;
        }

        for (_, slot) in self.regions.drain() {
            let Some(region) = pool.free(slot) else {
                continue;
            };
            let slab_id = region.allocation().slab();
            if let Some(slab) = self.slabs.iter_mut().find(|s| s.id() == slab_id) {
                region.into_allocation().release(slab, allocator.backend_mut());
            }
        }

        for slab in self.slabs.drain(..) {
            slab.release(allocator);
        }
        self.hungry = None;
        self.active_bytes = 0;
        self.is_scheduled = false;
        self.is_closed = true;
        tracing::debug!("closed {:?} cluster {:?}", self.realm, self.key);
    }

    fn slab_index(&self, id: SlabId) -> Option<usize> {
        self.slabs.iter().position(|s| s.id() == id)
    }

    fn hungry_index(&self) -> Option<usize> {
        self.slab_index(self.hungry?)
    }

    /// Returns the index of a hungry slab with room for `incoming` bytes.
    fn prepare_hungry<B: GpuBackend>(
        &mut self,
        incoming: u32,
        allocator: &mut SlabAllocator<B>,
    ) -> usize {
        if let Some(index) = self.hungry_index() {
            let slab = &mut self.slabs[index];
            if slab.available_bytes() >= incoming {
                return index;
            }
            if slab.reclaim() && slab.available_bytes() >= incoming {
                return index;
            }
        }

        let slab = allocator.claim(self.active_bytes + u64::from(incoming));
        self.hungry = Some(slab.id());
        self.slabs.push(slab);
        self.slabs.len() - 1
    }

    /// Returns the index of a hungry slab able to hold every live region.
    fn prepare_compaction_target<B: GpuBackend>(&mut self, allocator: &mut SlabAllocator<B>) -> usize {
        if let Some(index) = self.hungry_index() {
            let slab = &mut self.slabs[index];
            slab.reclaim();
            let outside = self.active_bytes - u64::from(slab.used_bytes());
            if u64::from(slab.available_bytes()) >= outside {
                return index;
            }
        }

        let slab = allocator.claim(self.active_bytes);
        self.hungry = Some(slab.id());
        self.slabs.push(slab);
        self.slabs.len() - 1
    }

    /// Releases every empty slab except the hungry one.
    fn release_vacated<B: GpuBackend>(&mut self, allocator: &mut SlabAllocator<B>) -> usize {
        let mut released = 0;
        let mut index = 0;
        while index < self.slabs.len() {
            let slab = &self.slabs[index];
            if slab.is_empty() && Some(slab.id()) != self.hungry {
                self.slabs.remove(index).release(allocator);
                released += 1;
            } else {
                index += 1;
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::storage::{RegionOrigin, TransferBuffer};
    use crate::gpu::HostBackend;

    struct Fixture {
        cluster: VertexCluster,
        pool: RegionPool,
        allocator: SlabAllocator<HostBackend>,
    }

    impl Fixture {
        fn new(increment: u32) -> Self {
            Self {
                cluster: VertexCluster::new(0, ClusterKey::default(), RealmKind::Solid),
                pool: RegionPool::new(8),
                allocator: SlabAllocator::new(HostBackend::new(), increment, 4),
            }
        }

        fn add(&mut self, bytes: u32, fill: u8) -> PoolHandle {
            let storage = ClusteredDrawableStorage::new(
                RealmKind::Solid,
                RegionOrigin::default(),
                TransferBuffer::new(vec![fill; bytes as usize]),
            );
            self.cluster
                .allocate(storage, &mut self.pool, &mut self.allocator)
                .unwrap()
                .unwrap()
        }

        fn remove(&mut self, slot: PoolHandle) {
            self.cluster
                .on_region_closed(slot, &mut self.pool, &mut self.allocator)
                .unwrap();
        }

        fn region_bytes(&self, slot: PoolHandle) -> Vec<u8> {
            let region = self.pool.get(slot).unwrap();
            let allocation = region.allocation();
            let slab = self
                .cluster
                .slabs()
                .iter()
                .find(|s| s.id() == allocation.slab())
                .unwrap();
            self.allocator
                .backend()
                .read(
                    slab.buffer().unwrap(),
                    allocation.base_quad_vertex_index() * 4,
                    region.byte_count(),
                )
                .unwrap()
                .to_vec()
        }
    }

    #[test]
    fn test_first_region_claims_one_slab() {
        let mut f = Fixture::new(2048);
        f.add(1000, 1);

        assert_eq!(f.cluster.slabs().len(), 1);
        assert_eq!(f.cluster.slabs()[0].capacity_bytes(), 2048);
        assert_eq!(f.cluster.active_bytes(), 1000);
        assert!(!f.cluster.needs_compaction());
    }

    #[test]
    fn test_overflow_claims_slab_sized_for_everything() {
        let mut f = Fixture::new(2048);
        f.add(1000, 1);
        f.add(1500, 2);

        assert_eq!(f.cluster.slabs().len(), 2);
        // 1000 active + 1500 incoming, rounded up.
        assert_eq!(f.cluster.hungry_slab().unwrap().capacity_bytes(), 4096);
        assert!(f.cluster.needs_compaction());
    }

    #[test]
    fn test_closed_storage_is_dropped_silently() {
        let mut f = Fixture::new(2048);
        let storage = ClusteredDrawableStorage::new(
            RealmKind::Solid,
            RegionOrigin::default(),
            TransferBuffer::new(vec![0; 64]),
        );
        storage.close_signal().close();

        let result = f.cluster.allocate(storage, &mut f.pool, &mut f.allocator);
        assert_eq!(result, Ok(None));
        assert!(f.cluster.slabs().is_empty());
        assert_eq!(f.allocator.backend().live_buffer_count(), 0);
    }

    #[test]
    fn test_misaligned_transfer_rejected_before_gpu_work() {
        let mut f = Fixture::new(2048);
        let storage = ClusteredDrawableStorage::new(
            RealmKind::Solid,
            RegionOrigin::default(),
            TransferBuffer::new(vec![0; 6]),
        );

        let result = f.cluster.allocate(storage, &mut f.pool, &mut f.allocator);
        assert_eq!(
            result,
            Err(ClusterError::MisalignedTransfer {
                bytes: 6,
                bytes_per_vertex: 4
            })
        );
        assert!(f.cluster.slabs().is_empty());
    }

    #[test]
    fn test_vacated_non_hungry_slab_released_immediately() {
        let mut f = Fixture::new(2048);
        let a = f.add(1000, 1);
        let _b = f.add(1500, 2);
        assert_eq!(f.cluster.slabs().len(), 2);

        f.remove(a);
        assert_eq!(f.cluster.slabs().len(), 1);
        assert_eq!(f.allocator.stats().retired_count, 1);
        assert_eq!(f.cluster.active_bytes(), 1500);
    }

    #[test]
    fn test_last_release_closes_cluster() {
        let mut f = Fixture::new(2048);
        let a = f.add(100, 1);
        let b = f.add(200, 2);

        f.remove(b);
        assert!(!f.cluster.is_closed());
        f.remove(a);
        assert!(f.cluster.is_closed());
        assert_eq!(f.cluster.state(), ClusterState::Closed);
        assert!(f.cluster.slabs().is_empty());
        assert!(f.pool.is_empty());
    }

    #[test]
    fn test_double_release_reports_stale_handle() {
        let mut f = Fixture::new(2048);
        let a = f.add(100, 1);
        let _b = f.add(100, 2);
        f.remove(a);

        let again = f.cluster.on_region_closed(a, &mut f.pool, &mut f.allocator);
        assert_eq!(again, Err(ClusterError::StaleHandle));
        assert_eq!(f.cluster.active_bytes(), 100);
    }

    #[test]
    fn test_compaction_moves_everything_into_one_slab() {
        let mut f = Fixture::new(2048);
        let a = f.add(1000, 1);
        let b = f.add(1500, 2);
        let c = f.add(2000, 3);
        f.remove(b);
        f.cluster.mark_scheduled();

        let report = f.cluster.compact(&mut f.pool, &mut f.allocator);

        assert_eq!(f.cluster.slabs().len(), 1);
        assert!(f.cluster.slabs()[0].capacity_bytes() >= 3000);
        assert!(!f.cluster.is_scheduled());
        assert_eq!(report.moved_regions, 2);
        assert_eq!(report.retired_slabs, 2);
        assert_eq!(f.region_bytes(a), vec![1; 1000]);
        assert_eq!(f.region_bytes(c), vec![3; 2000]);
        assert_eq!(f.cluster.active_bytes(), 3000);
    }

    #[test]
    fn test_compaction_reuses_roomy_hungry_slab() {
        let mut f = Fixture::new(2048);
        let a = f.add(2000, 1);
        let b = f.add(100, 2); // claims 4096, hungry
        f.cluster.compact(&mut f.pool, &mut f.allocator);

        let slabs = f.cluster.slabs();
        assert_eq!(slabs.len(), 1);
        assert_eq!(slabs[0].capacity_bytes(), 4096);
        assert_eq!(f.region_bytes(a), vec![1; 2000]);
        assert_eq!(f.region_bytes(b), vec![2; 100]);
    }

    #[test]
    fn test_compaction_noop_with_single_slab() {
        let mut f = Fixture::new(2048);
        f.add(100, 1);
        let report = f.cluster.compact(&mut f.pool, &mut f.allocator);
        assert_eq!(report, CompactionReport::default());
    }

    #[test]
    fn test_batches_group_ranges_per_slab() {
        let mut f = Fixture::new(2048);
        f.add(1000, 1);
        f.add(1500, 2);
        f.add(400, 3);

        let batches = f.cluster.batches(&f.pool);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].ranges.len(), 1);
        assert_eq!(batches[1].ranges.len(), 2);
        assert!(batches[1].ranges[0].base_quad_vertex_index < batches[1].ranges[1].base_quad_vertex_index);
    }
}

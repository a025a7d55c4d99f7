//! Realms: the solid and translucent partitions of clustered storage.
//!
//! A realm maps cluster keys to clusters and owns the region pool that
//! region handles index into. Clusters are created on first allocation and
//! dropped from the map as soon as they close.

use std::collections::HashMap;
use std::fmt;

use crate::error::{ClusterError, ClusterResult};
use crate::gpu::GpuBackend;

use super::region::{RegionAllocation, RegionHandle};
use super::slab_allocator::SlabAllocator;
use super::storage::ClusteredDrawableStorage;
use super::task::{ClusterTask, ClusterTaskManager, TaskOutcome};
use super::vertex_cluster::{ClusterKey, RegionPool, SlabBatch, VertexCluster};

/// Which realm geometry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RealmKind {
    /// Opaque and cutout geometry.
    Solid,
    /// Geometry drawn after the solid pass with blending.
    Translucent,
}

impl RealmKind {
    /// Both realms, in draw order.
    pub const ALL: [Self; 2] = [Self::Solid, Self::Translucent];

    /// Dense index for per-realm arrays.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Solid => 0,
            Self::Translucent => 1,
        }
    }
}

/// Storage address changes reported to draw-list caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterEvent {
    /// Regions of the cluster moved to a different slab.
    Compacted {
        /// Cluster that was compacted.
        key: ClusterKey,
        /// Regions that changed slab.
        moved: usize,
    },
    /// The cluster released all of its slabs and left the realm.
    Closed(ClusterKey),
}

/// Receives [`ClusterEvent`]s of one realm.
///
/// Closures of the form `FnMut(RealmKind, &ClusterEvent)` implement this.
pub trait ClusterListener {
    /// Called on the render thread after the change took effect.
    fn on_cluster_event(&mut self, realm: RealmKind, event: &ClusterEvent);
}

impl<F> ClusterListener for F
where
    F: FnMut(RealmKind, &ClusterEvent),
{
    fn on_cluster_event(&mut self, realm: RealmKind, event: &ClusterEvent) {
        self(realm, event);
    }
}

/// Cluster map of one realm.
pub struct VertexClusterRealm {
    kind: RealmKind,
    cluster_shift: u32,
    clusters: HashMap<ClusterKey, VertexCluster>,
    regions: RegionPool,
    listeners: Vec<Box<dyn ClusterListener>>,
    next_cluster_id: u64,
    closed: bool,
}

impl VertexClusterRealm {
    pub(crate) fn new(kind: RealmKind, cluster_shift: u32, region_capacity: usize) -> Self {
        Self {
            kind,
            cluster_shift,
            clusters: HashMap::new(),
            regions: RegionPool::new(region_capacity),
            listeners: Vec::new(),
            next_cluster_id: 0,
            closed: false,
        }
    }

    /// Realm identity.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> RealmKind {
        self.kind
    }

    /// True after [`close`](Self::close).
    #[inline]
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Live clusters, in no particular order.
    pub fn clusters(&self) -> impl Iterator<Item = &VertexCluster> {
        self.clusters.values()
    }

    /// Looks up one cluster.
    #[must_use]
    pub fn cluster(&self, key: ClusterKey) -> Option<&VertexCluster> {
        self.clusters.get(&key)
    }

    /// Live cluster count.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Live region count.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.allocated_count()
    }

    /// Sum of live region bytes over all clusters.
    #[must_use]
    pub fn active_bytes(&self) -> u64 {
        self.clusters.values().map(VertexCluster::active_bytes).sum()
    }

    /// Slabs held by clusters (retired slabs excluded).
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.clusters.values().map(|c| c.slabs().len()).sum()
    }

    /// Slab capacity held by clusters.
    #[must_use]
    pub fn capacity_bytes(&self) -> u64 {
        self.clusters.values().map(VertexCluster::capacity_bytes).sum()
    }

    /// Live ranges of one cluster grouped per slab.
    #[must_use]
    pub fn cluster_batches(&self, key: ClusterKey) -> Option<Vec<SlabBatch>> {
        self.clusters
            .get(&key)
            .map(|cluster| cluster.batches(&self.regions))
    }

    /// Resolves a handle to its live region.
    ///
    /// # Errors
    ///
    /// [`ClusterError::StaleHandle`] if the region was released or the realm
    /// cleared since the handle was issued.
    pub fn region(&self, handle: &RegionHandle) -> ClusterResult<&RegionAllocation> {
        if handle.realm != self.kind {
            return Err(ClusterError::StaleHandle);
        }
        self.regions
            .get(handle.slot)
            .filter(|region| region.storage_id() == handle.storage_id)
            .ok_or(ClusterError::StaleHandle)
    }

    /// Registers a listener for compaction and closure events.
    pub fn add_listener(&mut self, listener: impl ClusterListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub(crate) fn allocate<B: GpuBackend>(
        &mut self,
        storage: ClusteredDrawableStorage,
        allocator: &mut SlabAllocator<B>,
        tasks: &mut ClusterTaskManager,
    ) -> ClusterResult<Option<RegionHandle>> {
        if self.closed {
            return Err(ClusterError::RealmClosed(self.kind));
        }
        debug_assert_eq!(storage.realm(), self.kind, "storage routed to the wrong realm");

        let storage_id = storage.id();
        let origin = storage.origin();
        let key = origin.cluster_key(self.cluster_shift);
        let kind = self.kind;
        let next_cluster_id = &mut self.next_cluster_id;
        let cluster = self.clusters.entry(key).or_insert_with(|| {
            let id = *next_cluster_id;
            *next_cluster_id += 1;
            tracing::debug!("created {:?} cluster {:?}", kind, key);
            VertexCluster::new(id, key, kind)
        });

        let result = cluster.allocate(storage, &mut self.regions, allocator);

        if cluster.region_count() == 0 {
            // Nothing landed in a cluster created for this request.
            debug_assert!(cluster.slabs().is_empty());
            self.clusters.remove(&key);
            return result.map(|_| None);
        }

        if cluster.needs_compaction() {
            cluster.mark_scheduled();
            tasks.schedule(ClusterTask {
                realm: kind,
                key,
                cluster_id: cluster.id(),
            });
        }

        Ok(result?.map(|slot| RegionHandle {
            realm: kind,
            cluster: key,
            slot,
            storage_id,
            origin,
        }))
    }

    pub(crate) fn release<B: GpuBackend>(
        &mut self,
        handle: RegionHandle,
        allocator: &mut SlabAllocator<B>,
    ) -> ClusterResult<()> {
        debug_assert_eq!(handle.realm, self.kind, "handle released into the wrong realm");
        let cluster = self
            .clusters
            .get_mut(&handle.cluster)
            .ok_or(ClusterError::StaleHandle)?;
        if self
            .regions
            .get(handle.slot)
            .map_or(true, |region| region.storage_id() != handle.storage_id)
        {
            return Err(ClusterError::StaleHandle);
        }

        cluster.on_region_closed(handle.slot, &mut self.regions, allocator)?;
        if cluster.is_closed() {
            self.notify_closed(handle.cluster);
        }
        Ok(())
    }

    /// Runs one scheduled compaction.
    pub(crate) fn run_compaction<B: GpuBackend>(
        &mut self,
        task: &ClusterTask,
        allocator: &mut SlabAllocator<B>,
    ) -> TaskOutcome {
        let Some(cluster) = self.clusters.get_mut(&task.key) else {
            return TaskOutcome::Complete;
        };
        if cluster.id() != task.cluster_id {
            return TaskOutcome::Complete;
        }

        let report = cluster.compact(&mut self.regions, allocator);
        if report.moved_regions > 0 {
            self.emit(&ClusterEvent::Compacted {
                key: task.key,
                moved: report.moved_regions,
            });
        }
        TaskOutcome::Complete
    }

    /// Drops a closed cluster from the map.
    pub(crate) fn notify_closed(&mut self, key: ClusterKey) {
        if let Some(cluster) = self.clusters.remove(&key) {
            debug_assert!(cluster.is_closed(), "removed live cluster {key:?}");
            self.emit(&ClusterEvent::Closed(key));
        }
    }

    /// Force-closes every cluster and invalidates every handle.
    pub(crate) fn clear<B: GpuBackend>(&mut self, allocator: &mut SlabAllocator<B>) {
        let clusters: Vec<VertexCluster> = self.clusters.drain().map(|(_, c)| c).collect();
        let count = clusters.len();
        for mut cluster in clusters {
            cluster.close(&mut self.regions, allocator);
            self.emit(&ClusterEvent::Closed(cluster.key()));
        }
        self.regions.clear();
        tracing::debug!("cleared {:?} realm ({} clusters)", self.kind, count);
    }

    /// Clears the realm and rejects further allocation.
    pub(crate) fn close<B: GpuBackend>(&mut self, allocator: &mut SlabAllocator<B>) {
        self.clear(allocator);
        self.closed = true;
    }

    fn emit(&mut self, event: &ClusterEvent) {
        for listener in &mut self.listeners {
            listener.on_cluster_event(self.kind, event);
        }
    }
}

impl fmt::Debug for VertexClusterRealm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VertexClusterRealm")
            .field("kind", &self.kind)
            .field("clusters", &self.clusters.len())
            .field("regions", &self.regions.allocated_count())
            .field("listeners", &self.listeners.len())
            .field("closed", &self.closed)
            .finish()
    }
}

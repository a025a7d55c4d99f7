//! The render-thread entry point to clustered vertex storage.
//!
//! ## Frame
//!
//! ```text
//! drain_uploads ─► allocate / release ─► run_tasks(budget) ─► draw ─► end_frame
//!                                         (compaction)                (destroy retired slabs)
//! ```
//!
//! Everything here must be called from the thread that created the
//! session. Violations are caught by debug assertions.

use std::time::Duration;

use strata_core::{Clock, MonotonicClock, ThreadAffinity};

use crate::config::ClusterConfig;
use crate::error::{ClusterResult, ConfigError};
use crate::gpu::{GpuBackend, HostBackend};
use crate::stats::{RealmStats, StatsHandle, StorageStats};

use super::realm::{ClusterListener, RealmKind, VertexClusterRealm};
use super::region::{RegionAllocation, RegionHandle};
use super::slab_allocator::SlabAllocator;
use super::storage::{
    upload_channel, ClusteredDrawableStorage, StorageId, UploadReceiver, UploadSender,
};
use super::task::{ClusterTaskManager, TaskRunSummary};

/// Result of placing one record taken from the upload channel.
#[derive(Debug, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Record the result belongs to.
    pub storage_id: StorageId,
    /// The handle, `None` if the region was closed in flight.
    pub result: ClusterResult<Option<RegionHandle>>,
}

/// Clustered vertex storage for one renderer session.
pub struct ClusteredVertexStorage<B: GpuBackend> {
    config: ClusterConfig,
    affinity: ThreadAffinity,
    allocator: SlabAllocator<B>,
    realms: [VertexClusterRealm; 2],
    tasks: ClusterTaskManager,
    clock: MonotonicClock,
    stats: StatsHandle,
}

impl ClusteredVertexStorage<HostBackend> {
    /// Creates a session backed by CPU memory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the config fails validation.
    pub fn headless(config: ClusterConfig) -> Result<Self, ConfigError> {
        Self::new(HostBackend::new(), config)
    }
}

impl<B: GpuBackend> ClusteredVertexStorage<B> {
    /// Creates a session bound to the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the config fails validation.
    pub fn new(backend: B, config: ClusterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let realm = |kind| VertexClusterRealm::new(kind, config.cluster_shift, config.region_capacity);

        tracing::debug!(
            "clustered storage: {} byte slabs, {} byte vertices, cluster shift {}",
            config.slab_bytes_increment,
            config.bytes_per_vertex,
            config.cluster_shift
        );

        Ok(Self {
            allocator: SlabAllocator::new(backend, config.slab_bytes_increment, config.bytes_per_vertex),
            realms: [realm(RealmKind::Solid), realm(RealmKind::Translucent)],
            tasks: ClusterTaskManager::new(config.flawless_frames),
            affinity: ThreadAffinity::current(),
            clock: MonotonicClock::new(),
            stats: StatsHandle::default(),
            config,
        })
    }

    /// Moves the session to the calling thread.
    ///
    /// For sessions built during loading and handed to the render thread.
    pub fn bind_to_current_thread(&mut self) {
        self.affinity.rebind();
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Slab allocator and its totals.
    #[must_use]
    pub const fn allocator(&self) -> &SlabAllocator<B> {
        &self.allocator
    }

    /// The GPU backend, for resolving buffers and draw bindings.
    #[must_use]
    pub fn backend(&self) -> &B {
        self.allocator.backend()
    }

    /// One realm.
    #[must_use]
    pub fn realm(&self, kind: RealmKind) -> &VertexClusterRealm {
        &self.realms[kind.index()]
    }

    /// Places a meshed region into its realm.
    ///
    /// Returns `Ok(None)` if the region was closed while in flight.
    ///
    /// # Errors
    ///
    /// [`ClusterError::MisalignedTransfer`](crate::ClusterError::MisalignedTransfer)
    /// for a partial vertex record, [`ClusterError::RealmClosed`](crate::ClusterError::RealmClosed)
    /// after [`close`](Self::close).
    pub fn allocate(&mut self, storage: ClusteredDrawableStorage) -> ClusterResult<Option<RegionHandle>> {
        self.affinity.assert_owner();
        let realm = &mut self.realms[storage.realm().index()];
        realm.allocate(storage, &mut self.allocator, &mut self.tasks)
    }

    /// Creates an upload channel bounded by the configured queue capacity.
    #[must_use]
    pub fn upload_channel(&self) -> (UploadSender, UploadReceiver) {
        upload_channel(self.config.upload_queue_capacity)
    }

    /// Places every record queued on the upload channel.
    pub fn drain_uploads(&mut self, uploads: &UploadReceiver) -> Vec<UploadOutcome> {
        self.affinity.assert_owner();
        uploads
            .drain()
            .map(|storage| {
                let storage_id = storage.id();
                let result = self.allocate(storage);
                if let Err(err) = &result {
                    tracing::warn!("upload of {:?} rejected: {}", storage_id, err);
                }
                UploadOutcome { storage_id, result }
            })
            .collect()
    }

    /// Releases a region.
    ///
    /// # Errors
    ///
    /// [`ClusterError::StaleHandle`](crate::ClusterError::StaleHandle) if the
    /// realm was cleared since the handle was issued.
    pub fn release(&mut self, handle: RegionHandle) -> ClusterResult<()> {
        self.affinity.assert_owner();
        self.realms[handle.realm().index()].release(handle, &mut self.allocator)
    }

    /// Resolves a handle to its live region.
    ///
    /// # Errors
    ///
    /// [`ClusterError::StaleHandle`](crate::ClusterError::StaleHandle) if the
    /// region is gone.
    pub fn region(&self, handle: &RegionHandle) -> ClusterResult<&RegionAllocation> {
        self.realms[handle.realm().index()].region(handle)
    }

    /// Runs queued compactions for at most `budget` of wall time.
    pub fn run_tasks(&mut self, budget: Duration) -> TaskRunSummary {
        let clock = self.clock;
        let deadline = clock.deadline_after(budget);
        self.run_tasks_with_clock(&clock, deadline)
    }

    /// Runs queued compactions until `deadline_nanos` on `clock`.
    ///
    /// The deadline is only checked between compactions, so the last one
    /// started may run past it.
    pub fn run_tasks_with_clock<C: Clock + ?Sized>(
        &mut self,
        clock: &C,
        deadline_nanos: u64,
    ) -> TaskRunSummary {
        self.affinity.assert_owner();
        let realms = &mut self.realms;
        let allocator = &mut self.allocator;
        let summary = self.tasks.run(clock, deadline_nanos, |task| {
            realms[task.realm.index()].run_compaction(task, allocator)
        });

        let now = clock.now_nanos();
        if !self.tasks.is_flawless() && summary.completed > 0 && now > deadline_nanos {
            tracing::warn!(
                "compaction overran frame deadline by {}us ({} tasks left)",
                (now - deadline_nanos) / 1_000,
                summary.remaining
            );
        }
        summary
    }

    /// Ends the frame: destroys retired slabs and publishes stats.
    ///
    /// Call once no submitted draw can still read a released slab.
    pub fn end_frame(&mut self) -> usize {
        self.affinity.assert_owner();
        let destroyed = self.allocator.flush_retired();
        if destroyed > 0 {
            tracing::debug!("destroyed {} retired slabs", destroyed);
        }
        self.stats.publish(self.stats());
        destroyed
    }

    /// Force-closes every cluster. Outstanding handles go stale.
    ///
    /// Used on world unload or when sizing changes.
    pub fn clear(&mut self) {
        self.affinity.assert_owner();
        self.tasks.clear();
        for realm in &mut self.realms {
            realm.clear(&mut self.allocator);
        }
    }

    /// Clears both realms and rejects further allocation.
    ///
    /// Slab buffers are destroyed at the next [`end_frame`](Self::end_frame).
    pub fn close(&mut self) {
        self.affinity.assert_owner();
        self.tasks.clear();
        for realm in &mut self.realms {
            realm.close(&mut self.allocator);
        }
    }

    /// Registers a listener on one realm.
    pub fn add_listener(&mut self, kind: RealmKind, listener: impl ClusterListener + 'static) {
        self.affinity.assert_owner();
        self.realms[kind.index()].add_listener(listener);
    }

    /// Enables or disables the compaction deadline override.
    pub fn set_flawless_frames(&mut self, flawless: bool) {
        self.tasks.set_flawless_frames(flawless);
    }

    /// Compactions waiting for a frame.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.tasks.pending()
    }

    /// Counters computed now.
    #[must_use]
    pub fn stats(&self) -> StorageStats {
        let slabs = self.allocator.stats();
        let realm = |kind: RealmKind| {
            let realm = self.realm(kind);
            RealmStats {
                clusters: realm.cluster_count(),
                regions: realm.region_count(),
                slabs: realm.slab_count(),
                active_bytes: realm.active_bytes(),
                capacity_bytes: realm.capacity_bytes(),
            }
        };

        StorageStats {
            realms: [realm(RealmKind::Solid), realm(RealmKind::Translucent)],
            slab_count: slabs.slab_count,
            slab_bytes: slabs.slab_bytes,
            retired_slabs: slabs.retired_count,
            pending_tasks: self.tasks.pending(),
        }
    }

    /// Handle to the snapshot published at each [`end_frame`](Self::end_frame).
    #[must_use]
    pub fn stats_handle(&self) -> StatsHandle {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::storage::{RegionOrigin, TransferBuffer};
    use crate::error::ClusterError;

    fn storage() -> ClusteredVertexStorage<HostBackend> {
        let config = ClusterConfig {
            slab_bytes_increment: 2048,
            bytes_per_vertex: 4,
            ..ClusterConfig::default()
        };
        ClusteredVertexStorage::headless(config).unwrap()
    }

    fn record(realm: RealmKind, bytes: usize) -> ClusteredDrawableStorage {
        ClusteredDrawableStorage::new(realm, RegionOrigin::default(), TransferBuffer::new(vec![5; bytes]))
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ClusterConfig {
            bytes_per_vertex: 6,
            ..ClusterConfig::default()
        };
        assert!(matches!(
            ClusteredVertexStorage::headless(config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_realms_are_independent() {
        let mut storage = storage();
        let solid = storage.allocate(record(RealmKind::Solid, 64)).unwrap().unwrap();
        let translucent = storage
            .allocate(record(RealmKind::Translucent, 128))
            .unwrap()
            .unwrap();

        assert_eq!(storage.realm(RealmKind::Solid).active_bytes(), 64);
        assert_eq!(storage.realm(RealmKind::Translucent).active_bytes(), 128);
        assert_eq!(storage.region(&translucent).unwrap().byte_count(), 128);

        storage.release(solid).unwrap();
        assert_eq!(storage.realm(RealmKind::Solid).cluster_count(), 0);
        assert_eq!(storage.realm(RealmKind::Translucent).cluster_count(), 1);
    }

    #[test]
    fn test_end_frame_destroys_retired_and_publishes() {
        let mut storage = storage();
        let handle = storage.allocate(record(RealmKind::Solid, 64)).unwrap().unwrap();
        let stats = storage.stats_handle();
        storage.release(handle).unwrap();

        assert_eq!(storage.stats().retired_slabs, 1);
        assert_eq!(storage.end_frame(), 1);
        assert_eq!(storage.backend().live_buffer_count(), 0);
        assert_eq!(stats.snapshot(), StorageStats::default());
    }

    #[test]
    fn test_clear_drops_tasks_and_handles() {
        let mut storage = storage();
        let handle = storage.allocate(record(RealmKind::Solid, 2000)).unwrap().unwrap();
        storage.allocate(record(RealmKind::Solid, 2000)).unwrap();
        assert_eq!(storage.pending_tasks(), 1);

        storage.clear();

        assert_eq!(storage.pending_tasks(), 0);
        assert_eq!(storage.release(handle), Err(ClusterError::StaleHandle));
        storage.end_frame();
        assert_eq!(storage.allocator().stats().slab_count, 0);
    }

    #[test]
    fn test_close_rejects_allocation() {
        let mut storage = storage();
        storage.close();
        assert_eq!(
            storage.allocate(record(RealmKind::Translucent, 64)),
            Err(ClusterError::RealmClosed(RealmKind::Translucent))
        );
    }
}

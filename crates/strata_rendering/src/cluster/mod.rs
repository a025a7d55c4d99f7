//! Clustered slab storage.
//!
//! Regions are grouped into clusters by a coarsened origin. Each cluster
//! packs its regions into as few slabs as it can, and falls back to a
//! whole-cluster compaction when it had to spill into a second slab.

mod realm;
mod region;
mod session;
mod slab;
mod slab_allocator;
mod storage;
mod task;
mod vertex_cluster;

pub use realm::{ClusterEvent, ClusterListener, RealmKind, VertexClusterRealm};
pub use region::{RegionAllocation, RegionHandle};
pub use session::{ClusteredVertexStorage, UploadOutcome};
pub use slab::{Slab, SlabAllocation, SlabId};
pub use slab_allocator::{SlabAllocator, SlabStats};
pub use storage::{
    upload_channel, ClusteredDrawableStorage, CloseSignal, RegionOrigin, StorageId,
    TransferBuffer, UploadReceiver, UploadSender,
};
pub use task::{ClusterTask, ClusterTaskManager, TaskOutcome, TaskRunSummary};
pub use vertex_cluster::{
    ClusterKey, ClusterState, CompactionReport, DrawRange, SlabBatch, VertexCluster,
};

//! # STRATA Rendering: Clustered Vertex Storage
//!
//! Packs independently meshed terrain regions into a few large GPU vertex
//! buffers so nearby regions draw together, while each region can still be
//! added and removed on its own as the world streams.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 ClusteredVertexStorage                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Realm (solid / translucent)                                  │
//! │    └─ VertexCluster (per cluster key)                          │
//! │         ├─ Slab ─ Slab ...      append-only GPU buffers        │
//! │         └─ RegionAllocation ──► SlabAllocation                 │
//! │  ClusterTaskManager             deadline-bounded compaction    │
//! │  SlabAllocator ──► GpuBackend   host memory or wgpu            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//!
//! - Render thread only. Workers hand meshes over through [`upload_channel`].
//! - A region's vertices are copied into their new slab before the old
//!   range is released, so compaction never leaves a region undrawable.
//! - Retired slab buffers are destroyed at [`ClusteredVertexStorage::end_frame`].

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod gpu;
pub mod stats;

pub use cluster::{
    upload_channel, ClusterEvent, ClusterKey, ClusterListener, ClusterTask, ClusterTaskManager,
    ClusteredDrawableStorage, ClusteredVertexStorage, CloseSignal, DrawRange, RealmKind,
    RegionAllocation, RegionHandle, RegionOrigin, Slab, SlabAllocation, SlabAllocator, SlabBatch,
    SlabId, StorageId, TaskOutcome, TaskRunSummary, TransferBuffer, UploadOutcome, UploadReceiver,
    UploadSender, VertexCluster, VertexClusterRealm,
};
pub use config::ClusterConfig;
pub use error::{ClusterError, ClusterResult, ConfigError};
pub use gpu::{DrawBindingId, GpuBackend, GpuBufferId, HostBackend, WgpuBackend};
pub use stats::{RealmStats, StatsHandle, StorageStats};

//! Freshly meshed regions on their way to the GPU.
//!
//! ## Flow
//!
//! ```text
//! worker thread                         render thread
//! ─────────────                         ─────────────
//! mesh region → TransferBuffer
//!   → ClusteredDrawableStorage ──UploadSender──► UploadReceiver::drain
//!                                                  → ClusteredVertexStorage::allocate
//!                                                  → RegionHandle
//! ```
//!
//! The storage record is moved across the channel, so exactly one thread
//! owns its transfer buffer at any time. The buffer is dropped right after
//! its single upload.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::Pod;
use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::realm::RealmKind;
use super::vertex_cluster::ClusterKey;
use crate::error::{ClusterError, ClusterResult};

/// CPU-side vertex bytes awaiting one GPU upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferBuffer {
    bytes: Vec<u8>,
}

impl TransferBuffer {
    /// Wraps already encoded vertex bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Encodes a slice of vertex records.
    #[must_use]
    pub fn from_vertices<T: Pod>(vertices: &[T]) -> Self {
        Self {
            bytes: bytemuck::cast_slice(vertices).to_vec(),
        }
    }

    /// Size in bytes.
    #[inline]
    #[must_use]
    pub fn size_bytes(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// The raw bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Identity of one storage record. Remeshing a region produces a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageId(u64);

impl StorageId {
    /// Returns the next process-unique id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value, for logging.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Minimum block corner of a region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RegionOrigin {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
    /// Z coordinate.
    pub z: i32,
}

impl RegionOrigin {
    /// Creates an origin.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Cluster containing this origin.
    #[inline]
    #[must_use]
    pub const fn cluster_key(self, cluster_shift: u32) -> ClusterKey {
        ClusterKey::new(
            self.x >> cluster_shift,
            self.y >> cluster_shift,
            self.z >> cluster_shift,
        )
    }
}

/// Shared "this region went away" flag.
///
/// The world side keeps one clone and closes it when the region unloads. A
/// storage record whose signal is closed is dropped on upload instead of
/// being allocated.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal(Arc<AtomicBool>);

impl CloseSignal {
    /// Creates an open signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the region closed.
    pub fn close(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once [`CloseSignal::close`] was called on any clone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One meshed region, ready to be placed in a cluster.
#[derive(Debug)]
pub struct ClusteredDrawableStorage {
    id: StorageId,
    realm: RealmKind,
    origin: RegionOrigin,
    transfer: TransferBuffer,
    closed: CloseSignal,
}

impl ClusteredDrawableStorage {
    /// Wraps a transfer buffer for the region at `origin`.
    #[must_use]
    pub fn new(realm: RealmKind, origin: RegionOrigin, transfer: TransferBuffer) -> Self {
        Self {
            id: StorageId::next(),
            realm,
            origin,
            transfer,
            closed: CloseSignal::new(),
        }
    }

    /// Record identity.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> StorageId {
        self.id
    }

    /// Realm the geometry belongs to.
    #[inline]
    #[must_use]
    pub const fn realm(&self) -> RealmKind {
        self.realm
    }

    /// Region origin.
    #[inline]
    #[must_use]
    pub const fn origin(&self) -> RegionOrigin {
        self.origin
    }

    /// Vertex bytes to upload.
    #[inline]
    #[must_use]
    pub fn byte_count(&self) -> u32 {
        self.transfer.size_bytes()
    }

    /// Whole vertex records in the transfer buffer.
    #[inline]
    #[must_use]
    pub fn quad_vertex_count(&self, bytes_per_vertex: u32) -> u32 {
        self.byte_count() / bytes_per_vertex
    }

    /// A clone of the close signal for the world side to keep.
    #[must_use]
    pub fn close_signal(&self) -> CloseSignal {
        self.closed.clone()
    }

    /// True if the region was discarded while this record was in flight.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    pub(crate) fn into_transfer(self) -> TransferBuffer {
        self.transfer
    }
}

/// Creates a bounded worker → render thread upload channel.
#[must_use]
pub fn upload_channel(capacity: usize) -> (UploadSender, UploadReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (UploadSender { tx }, UploadReceiver { rx })
}

/// Worker side of the upload channel.
#[derive(Debug, Clone)]
pub struct UploadSender {
    tx: Sender<ClusteredDrawableStorage>,
}

impl UploadSender {
    /// Sends a record, blocking while the channel is full.
    ///
    /// # Errors
    ///
    /// [`ClusterError::UploadQueueClosed`] if the receiver is gone.
    pub fn submit(&self, storage: ClusteredDrawableStorage) -> ClusterResult<()> {
        self.tx
            .send(storage)
            .map_err(|_| ClusterError::UploadQueueClosed)
    }

    /// Sends a record without blocking.
    ///
    /// # Errors
    ///
    /// Returns the record back if the channel is full, or
    /// [`ClusterError::UploadQueueClosed`] if the receiver is gone.
    pub fn try_submit(
        &self,
        storage: ClusteredDrawableStorage,
    ) -> ClusterResult<Option<ClusteredDrawableStorage>> {
        match self.tx.try_send(storage) {
            Ok(()) => Ok(None),
            Err(TrySendError::Full(storage)) => Ok(Some(storage)),
            Err(TrySendError::Disconnected(_)) => Err(ClusterError::UploadQueueClosed),
        }
    }
}

/// Render-thread side of the upload channel.
#[derive(Debug)]
pub struct UploadReceiver {
    rx: Receiver<ClusteredDrawableStorage>,
}

impl UploadReceiver {
    /// Takes every record currently queued without blocking.
    pub fn drain(&self) -> impl Iterator<Item = ClusteredDrawableStorage> + '_ {
        self.rx.try_iter()
    }

    /// Records currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

//! Slabs: append-only vertex arenas backed by one GPU buffer.
//!
//! A slab never frees individual ranges. Released regions only lower the
//! used count; the space is recovered when the slab empties or when the
//! owning cluster is compacted into a fresh slab.
//!
//! ```text
//! 0                 used ≤ head                    max
//! ├──live──┤░hole░├──live──┤         free          │
//!                          ▲ head (only advances)
//! ```

use crate::gpu::{DrawBindingId, GpuBackend, GpuBufferId};

use super::slab_allocator::SlabAllocator;
use super::storage::TransferBuffer;

/// Identity of a slab, unique within a storage session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlabId(pub(crate) u64);

/// A reserved vertex range inside one slab.
///
/// Owned by exactly one region. Not `Clone`: the only way to end it is
/// [`SlabAllocation::release`], which consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct SlabAllocation {
    slab: SlabId,
    base_quad_vertex_index: u32,
    quad_vertex_count: u32,
    binding: DrawBindingId,
}

impl SlabAllocation {
    /// Slab holding the range.
    #[inline]
    #[must_use]
    pub const fn slab(&self) -> SlabId {
        self.slab
    }

    /// First vertex record of the range.
    #[inline]
    #[must_use]
    pub const fn base_quad_vertex_index(&self) -> u32 {
        self.base_quad_vertex_index
    }

    /// Number of vertex records in the range.
    #[inline]
    #[must_use]
    pub const fn quad_vertex_count(&self) -> u32 {
        self.quad_vertex_count
    }

    /// Draw binding scoped to the range.
    #[inline]
    #[must_use]
    pub const fn binding(&self) -> DrawBindingId {
        self.binding
    }

    /// Returns the range to its slab and destroys the draw binding.
    pub(crate) fn release<B: GpuBackend + ?Sized>(self, slab: &mut Slab, backend: &mut B) {
        debug_assert_eq!(slab.id, self.slab, "allocation released into the wrong slab");
        backend.destroy_draw_binding(self.binding);
        slab.remove_allocation(&self);
    }
}

/// Fixed-capacity bump allocator over vertex records in one GPU buffer.
#[derive(Debug)]
pub struct Slab {
    id: SlabId,
    capacity_bytes: u32,
    bytes_per_vertex: u32,
    max_vertex_count: u32,
    /// Next free record. Only moves back on reclaim/release.
    head_vertex_index: u32,
    /// Records still referenced by live allocations.
    used_vertex_count: u32,
    /// Created on first load.
    buffer: Option<GpuBufferId>,
}

impl Slab {
    pub(crate) fn new(id: SlabId, capacity_bytes: u32, bytes_per_vertex: u32) -> Self {
        Self {
            id,
            capacity_bytes,
            bytes_per_vertex,
            max_vertex_count: capacity_bytes / bytes_per_vertex,
            head_vertex_index: 0,
            used_vertex_count: 0,
            buffer: None,
        }
    }

    /// Identity of this slab.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> SlabId {
        self.id
    }

    /// Buffer size in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity_bytes(&self) -> u32 {
        self.capacity_bytes
    }

    /// Vertex records the slab can hold.
    #[inline]
    #[must_use]
    pub const fn max_vertex_count(&self) -> u32 {
        self.max_vertex_count
    }

    /// Next record to be handed out.
    #[inline]
    #[must_use]
    pub const fn head_vertex_index(&self) -> u32 {
        self.head_vertex_index
    }

    /// Records referenced by live allocations.
    #[inline]
    #[must_use]
    pub const fn used_vertex_count(&self) -> u32 {
        self.used_vertex_count
    }

    /// Records still available past the head.
    #[inline]
    #[must_use]
    pub const fn available_vertex_count(&self) -> u32 {
        self.max_vertex_count - self.head_vertex_index
    }

    /// Bytes still available past the head.
    #[inline]
    #[must_use]
    pub const fn available_bytes(&self) -> u32 {
        self.available_vertex_count() * self.bytes_per_vertex
    }

    /// Bytes referenced by live allocations.
    #[inline]
    #[must_use]
    pub const fn used_bytes(&self) -> u32 {
        self.used_vertex_count * self.bytes_per_vertex
    }

    /// No room left past the head.
    #[inline]
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.available_vertex_count() == 0
    }

    /// No live allocations.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.used_vertex_count == 0
    }

    /// GPU buffer, if anything has been loaded yet.
    #[inline]
    #[must_use]
    pub const fn buffer(&self) -> Option<GpuBufferId> {
        self.buffer
    }

    /// Uploads a transfer buffer at the head.
    ///
    /// Returns None if the buffer holds no whole vertex record or does not
    /// fit. The transfer buffer is consumed either way.
    pub fn allocate_and_load<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        transfer: TransferBuffer,
    ) -> Option<SlabAllocation> {
        debug_assert_eq!(transfer.size_bytes() % self.bytes_per_vertex, 0);
        let quad_vertex_count = transfer.size_bytes() / self.bytes_per_vertex;
        let base = self.reserve(quad_vertex_count)?;

        let buffer = self.ensure_buffer(backend);
        backend.write_buffer(buffer, base * self.bytes_per_vertex, transfer.as_bytes());

        Some(self.commit(backend, buffer, base, quad_vertex_count))
    }

    /// Copies another slab's resident range to the head, GPU to GPU.
    pub fn transfer_from<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        source: &SlabAllocation,
        source_buffer: GpuBufferId,
    ) -> Option<SlabAllocation> {
        debug_assert_ne!(source.slab, self.id, "transfer into the source slab");
        let quad_vertex_count = source.quad_vertex_count;
        let base = self.reserve(quad_vertex_count)?;

        let buffer = self.ensure_buffer(backend);
        backend.copy_buffer(
            source_buffer,
            source.base_quad_vertex_index * self.bytes_per_vertex,
            buffer,
            base * self.bytes_per_vertex,
            quad_vertex_count * self.bytes_per_vertex,
        );

        Some(self.commit(backend, buffer, base, quad_vertex_count))
    }

    /// Forgets a released range. The head does not move.
    pub(crate) fn remove_allocation(&mut self, allocation: &SlabAllocation) {
        debug_assert!(
            allocation.quad_vertex_count <= self.used_vertex_count,
            "slab {:?} released more vertices than it holds",
            self.id
        );
        self.used_vertex_count -= allocation.quad_vertex_count;
        self.check_invariant();
    }

    /// Rewinds the head of an empty slab so its space can be reused.
    ///
    /// Returns true if anything was reclaimed.
    pub(crate) fn reclaim(&mut self) -> bool {
        if self.used_vertex_count != 0 || self.head_vertex_index == 0 {
            return false;
        }
        self.head_vertex_index = 0;
        true
    }

    /// Hands an empty slab to the allocator for deferred destruction.
    pub(crate) fn release<B: GpuBackend>(mut self, allocator: &mut SlabAllocator<B>) {
        debug_assert!(self.is_empty(), "released slab {:?} still holds vertices", self.id);
        self.head_vertex_index = 0;
        allocator.defer_destroy(self);
    }

    pub(crate) fn take_buffer(&mut self) -> Option<GpuBufferId> {
        self.buffer.take()
    }

    fn reserve(&self, quad_vertex_count: u32) -> Option<u32> {
        if quad_vertex_count == 0 {
            return None;
        }
        let fits = quad_vertex_count <= self.available_vertex_count();
        debug_assert!(
            fits,
            "slab {:?} overflow: {} > {}",
            self.id,
            quad_vertex_count,
            self.available_vertex_count()
        );
        if !fits {
            return None;
        }
        Some(self.head_vertex_index)
    }

    fn ensure_buffer<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) -> GpuBufferId {
        let capacity = self.capacity_bytes;
        *self
            .buffer
            .get_or_insert_with(|| backend.create_buffer(capacity))
    }

    fn commit<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        buffer: GpuBufferId,
        base: u32,
        quad_vertex_count: u32,
    ) -> SlabAllocation {
        self.head_vertex_index += quad_vertex_count;
        self.used_vertex_count += quad_vertex_count;
        self.check_invariant();

        SlabAllocation {
            slab: self.id,
            base_quad_vertex_index: base,
            quad_vertex_count,
            binding: backend.create_draw_binding(buffer, base, quad_vertex_count),
        }
    }

    #[inline]
    fn check_invariant(&self) {
        debug_assert!(
            self.used_vertex_count <= self.head_vertex_index
                && self.head_vertex_index <= self.max_vertex_count,
            "slab {:?} accounting broken: used {} head {} max {}",
            self.id,
            self.used_vertex_count,
            self.head_vertex_index,
            self.max_vertex_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HostBackend;

    fn slab(capacity: u32) -> Slab {
        Slab::new(SlabId(0), capacity, 4)
    }

    #[test]
    fn test_load_advances_head_and_used() {
        let mut backend = HostBackend::new();
        let mut slab = slab(64);

        let a = slab
            .allocate_and_load(&mut backend, TransferBuffer::new(vec![1; 16]))
            .unwrap();
        assert_eq!(a.base_quad_vertex_index(), 0);
        assert_eq!(a.quad_vertex_count(), 4);
        assert_eq!(slab.head_vertex_index(), 4);
        assert_eq!(slab.used_vertex_count(), 4);
        assert_eq!(slab.available_vertex_count(), 12);
        assert_eq!(backend.read(slab.buffer().unwrap(), 0, 16), Some(&[1u8; 16][..]));
    }

    #[test]
    fn test_buffer_created_lazily() {
        let mut backend = HostBackend::new();
        let mut slab = slab(64);
        assert!(slab.buffer().is_none());

        let _ = slab.allocate_and_load(&mut backend, TransferBuffer::new(vec![0; 4]));
        assert!(slab.buffer().is_some());
        assert_eq!(backend.live_buffer_count(), 1);
    }

    #[test]
    fn test_empty_transfer_yields_nothing() {
        let mut backend = HostBackend::new();
        let mut slab = slab(64);

        assert!(slab
            .allocate_and_load(&mut backend, TransferBuffer::new(Vec::new()))
            .is_none());
        assert_eq!(slab.head_vertex_index(), 0);
        assert!(slab.buffer().is_none());
    }

    #[test]
    fn test_release_leaves_hole() {
        let mut backend = HostBackend::new();
        let mut slab = slab(64);

        let a = slab
            .allocate_and_load(&mut backend, TransferBuffer::new(vec![1; 8]))
            .unwrap();
        let _b = slab
            .allocate_and_load(&mut backend, TransferBuffer::new(vec![2; 8]))
            .unwrap();

        a.release(&mut slab, &mut backend);
        assert_eq!(slab.used_vertex_count(), 2);
        assert_eq!(slab.head_vertex_index(), 4);
        assert!(!slab.reclaim(), "non-empty slab must not rewind");
    }

    #[test]
    fn test_reclaim_empty_slab() {
        let mut backend = HostBackend::new();
        let mut slab = slab(16);

        let a = slab
            .allocate_and_load(&mut backend, TransferBuffer::new(vec![1; 16]))
            .unwrap();
        assert!(slab.is_full());
        a.release(&mut slab, &mut backend);

        assert!(slab.is_empty());
        assert!(slab.reclaim());
        assert_eq!(slab.available_vertex_count(), 4);
    }

    #[test]
    fn test_transfer_copies_bytes() {
        let mut backend = HostBackend::new();
        let mut source = Slab::new(SlabId(1), 32, 4);
        let mut target = Slab::new(SlabId(2), 32, 4);

        let _pad = target
            .allocate_and_load(&mut backend, TransferBuffer::new(vec![0; 4]))
            .unwrap();
        let original = source
            .allocate_and_load(&mut backend, TransferBuffer::new(vec![5, 6, 7, 8, 9, 10, 11, 12]))
            .unwrap();

        let moved = target
            .transfer_from(&mut backend, &original, source.buffer().unwrap())
            .unwrap();
        assert_eq!(moved.base_quad_vertex_index(), 1);
        assert_eq!(moved.quad_vertex_count(), 2);
        assert_eq!(
            backend.read(target.buffer().unwrap(), 4, 8),
            Some(&[5, 6, 7, 8, 9, 10, 11, 12][..])
        );
    }

    #[test]
    fn test_capacity_rounds_down_to_whole_vertices() {
        let slab = Slab::new(SlabId(0), 100, 32);
        assert_eq!(slab.max_vertex_count(), 3);
        assert_eq!(slab.available_bytes(), 96);
    }
}

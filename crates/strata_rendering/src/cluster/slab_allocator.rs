//! Slab factory and bookkeeping.

use crate::gpu::GpuBackend;

use super::slab::{Slab, SlabId};

/// Aggregate slab accounting for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlabStats {
    /// Slabs claimed and not yet destroyed (includes retired ones).
    pub slab_count: usize,
    /// Capacity of those slabs in bytes.
    pub slab_bytes: u64,
    /// Slabs waiting for destruction at the next safe point.
    pub retired_count: usize,
}

/// Creates slabs, owns the GPU backend and tracks slab totals.
///
/// Each session owns exactly one allocator. Slabs are never pooled across
/// sizes: each is sized for its cluster and destroyed once empty.
pub struct SlabAllocator<B: GpuBackend> {
    backend: B,
    bytes_increment: u32,
    bytes_per_vertex: u32,
    next_slab_id: u64,
    slab_count: usize,
    slab_bytes: u64,
    /// Released slabs whose buffers may still be bound by an in-flight draw.
    retired: Vec<Slab>,
}

impl<B: GpuBackend> SlabAllocator<B> {
    /// Creates an allocator rounding capacities up to `bytes_increment`.
    #[must_use]
    pub fn new(backend: B, bytes_increment: u32, bytes_per_vertex: u32) -> Self {
        Self {
            backend,
            bytes_increment,
            bytes_per_vertex,
            next_slab_id: 0,
            slab_count: 0,
            slab_bytes: 0,
            retired: Vec::new(),
        }
    }

    /// Rounds `min_capacity_bytes` up to the allocation increment.
    #[must_use]
    pub fn round_capacity(&self, min_capacity_bytes: u64) -> u32 {
        let increment = u64::from(self.bytes_increment);
        let steps = min_capacity_bytes.max(1).div_ceil(increment);
        u32::try_from(steps * increment).unwrap_or(u32::MAX - u32::MAX % self.bytes_increment)
    }

    /// Creates a slab of at least `min_capacity_bytes`.
    pub fn claim(&mut self, min_capacity_bytes: u64) -> Slab {
        let capacity = self.round_capacity(min_capacity_bytes);
        let id = SlabId(self.next_slab_id);
        self.next_slab_id += 1;

        self.slab_count += 1;
        self.slab_bytes += u64::from(capacity);
        tracing::debug!(
            "claimed slab {:?}: {} bytes for {} requested ({} slabs, {} bytes total)",
            id,
            capacity,
            min_capacity_bytes,
            self.slab_count,
            self.slab_bytes
        );

        Slab::new(id, capacity, self.bytes_per_vertex)
    }

    /// Queues an empty slab for destruction at the next safe point.
    pub(crate) fn defer_destroy(&mut self, slab: Slab) {
        tracing::debug!("retired slab {:?} ({} bytes)", slab.id(), slab.capacity_bytes());
        self.retired.push(slab);
    }

    /// Destroys every retired slab's buffer.
    ///
    /// Call only once no submitted draw can reference those buffers.
    /// Returns the number of slabs destroyed.
    pub fn flush_retired(&mut self) -> usize {
        if self.retired.is_empty() {
            return 0;
        }
        self.backend.submit();
        let retired = std::mem::take(&mut self.retired);
        let count = retired.len();
        for mut slab in retired {
            if let Some(buffer) = slab.take_buffer() {
                self.backend.destroy_buffer(buffer, slab.capacity_bytes());
            }
            self.notify_shutdown(&slab);
        }
        count
    }

    /// Removes a destroyed slab from the totals.
    pub fn notify_shutdown(&mut self, slab: &Slab) {
        debug_assert!(self.slab_count > 0, "slab shutdown with no slabs claimed");
        self.slab_count -= 1;
        self.slab_bytes -= u64::from(slab.capacity_bytes());
    }

    /// Current totals.
    #[must_use]
    pub fn stats(&self) -> SlabStats {
        SlabStats {
            slab_count: self.slab_count,
            slab_bytes: self.slab_bytes,
            retired_count: self.retired.len(),
        }
    }

    /// Slab capacity increment in bytes.
    #[must_use]
    pub const fn bytes_increment(&self) -> u32 {
        self.bytes_increment
    }

    /// Size of one vertex record in bytes.
    #[must_use]
    pub const fn bytes_per_vertex(&self) -> u32 {
        self.bytes_per_vertex
    }

    /// The GPU backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The GPU backend, mutably.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::storage::TransferBuffer;
    use crate::gpu::HostBackend;

    fn allocator() -> SlabAllocator<HostBackend> {
        SlabAllocator::new(HostBackend::new(), 2048, 4)
    }

    #[test]
    fn test_capacity_rounds_up_to_increment() {
        let allocator = allocator();
        assert_eq!(allocator.round_capacity(0), 2048);
        assert_eq!(allocator.round_capacity(1000), 2048);
        assert_eq!(allocator.round_capacity(2048), 2048);
        assert_eq!(allocator.round_capacity(2500), 4096);
    }

    #[test]
    fn test_claim_tracks_totals() {
        let mut allocator = allocator();
        let a = allocator.claim(100);
        let b = allocator.claim(3000);

        assert_ne!(a.id(), b.id());
        assert_eq!(b.capacity_bytes(), 4096);
        let stats = allocator.stats();
        assert_eq!(stats.slab_count, 2);
        assert_eq!(stats.slab_bytes, 2048 + 4096);
    }

    #[test]
    fn test_release_is_deferred_until_flush() {
        let mut allocator = allocator();
        let mut slab = allocator.claim(16);
        let allocation = slab
            .allocate_and_load(allocator.backend_mut(), TransferBuffer::new(vec![3; 16]))
            .unwrap();
        allocation.release(&mut slab, allocator.backend_mut());

        slab.release(&mut allocator);
        assert_eq!(allocator.stats().slab_count, 1);
        assert_eq!(allocator.stats().retired_count, 1);
        assert_eq!(allocator.backend().live_buffer_count(), 1);

        assert_eq!(allocator.flush_retired(), 1);
        let stats = allocator.stats();
        assert_eq!(stats, SlabStats::default());
        assert_eq!(allocator.backend().live_buffer_count(), 0);
    }
}

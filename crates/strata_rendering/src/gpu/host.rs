//! CPU-memory backend.

use std::collections::HashMap;

use super::{DrawBindingId, GpuBackend, GpuBufferId};

/// Draw binding recorded by [`HostBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostDrawBinding {
    /// Buffer the binding reads from.
    pub buffer: GpuBufferId,
    /// First vertex record.
    pub base_quad_vertex_index: u32,
    /// Number of vertex records.
    pub quad_vertex_count: u32,
}

/// Backend keeping every "GPU" buffer in host memory.
///
/// Behaves like a GPU queue whose commands complete immediately, so buffer
/// contents can be inspected right after an upload or copy.
#[derive(Debug, Default)]
pub struct HostBackend {
    buffers: HashMap<GpuBufferId, Vec<u8>>,
    bindings: HashMap<DrawBindingId, HostDrawBinding>,
    next_buffer: u64,
    next_binding: u64,
    bytes_written: u64,
    bytes_copied: u64,
    submits: u32,
}

impl HostBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the full contents of a live buffer.
    #[must_use]
    pub fn buffer_bytes(&self, buffer: GpuBufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    /// Returns `len` bytes of a live buffer starting at `offset`.
    #[must_use]
    pub fn read(&self, buffer: GpuBufferId, offset: u32, len: u32) -> Option<&[u8]> {
        let start = offset as usize;
        self.buffers
            .get(&buffer)?
            .get(start..start + len as usize)
    }

    /// Returns a live draw binding.
    #[must_use]
    pub fn binding(&self, binding: DrawBindingId) -> Option<HostDrawBinding> {
        self.bindings.get(&binding).copied()
    }

    /// Number of buffers not yet destroyed.
    #[must_use]
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of draw bindings not yet destroyed.
    #[must_use]
    pub fn live_binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Total bytes uploaded from the CPU.
    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Total bytes copied buffer-to-buffer.
    #[must_use]
    pub const fn bytes_copied(&self) -> u64 {
        self.bytes_copied
    }

    /// Number of submits issued.
    #[must_use]
    pub const fn submit_count(&self) -> u32 {
        self.submits
    }
}

impl GpuBackend for HostBackend {
    fn create_buffer(&mut self, capacity_bytes: u32) -> GpuBufferId {
        let id = GpuBufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(id, vec![0; capacity_bytes as usize]);
        id
    }

    fn destroy_buffer(&mut self, buffer: GpuBufferId, capacity_bytes: u32) {
        let removed = self.buffers.remove(&buffer);
        debug_assert!(
            removed.is_some_and(|b| b.len() == capacity_bytes as usize),
            "destroyed unknown or mis-sized buffer {buffer:?}"
        );
    }

    fn write_buffer(&mut self, buffer: GpuBufferId, offset: u32, bytes: &[u8]) {
        let target = self.buffers.get_mut(&buffer);
        debug_assert!(target.is_some(), "write to unknown buffer {buffer:?}");
        let Some(target) = target else {
            return;
        };
        let start = offset as usize;
        target[start..start + bytes.len()].copy_from_slice(bytes);
        self.bytes_written += bytes.len() as u64;
    }

    fn copy_buffer(
        &mut self,
        src: GpuBufferId,
        src_offset: u32,
        dst: GpuBufferId,
        dst_offset: u32,
        len: u32,
    ) {
        let src_start = src_offset as usize;
        let source = self.buffers.get(&src);
        debug_assert!(source.is_some(), "copy from unknown buffer {src:?}");
        let Some(source) = source else {
            return;
        };
        let staged = source[src_start..src_start + len as usize].to_vec();
        self.write_buffer(dst, dst_offset, &staged);
        // The upload above is a copy, not a CPU write.
        self.bytes_written -= u64::from(len);
        self.bytes_copied += u64::from(len);
    }

    fn create_draw_binding(
        &mut self,
        buffer: GpuBufferId,
        base_quad_vertex_index: u32,
        quad_vertex_count: u32,
    ) -> DrawBindingId {
        let id = DrawBindingId(self.next_binding);
        self.next_binding += 1;
        self.bindings.insert(
            id,
            HostDrawBinding {
                buffer,
                base_quad_vertex_index,
                quad_vertex_count,
            },
        );
        id
    }

    fn destroy_draw_binding(&mut self, binding: DrawBindingId) {
        let removed = self.bindings.remove(&binding);
        debug_assert!(removed.is_some(), "destroyed unknown binding {binding:?}");
    }

    fn submit(&mut self) {
        self.submits += 1;
    }
}

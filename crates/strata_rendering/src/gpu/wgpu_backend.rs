//! WGPU backend.
//!
//! Slab buffers are plain vertex buffers. Buffer-to-buffer copies are
//! recorded into one command encoder and submitted together, so a whole
//! compaction pass costs a single queue submission.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use super::{DrawBindingId, GpuBackend, GpuBufferId};

/// Vertex range bound for drawing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgpuDrawBinding {
    /// Buffer holding the vertices.
    pub buffer: GpuBufferId,
    /// Byte range of the vertices inside the buffer.
    pub byte_range: Range<u64>,
    /// First vertex record.
    pub base_quad_vertex_index: u32,
    /// Number of vertex records.
    pub quad_vertex_count: u32,
}

/// Backend creating real `wgpu` buffers.
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    bytes_per_vertex: u32,
    buffers: HashMap<GpuBufferId, wgpu::Buffer>,
    bindings: HashMap<DrawBindingId, WgpuDrawBinding>,
    /// Copies recorded since the last submit.
    encoder: Option<wgpu::CommandEncoder>,
    next_buffer: u64,
    next_binding: u64,
}

impl WgpuBackend {
    /// Creates a backend on `device` / `queue` for `bytes_per_vertex`-sized records.
    #[must_use]
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, bytes_per_vertex: u32) -> Self {
        Self {
            device,
            queue,
            bytes_per_vertex,
            buffers: HashMap::new(),
            bindings: HashMap::new(),
            encoder: None,
            next_buffer: 0,
            next_binding: 0,
        }
    }

    /// Returns the `wgpu` buffer behind a handle.
    #[must_use]
    pub fn buffer(&self, buffer: GpuBufferId) -> Option<&wgpu::Buffer> {
        self.buffers.get(&buffer)
    }

    /// Returns a draw binding.
    #[must_use]
    pub fn binding(&self, binding: DrawBindingId) -> Option<&WgpuDrawBinding> {
        self.bindings.get(&binding)
    }

    /// Returns the slice to pass to `RenderPass::set_vertex_buffer`.
    #[must_use]
    pub fn vertex_slice(&self, binding: DrawBindingId) -> Option<wgpu::BufferSlice<'_>> {
        let binding = self.bindings.get(&binding)?;
        let buffer = self.buffers.get(&binding.buffer)?;
        Some(buffer.slice(binding.byte_range.clone()))
    }

    fn flush_copies(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }
}

impl GpuBackend for WgpuBackend {
    fn create_buffer(&mut self, capacity_bytes: u32) -> GpuBufferId {
        let id = GpuBufferId(self.next_buffer);
        self.next_buffer += 1;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("strata vertex slab"),
            size: u64::from(capacity_bytes),
            usage: wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        self.buffers.insert(id, buffer);
        tracing::trace!("created slab buffer {:?} ({} bytes)", id, capacity_bytes);
        id
    }

    fn destroy_buffer(&mut self, buffer: GpuBufferId, capacity_bytes: u32) {
        // Recorded copies may still read from this buffer.
        self.flush_copies();
        if let Some(buffer) = self.buffers.remove(&buffer) {
            debug_assert_eq!(buffer.size(), u64::from(capacity_bytes));
            buffer.destroy();
        }
    }

    fn write_buffer(&mut self, buffer: GpuBufferId, offset: u32, bytes: &[u8]) {
        // Queue writes land before the next submission's commands, so
        // pending copies go first to keep program order.
        self.flush_copies();
        if let Some(target) = self.buffers.get(&buffer) {
            self.queue.write_buffer(target, u64::from(offset), bytes);
        }
    }

    fn copy_buffer(
        &mut self,
        src: GpuBufferId,
        src_offset: u32,
        dst: GpuBufferId,
        dst_offset: u32,
        len: u32,
    ) {
        let (Some(source), Some(target)) = (self.buffers.get(&src), self.buffers.get(&dst)) else {
            return;
        };
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("strata slab compaction"),
            })
        });
        encoder.copy_buffer_to_buffer(
            source,
            u64::from(src_offset),
            target,
            u64::from(dst_offset),
            u64::from(len),
        );
    }

    fn create_draw_binding(
        &mut self,
        buffer: GpuBufferId,
        base_quad_vertex_index: u32,
        quad_vertex_count: u32,
    ) -> DrawBindingId {
        let id = DrawBindingId(self.next_binding);
        self.next_binding += 1;

        let stride = u64::from(self.bytes_per_vertex);
        let start = u64::from(base_quad_vertex_index) * stride;
        let end = start + u64::from(quad_vertex_count) * stride;
        self.bindings.insert(
            id,
            WgpuDrawBinding {
                buffer,
                byte_range: start..end,
                base_quad_vertex_index,
                quad_vertex_count,
            },
        );
        id
    }

    fn destroy_draw_binding(&mut self, binding: DrawBindingId) {
        self.bindings.remove(&binding);
    }

    fn submit(&mut self) {
        self.flush_copies();
    }
}

impl Drop for WgpuBackend {
    fn drop(&mut self) {
        self.flush_copies();
        for (_, buffer) in self.buffers.drain() {
            buffer.destroy();
        }
    }
}

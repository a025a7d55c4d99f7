//! GPU binding layer seam.
//!
//! The clustered storage never talks to a graphics API directly. It claims
//! buffers, uploads bytes, copies ranges between buffers and creates per-range
//! draw bindings through [`GpuBackend`].
//!
//! ## Implementations
//!
//! - [`HostBackend`]: buffers in CPU memory. Headless sessions and tests.
//! - [`WgpuBackend`]: real `wgpu` buffers.

mod host;
mod wgpu_backend;

pub use host::{HostBackend, HostDrawBinding};
pub use wgpu_backend::{WgpuBackend, WgpuDrawBinding};

/// Opaque handle to a GPU buffer owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuBufferId(pub u64);

/// Opaque handle to a draw binding scoped to one vertex range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawBindingId(pub u64);

/// Operations the storage needs from the GPU.
///
/// All offsets and lengths are in bytes and are multiples of
/// [`COPY_ALIGNMENT`](crate::config::COPY_ALIGNMENT). Resource exhaustion is
/// not reported: a backend either succeeds or aborts.
pub trait GpuBackend {
    /// Creates a buffer of `capacity_bytes`.
    fn create_buffer(&mut self, capacity_bytes: u32) -> GpuBufferId;

    /// Destroys a buffer. Called only once no draw can still reference it.
    fn destroy_buffer(&mut self, buffer: GpuBufferId, capacity_bytes: u32);

    /// Uploads `bytes` into `buffer` at `offset`.
    fn write_buffer(&mut self, buffer: GpuBufferId, offset: u32, bytes: &[u8]);

    /// Copies `len` bytes between buffers without a CPU round trip.
    fn copy_buffer(
        &mut self,
        src: GpuBufferId,
        src_offset: u32,
        dst: GpuBufferId,
        dst_offset: u32,
        len: u32,
    );

    /// Creates the draw binding for `quad_vertex_count` records starting at
    /// `base_quad_vertex_index` in `buffer`.
    fn create_draw_binding(
        &mut self,
        buffer: GpuBufferId,
        base_quad_vertex_index: u32,
        quad_vertex_count: u32,
    ) -> DrawBindingId;

    /// Destroys a draw binding.
    fn destroy_draw_binding(&mut self, binding: DrawBindingId);

    /// Flushes batched copy commands to the GPU queue.
    fn submit(&mut self) {}
}

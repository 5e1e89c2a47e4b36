//! # GPU Buffer Abstraction
//!
//! The core never names a concrete graphics API. Everything it needs from the
//! GPU goes through [`BufferBackend`]: create, upload, bind, delete.
//!
//! ```text
//!  simulation thread                 presentation thread
//!  ─────────────────                 ───────────────────
//!  ScopedBuffer::bytes_mut ──┐
//!     (shadow memory,        │       ScopedBuffer::flush(backend)
//!      dirty ranges)         └─────▶   create / upload / bind
//!
//!  drop(ScopedBuffer) ──▶ GpuReleaseQueue ──▶ release_pending(backend)
//! ```
//!
//! GPU handles are only ever created, uploaded to, and deleted on the thread
//! that owns the backend.

mod headless;
mod release;
#[cfg(feature = "wgpu-backend")]
mod wgpu_backend;

pub use headless::{BackendStats, HeadlessBufferBackend};
pub use release::GpuReleaseQueue;
#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::WgpuBufferBackend;

use serde::{Deserialize, Serialize};

use crate::error::GpuResult;

/// Opaque handle to a GPU-resident buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuBufferId(pub u64);

/// Usage hint passed to the backend when a resource is created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferUsage {
    /// Written once, drawn many times.
    Static,
    /// Rewritten occasionally.
    #[default]
    Dynamic,
    /// Rewritten every frame.
    Stream,
}

/// Binding point a buffer is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindTarget {
    /// Per-vertex attribute data.
    Vertex,
    /// Index (element) data.
    Index,
    /// Uniform block data.
    Uniform,
}

/// Buffer operations the core requires from a graphics API.
///
/// Implementations must only be driven from the thread that owns the GPU
/// context (the presentation thread).
pub trait BufferBackend {
    /// Creates a resource of `size` bytes for use at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::ResourceCreationFailed`](crate::error::GpuError::ResourceCreationFailed)
    /// if the backend cannot allocate the resource.
    fn create_buffer(
        &mut self,
        usage: BufferUsage,
        target: BindTarget,
        size: usize,
    ) -> GpuResult<GpuBufferId>;

    /// Uploads `data` into the resource starting at byte `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown or the range does not fit.
    fn upload(&mut self, id: GpuBufferId, offset: usize, data: &[u8]) -> GpuResult<()>;

    /// Attaches the resource to `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn bind(&mut self, id: GpuBufferId, target: BindTarget) -> GpuResult<()>;

    /// Releases the resource. Unknown handles are ignored.
    fn delete(&mut self, id: GpuBufferId);
}

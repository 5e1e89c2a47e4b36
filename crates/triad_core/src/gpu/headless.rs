//! In-memory [`BufferBackend`] for headless runs, CI and tests.

use std::collections::HashMap;

use super::{BindTarget, BufferBackend, BufferUsage, GpuBufferId};
use crate::error::{GpuError, GpuResult};

/// Counters kept by [`HeadlessBufferBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Resources created.
    pub created: u32,
    /// Resources deleted.
    pub deleted: u32,
    /// Upload calls.
    pub uploads: u32,
    /// Total bytes uploaded.
    pub bytes_uploaded: usize,
    /// Bind calls.
    pub binds: u32,
}

struct HeadlessBuffer {
    usage: BufferUsage,
    data: Vec<u8>,
}

/// A backend that keeps every resource in host memory.
///
/// Uploads are bounds-checked exactly like a real driver would, so a flush
/// that works here exercises the same offsets a GPU would see.
#[derive(Default)]
pub struct HeadlessBufferBackend {
    next_id: u64,
    buffers: HashMap<GpuBufferId, HeadlessBuffer>,
    bound: HashMap<BindTarget, GpuBufferId>,
    stats: BackendStats,
    /// Creation requests larger than this fail.
    creation_limit: Option<usize>,
}

impl HeadlessBufferBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every creation request above `limit` bytes fail.
    #[must_use]
    pub fn with_creation_limit(mut self, limit: usize) -> Self {
        self.creation_limit = Some(limit);
        self
    }

    /// Returns the counters.
    #[must_use]
    pub const fn stats(&self) -> BackendStats {
        self.stats
    }

    /// Resets the counters without touching resources.
    pub fn reset_stats(&mut self) {
        self.stats = BackendStats::default();
    }

    /// Returns the contents of a live resource.
    #[must_use]
    pub fn contents(&self, id: GpuBufferId) -> Option<&[u8]> {
        self.buffers.get(&id).map(|b| b.data.as_slice())
    }

    /// Returns the usage hint a live resource was created with.
    #[must_use]
    pub fn usage(&self, id: GpuBufferId) -> Option<BufferUsage> {
        self.buffers.get(&id).map(|b| b.usage)
    }

    /// Returns the resource currently bound at `target`.
    #[must_use]
    pub fn bound(&self, target: BindTarget) -> Option<GpuBufferId> {
        self.bound.get(&target).copied()
    }

    /// Number of live resources.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }
}

impl BufferBackend for HeadlessBufferBackend {
    fn create_buffer(
        &mut self,
        usage: BufferUsage,
        _target: BindTarget,
        size: usize,
    ) -> GpuResult<GpuBufferId> {
        if let Some(limit) = self.creation_limit {
            if size > limit {
                return Err(GpuError::ResourceCreationFailed {
                    size,
                    reason: format!("headless limit is {limit} bytes"),
                });
            }
        }
        self.next_id += 1;
        let id = GpuBufferId(self.next_id);
        self.buffers.insert(
            id,
            HeadlessBuffer {
                usage,
                data: vec![0; size],
            },
        );
        self.stats.created += 1;
        Ok(id)
    }

    fn upload(&mut self, id: GpuBufferId, offset: usize, data: &[u8]) -> GpuResult<()> {
        let buffer = self.buffers.get_mut(&id).ok_or(GpuError::UnknownBuffer(id))?;
        let end = offset + data.len();
        if end > buffer.data.len() {
            return Err(GpuError::UploadOutOfBounds {
                offset,
                len: data.len(),
                size: buffer.data.len(),
            });
        }
        buffer.data[offset..end].copy_from_slice(data);
        self.stats.uploads += 1;
        self.stats.bytes_uploaded += data.len();
        Ok(())
    }

    fn bind(&mut self, id: GpuBufferId, target: BindTarget) -> GpuResult<()> {
        if !self.buffers.contains_key(&id) {
            return Err(GpuError::UnknownBuffer(id));
        }
        self.bound.insert(target, id);
        self.stats.binds += 1;
        Ok(())
    }

    fn delete(&mut self, id: GpuBufferId) {
        if self.buffers.remove(&id).is_some() {
            self.stats.deleted += 1;
            self.bound.retain(|_, bound| *bound != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_bounds_checked() {
        let mut backend = HeadlessBufferBackend::new();
        let id = backend
            .create_buffer(BufferUsage::Dynamic, BindTarget::Vertex, 8)
            .unwrap();

        backend.upload(id, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.contents(id).unwrap(), &[0, 0, 0, 0, 1, 2, 3, 4]);

        let err = backend.upload(id, 6, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, GpuError::UploadOutOfBounds { .. }));
    }

    #[test]
    fn test_creation_limit() {
        let mut backend = HeadlessBufferBackend::new().with_creation_limit(16);
        assert!(backend
            .create_buffer(BufferUsage::Static, BindTarget::Index, 32)
            .is_err());
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn test_delete_unbinds() {
        let mut backend = HeadlessBufferBackend::new();
        let id = backend
            .create_buffer(BufferUsage::Stream, BindTarget::Uniform, 4)
            .unwrap();
        backend.bind(id, BindTarget::Uniform).unwrap();
        assert_eq!(backend.bound(BindTarget::Uniform), Some(id));

        backend.delete(id);
        assert_eq!(backend.bound(BindTarget::Uniform), None);
        assert_eq!(backend.stats().deleted, 1);
    }
}

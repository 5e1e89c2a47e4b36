//! # Scoped Buffer
//!
//! A resizable byte buffer with client-side shadow memory. Writes land in the
//! shadow copy and are tracked as dirty ranges; nothing reaches the GPU until
//! [`ScopedBuffer::flush`] runs on the presentation thread.
//!
//! ```text
//!  shadow: [########....####..........]   len = round_up(size, 4)
//!           └dirty─┘    └d─┘              capacity >= len
//!  gpu:    [==========================]   gpu_size = capacity when created
//! ```
//!
//! The GPU resource only grows. Shrinking the logical size keeps both the
//! backing capacity and the GPU resource; a grow past the backing capacity
//! marks everything dirty and the next flush re-creates the resource.

use std::ops::Range;

use bytemuck::Pod;

use super::dirty_ranges::DirtyRanges;
use crate::error::GpuResult;
use crate::gpu::{BindTarget, BufferBackend, BufferUsage, GpuBufferId, GpuReleaseQueue};

/// Shadow memory lengths and upload ranges are multiples of this.
pub const BUFFER_ALIGNMENT: usize = 4;

#[inline]
const fn align_up(value: usize) -> usize {
    (value + BUFFER_ALIGNMENT - 1) & !(BUFFER_ALIGNMENT - 1)
}

#[inline]
const fn align_down(value: usize) -> usize {
    value & !(BUFFER_ALIGNMENT - 1)
}

/// Argument for a vertex-attribute-pointer style call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexPointer {
    /// No GPU resource backs the buffer; points into shadow memory.
    Client(*const u8),
    /// GPU-backed; byte offset into the bound resource.
    Offset(usize),
}

/// Growable byte buffer with deferred GPU upload.
pub struct ScopedBuffer {
    usage: BufferUsage,
    size: usize,
    shadow: Vec<u8>,
    gpu: Option<GpuBufferId>,
    gpu_size: usize,
    dirty: DirtyRanges,
    release: Option<GpuReleaseQueue>,
}

impl ScopedBuffer {
    /// Creates an empty buffer. No GPU resource exists until the first flush.
    #[must_use]
    pub fn new(usage: BufferUsage) -> Self {
        Self {
            usage,
            size: 0,
            shadow: Vec::new(),
            gpu: None,
            gpu_size: 0,
            dirty: DirtyRanges::new(),
            release: None,
        }
    }

    /// Routes the GPU handle to `queue` when the buffer is dropped.
    #[must_use]
    pub fn with_release_queue(mut self, queue: GpuReleaseQueue) -> Self {
        self.release = Some(queue);
        self
    }

    /// Logical size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Backing capacity of the shadow memory in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        align_down(self.shadow.capacity())
    }

    /// Usage hint passed to the backend.
    #[inline]
    #[must_use]
    pub const fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Current GPU handle, if a flush has created one.
    #[inline]
    #[must_use]
    pub const fn gpu_handle(&self) -> Option<GpuBufferId> {
        self.gpu
    }

    /// Size of the GPU resource in bytes (0 if none).
    #[inline]
    #[must_use]
    pub const fn gpu_size(&self) -> usize {
        self.gpu_size
    }

    /// Returns true if any byte differs from the GPU copy.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// The pending dirty ranges.
    #[inline]
    #[must_use]
    pub fn dirty_ranges(&self) -> &DirtyRanges {
        &self.dirty
    }

    /// Changes the logical size.
    ///
    /// Growing past the backing capacity reallocates the shadow memory and
    /// marks the whole buffer dirty. Shrinking never frees backing memory.
    pub fn resize(&mut self, new_size: usize) {
        let new_len = align_up(new_size);
        let old_len = self.shadow.len();
        let old_capacity = self.shadow.capacity();

        if new_len > old_len {
            self.shadow.resize(new_len, 0);
        } else {
            self.shadow.truncate(new_len);
        }
        self.size = new_size;

        if self.shadow.capacity() == old_capacity {
            self.dirty.clip(new_len);
            // Bytes re-exposed after an earlier shrink are zero here but stale on the GPU.
            if new_len > old_len {
                self.dirty.insert(old_len, new_len);
            }
        } else {
            tracing::debug!(
                old_capacity,
                new_capacity = self.shadow.capacity(),
                "scoped buffer outgrew its backing memory"
            );
            self.dirty.mark_all(new_len);
        }
    }

    /// Records that `[begin, end)` differs from the GPU copy.
    pub fn mark_dirty(&mut self, begin: usize, end: usize) {
        debug_assert!(begin <= end && end <= self.size, "dirty range out of bounds");
        self.dirty.insert(begin, end.min(self.shadow.len()));
    }

    /// The logical contents.
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.shadow[..self.size]
    }

    /// Mutable access to `range`, which is marked dirty.
    pub fn bytes_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        debug_assert!(range.end <= self.size, "write past end of buffer");
        self.dirty.insert(range.start, range.end);
        &mut self.shadow[range]
    }

    /// Copies `values` into the buffer at byte `offset`.
    pub fn write_pod<T: Pod>(&mut self, offset: usize, values: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        self.bytes_mut(offset..offset + bytes.len()).copy_from_slice(bytes);
    }

    /// Reads `count` values starting at byte `offset`.
    ///
    /// Copies out, so `offset` needs no particular alignment.
    #[must_use]
    pub fn read_pod<T: Pod>(&self, offset: usize, count: usize) -> Vec<T> {
        let mut out = vec![T::zeroed(); count];
        let dst: &mut [u8] = bytemuck::cast_slice_mut(&mut out);
        dst.copy_from_slice(&self.shadow[offset..offset + dst.len()]);
        out
    }

    /// Sets every byte in `range` to `value`.
    pub fn fill(&mut self, range: Range<usize>, value: u8) {
        self.bytes_mut(range).fill(value);
    }

    /// Argument for a vertex attribute pointer at `byte_offset`.
    #[must_use]
    pub fn offset_pointer(&self, byte_offset: usize) -> VertexPointer {
        if self.gpu.is_some() {
            VertexPointer::Offset(byte_offset)
        } else {
            VertexPointer::Client(self.shadow.as_ptr().wrapping_add(byte_offset))
        }
    }

    /// Binds the buffer at `target`, uploading whatever changed.
    ///
    /// If the GPU resource is smaller than the backing capacity it is
    /// re-created at full capacity and uploaded in one go. Otherwise each
    /// disjoint dirty range is uploaded separately. Returns whether a
    /// resource ended up bound; an empty, never-flushed buffer binds nothing.
    ///
    /// # Errors
    ///
    /// Propagates backend failures. Dirty state is kept on failure so the
    /// next flush retries.
    pub fn flush(&mut self, backend: &mut dyn BufferBackend, target: BindTarget) -> GpuResult<bool> {
        let capacity = self.capacity().max(self.shadow.len());
        if self.gpu.is_none() && capacity == 0 {
            return Ok(false);
        }

        if self.gpu.is_none() || self.gpu_size < capacity {
            if let Some(old) = self.gpu.take() {
                backend.delete(old);
                self.gpu_size = 0;
            }
            let id = backend.create_buffer(self.usage, target, capacity)?;
            self.gpu = Some(id);
            self.gpu_size = capacity;
            backend.bind(id, target)?;
            if !self.shadow.is_empty() {
                backend.upload(id, 0, &self.shadow)?;
            }
            self.dirty.clear();
            tracing::debug!(size = capacity, "scoped buffer uploaded in full");
            return Ok(true);
        }

        let Some(id) = self.gpu else {
            return Ok(false);
        };
        backend.bind(id, target)?;
        if !self.dirty.is_empty() {
            let len = self.shadow.len();
            for range in self.dirty.iter() {
                let begin = align_down(range.start);
                let end = align_up(range.end).min(len);
                backend.upload(id, begin, &self.shadow[begin..end])?;
            }
            self.dirty.clear();
        }
        Ok(true)
    }

    /// Deletes the GPU resource immediately. Must run on the backend's thread.
    pub fn release(&mut self, backend: &mut dyn BufferBackend) {
        if let Some(id) = self.gpu.take() {
            backend.delete(id);
            self.gpu_size = 0;
            self.dirty.mark_all(self.shadow.len());
        }
    }
}

impl Drop for ScopedBuffer {
    fn drop(&mut self) {
        if let Some(id) = self.gpu.take() {
            match &self.release {
                Some(queue) => queue.defer(id),
                None => tracing::warn!(?id, "scoped buffer dropped without a release queue"),
            }
        }
    }
}

impl std::fmt::Debug for ScopedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedBuffer")
            .field("usage", &self.usage)
            .field("size", &self.size)
            .field("capacity", &self.capacity())
            .field("gpu", &self.gpu)
            .field("gpu_size", &self.gpu_size)
            .field("dirty_ranges", &self.dirty.len())
            .finish()
    }
}

//! Index groups: runs of indices sub-allocated from one index buffer.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{IndexElement, IndexType};
use crate::config::EngineConfig;
use crate::error::{AllocResult, GpuResult};
use crate::gpu::{BindTarget, BufferBackend, GpuBufferId, GpuReleaseQueue};
use crate::memory::{BufferAllocator, ScopedBuffer};

#[derive(Default)]
struct ChunkState {
    /// Byte begin -> byte end of every live group.
    chunks: BTreeMap<usize, usize>,
    /// Coalesced draw ranges in index units.
    ranges: Vec<Range<usize>>,
    dirty: bool,
}

struct GroupShared {
    allocator: BufferAllocator,
    state: Mutex<ChunkState>,
    index_size: usize,
    release: GpuReleaseQueue,
}

impl GroupShared {
    fn unregister(&self, begin: usize) {
        let mut state = self.state.lock();
        state.chunks.remove(&begin);
        state.dirty = true;
    }

    fn register(&self, begin: usize, end: usize) {
        let mut state = self.state.lock();
        state.chunks.insert(begin, end);
        state.dirty = true;
    }
}

/// Allocates [`IndexGroup`]s of index type `I` from one shared index buffer.
///
/// Clones share the same buffer.
pub struct IndexGroupAllocator<I: IndexElement> {
    shared: Arc<GroupShared>,
    _marker: PhantomData<fn() -> I>,
}

impl<I: IndexElement> Clone for IndexGroupAllocator<I> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _marker: PhantomData,
        }
    }
}

impl<I: IndexElement> IndexGroupAllocator<I> {
    /// Creates an allocator using the index settings in `config.buffers`.
    #[must_use]
    pub fn with_config(config: &EngineConfig) -> Self {
        let index_size = I::INDEX_TYPE.size();
        let release = GpuReleaseQueue::new();
        let buffer = ScopedBuffer::new(config.buffers.index_usage).with_release_queue(release.clone());
        let max_size = config
            .buffers
            .max_index_buffer_bytes
            .map(|cap| cap / index_size * index_size);
        Self {
            shared: Arc::new(GroupShared {
                allocator: BufferAllocator::from_buffer(buffer, max_size),
                state: Mutex::new(ChunkState::default()),
                index_size,
                release,
            }),
            _marker: PhantomData,
        }
    }

    /// Index width of this allocator.
    #[inline]
    #[must_use]
    pub const fn index_type(&self) -> IndexType {
        I::INDEX_TYPE
    }

    /// Allocates a zero-filled group of `count` indices.
    ///
    /// # Errors
    ///
    /// [`AllocError::CapacityExceeded`](crate::error::AllocError::CapacityExceeded)
    /// if the index buffer cap would be passed.
    pub fn allocate_index_group(&self, count: usize) -> AllocResult<IndexGroup<I>> {
        let bytes = count * self.shared.index_size;
        let begin = {
            let mut core = self.shared.allocator.lock();
            let begin = core.allocate(bytes)?;
            core.buffer_mut().fill(begin..begin + bytes, 0);
            begin
        };
        if bytes > 0 {
            self.shared.register(begin, begin + bytes);
        }
        Ok(IndexGroup {
            shared: Arc::clone(&self.shared),
            begin,
            len: count,
            _marker: PhantomData,
        })
    }

    /// Allocates a new group holding a copy of `source`.
    ///
    /// # Errors
    ///
    /// As [`allocate_index_group`](Self::allocate_index_group).
    pub fn allocate_copy_index_group(&self, source: &IndexGroup<I>) -> AllocResult<IndexGroup<I>> {
        let group = self.allocate_index_group(source.len())?;
        group.copy_from(source);
        Ok(group)
    }

    /// Live groups coalesced into the fewest contiguous index ranges.
    ///
    /// Recomputed only after a group was allocated or deleted.
    #[must_use]
    pub fn draw_ranges(&self) -> Vec<Range<usize>> {
        let mut state = self.shared.state.lock();
        if state.dirty {
            let index_size = self.shared.index_size;
            let mut ranges: Vec<Range<usize>> = Vec::with_capacity(state.chunks.len());
            for (&begin, &end) in &state.chunks {
                let (begin, end) = (begin / index_size, end / index_size);
                match ranges.last_mut() {
                    Some(last) if last.end == begin => last.end = end,
                    _ => ranges.push(begin..end),
                }
            }
            state.ranges = ranges;
            state.dirty = false;
        }
        state.ranges.clone()
    }

    /// Number of non-empty groups alive.
    #[must_use]
    pub fn live_group_count(&self) -> usize {
        self.shared.state.lock().chunks.len()
    }

    /// Uploads pending changes and binds the buffer as index data.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn flush(&self, backend: &mut dyn BufferBackend) -> GpuResult<bool> {
        self.shared.allocator.flush(backend, BindTarget::Index)
    }

    /// Current GPU handle of the index buffer.
    #[must_use]
    pub fn gpu_handle(&self) -> Option<GpuBufferId> {
        self.shared.allocator.lock().buffer().gpu_handle()
    }

    /// Stable identity of the shared index buffer, equal across clones.
    #[must_use]
    pub fn buffer_identity(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }

    /// Queue receiving the index buffer's GPU handle once every clone and
    /// group is gone.
    #[must_use]
    pub fn release_queue(&self) -> &GpuReleaseQueue {
        &self.shared.release
    }

    /// Bytes currently held by live groups.
    #[must_use]
    pub fn bytes_allocated(&self) -> usize {
        self.shared.allocator.bytes_allocated()
    }
}

impl<I: IndexElement> std::fmt::Debug for IndexGroupAllocator<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexGroupAllocator")
            .field("index_type", &I::INDEX_TYPE)
            .field("allocator", &self.shared.allocator)
            .finish_non_exhaustive()
    }
}

/// A run of indices owned by one drawable.
///
/// Dropping the group (or calling [`delete`](Self::delete)) zero-fills its
/// indices and returns them to the allocator.
pub struct IndexGroup<I: IndexElement> {
    shared: Arc<GroupShared>,
    begin: usize,
    len: usize,
    _marker: PhantomData<fn() -> I>,
}

impl<I: IndexElement> IndexGroup<I> {
    /// Number of indices.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length group.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Position in the index buffer, in index units.
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        let first = self.begin / self.shared.index_size;
        first..first + self.len
    }

    /// Writes `values` starting `offset` indices into the group.
    pub fn write(&self, offset: usize, values: &[I]) {
        debug_assert!(offset + values.len() <= self.len, "write past end of index group");
        self.shared
            .allocator
            .write_pod(self.begin + offset * self.shared.index_size, values);
    }

    /// Reads the whole group.
    #[must_use]
    pub fn read(&self) -> Vec<I> {
        self.shared.allocator.read_pod(self.begin, self.len)
    }

    /// Copies as many indices from `source` as fit.
    pub fn copy_from(&self, source: &Self) {
        let count = self.len.min(source.len);
        let values: Vec<I> = source.shared.allocator.read_pod(source.begin, count);
        self.write(0, &values);
    }

    /// Deletes the group now.
    pub fn delete(self) {
        drop(self);
    }
}

impl<I: IndexElement> Drop for IndexGroup<I> {
    fn drop(&mut self) {
        let bytes = self.len * self.shared.index_size;
        if bytes == 0 {
            return;
        }
        let end = self.begin + bytes;
        // Unregister first so a new group at the same offset keeps its chunk.
        self.shared.unregister(self.begin);
        let mut core = self.shared.allocator.lock();
        core.buffer_mut().fill(self.begin..end, 0);
        core.deallocate(self.begin, end);
    }
}

impl<I: IndexElement> std::fmt::Debug for IndexGroup<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexGroup")
            .field("range", &self.range())
            .finish()
    }
}

//! # Buffer Allocator
//!
//! Free-list sub-allocation over a single [`ScopedBuffer`].
//!
//! ## Layout
//!
//! ```text
//!  0                                                   size
//!  [ alloc ][  free  ][ alloc ][ alloc ][ free ][ alloc ]
//!            └─ free_by_end / free_by_size ─┘
//! ```
//!
//! - Free blocks are indexed twice: by end offset (for coalescing on
//!   deallocation) and by `(size, begin)` (for smallest-fit lookup).
//! - No two free blocks are ever adjacent.
//! - There is never a free block at the tail: freeing the last block shrinks
//!   the buffer instead.
//!
//! Every public method on [`BufferAllocator`] takes the allocator's single
//! mutex for its whole duration. [`BufferAllocator::lock`] hands out the
//! guarded [`AllocatorCore`], whose methods are the unlocked variants; hold
//! the guard to run several operations atomically or to keep a slice of the
//! buffer valid across calls.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use bytemuck::Pod;
use parking_lot::{Mutex, MutexGuard};

use super::scoped_buffer::ScopedBuffer;
use crate::error::{AllocError, AllocResult, GpuResult};
use crate::gpu::{BindTarget, BufferBackend, BufferUsage};

/// Order in which [`AllocatorCore::fragmented_allocate`] consumes free blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FragmentPolicy {
    /// Ascending block size, so larger blocks stay whole for contiguous
    /// requests. A block bigger than the remainder is split.
    #[default]
    SmallestFirst,
}

/// The allocator state. Reached through [`BufferAllocator::lock`].
pub struct AllocatorCore {
    buffer: ScopedBuffer,
    max_size: Option<usize>,
    allocated: usize,
    free_total: usize,
    /// end -> begin
    free_by_end: BTreeMap<usize, usize>,
    /// (size, begin)
    free_by_size: BTreeSet<(usize, usize)>,
    policy: FragmentPolicy,
}

impl AllocatorCore {
    fn new(buffer: ScopedBuffer, max_size: Option<usize>) -> Self {
        Self {
            buffer,
            max_size,
            allocated: 0,
            free_total: 0,
            free_by_end: BTreeMap::new(),
            free_by_size: BTreeSet::new(),
            policy: FragmentPolicy::default(),
        }
    }

    fn insert_free(&mut self, begin: usize, end: usize) {
        self.free_by_end.insert(end, begin);
        self.free_by_size.insert((end - begin, begin));
        self.free_total += end - begin;
    }

    fn remove_free(&mut self, begin: usize, end: usize) {
        self.free_by_end.remove(&end);
        self.free_by_size.remove(&(end - begin, begin));
        self.free_total -= end - begin;
    }

    fn overlaps_free(&self, begin: usize, end: usize) -> bool {
        self.free_by_end
            .range(begin + 1..)
            .next()
            .is_some_and(|(_, &free_begin)| free_begin < end)
    }

    fn grow(&mut self, n: usize) -> AllocResult<usize> {
        let end = self.buffer.size();
        let refused = |core: &Self| AllocError::CapacityExceeded {
            requested: n,
            available: core.max_allocate_possible(),
        };
        let Some(new_size) = end.checked_add(n) else {
            tracing::warn!(requested = n, size = end, "allocation refused: size overflow");
            return Err(refused(self));
        };
        if let Some(max) = self.max_size {
            if new_size > max {
                tracing::warn!(requested = n, size = end, max, "allocation refused by size cap");
                return Err(refused(self));
            }
        }
        self.buffer.resize(new_size);
        self.allocated += n;
        Ok(end)
    }

    /// Allocates `n` contiguous bytes and returns their offset.
    ///
    /// Uses the smallest free block that fits, returning the leftover to the
    /// free list. Without a fitting block the buffer grows by exactly `n`.
    ///
    /// # Errors
    ///
    /// [`AllocError::CapacityExceeded`] if growing would pass the size cap.
    pub fn allocate(&mut self, n: usize) -> AllocResult<usize> {
        if n == 0 {
            return Ok(self.buffer.size());
        }
        if let Some(&(size, begin)) = self.free_by_size.range((n, 0)..).next() {
            self.remove_free(begin, begin + size);
            if size > n {
                self.insert_free(begin + n, begin + size);
            }
            self.allocated += n;
            return Ok(begin);
        }
        self.grow(n)
    }

    /// Allocates `n` bytes as one or more ranges appended to `out`.
    ///
    /// Free blocks are consumed smallest first; whatever remains once they
    /// run out comes from one contiguous growth appended last. Ranges from
    /// this call that touch are merged; entries already in `out` are left
    /// alone.
    ///
    /// # Errors
    ///
    /// [`AllocError::CapacityExceeded`] if
    /// [`max_fragmented_allocate_possible`](Self::max_fragmented_allocate_possible)
    /// is below `n`. Nothing is allocated in that case.
    pub fn fragmented_allocate(&mut self, n: usize, out: &mut Vec<Range<usize>>) -> AllocResult<()> {
        let possible = self.max_fragmented_allocate_possible();
        if possible < n {
            return Err(AllocError::CapacityExceeded {
                requested: n,
                available: possible,
            });
        }

        let first_new = out.len();
        let push = |out: &mut Vec<Range<usize>>, range: Range<usize>| {
            let len = out.len();
            match out.last_mut() {
                Some(last) if len > first_new && last.end == range.start => last.end = range.end,
                _ => out.push(range),
            }
        };

        let mut remaining = n;
        match self.policy {
            FragmentPolicy::SmallestFirst => {
                while remaining > 0 {
                    let Some(&(size, begin)) = self.free_by_size.iter().next() else {
                        break;
                    };
                    let take = size.min(remaining);
                    self.remove_free(begin, begin + size);
                    if take < size {
                        self.insert_free(begin + take, begin + size);
                    }
                    self.allocated += take;
                    remaining -= take;
                    push(out, begin..begin + take);
                }
            }
        }

        if remaining > 0 {
            let offset = self.grow(remaining)?;
            push(out, offset..offset + remaining);
        }
        Ok(())
    }

    /// Returns `[begin, end)` to the allocator.
    ///
    /// Merges with free neighbours on both sides. If the merged block reaches
    /// the end of the buffer the buffer is truncated instead of free-listed.
    pub fn deallocate(&mut self, begin: usize, end: usize) {
        if begin >= end {
            return;
        }
        debug_assert!(end <= self.buffer.size(), "deallocation past end of buffer");
        debug_assert!(!self.overlaps_free(begin, end), "double deallocation of {begin}..{end}");
        debug_assert!(self.allocated >= end - begin, "deallocating more than allocated");

        self.allocated -= end - begin;
        let mut merged_begin = begin;
        let mut merged_end = end;

        if let Some(&prev_begin) = self.free_by_end.get(&begin) {
            self.remove_free(prev_begin, begin);
            merged_begin = prev_begin;
        }
        if let Some((&next_end, &next_begin)) = self.free_by_end.range(end + 1..).next() {
            if next_begin == end {
                self.remove_free(next_begin, next_end);
                merged_end = next_end;
            }
        }

        if merged_end == self.buffer.size() {
            self.buffer.resize(merged_begin);
        } else {
            self.insert_free(merged_begin, merged_end);
        }
    }

    /// Whether [`allocate`](Self::allocate) of `n` bytes would succeed.
    #[must_use]
    pub fn proxy_allocate(&self, n: usize) -> bool {
        n == 0 || self.free_by_size.range((n, 0)..).next().is_some() || self.can_grow(n)
    }

    /// Whether [`fragmented_allocate`](Self::fragmented_allocate) of `n` bytes would succeed.
    #[must_use]
    pub fn proxy_fragmented_allocate(&self, n: usize) -> bool {
        self.max_fragmented_allocate_possible() >= n
    }

    fn can_grow(&self, n: usize) -> bool {
        match self.buffer.size().checked_add(n) {
            Some(new_size) => self.max_size.map_or(true, |max| new_size <= max),
            None => false,
        }
    }

    fn growth_headroom(&self) -> usize {
        self.max_size
            .map_or(usize::MAX - self.buffer.size(), |max| max.saturating_sub(self.buffer.size()))
    }

    /// Largest contiguous allocation that would currently succeed.
    #[must_use]
    pub fn max_allocate_possible(&self) -> usize {
        let largest_free = self.free_by_size.iter().next_back().map_or(0, |&(size, _)| size);
        largest_free.max(self.growth_headroom())
    }

    /// Largest fragmented allocation that would currently succeed.
    #[must_use]
    pub fn max_fragmented_allocate_possible(&self) -> usize {
        self.free_total.saturating_add(self.growth_headroom())
    }

    /// Bytes currently handed out.
    #[inline]
    #[must_use]
    pub const fn bytes_allocated(&self) -> usize {
        self.allocated
    }

    /// Sum of all free block sizes.
    #[inline]
    #[must_use]
    pub const fn free_blocks_total_size(&self) -> usize {
        self.free_total
    }

    /// Number of free blocks.
    #[inline]
    #[must_use]
    pub fn free_block_count(&self) -> usize {
        self.free_by_end.len()
    }

    /// Free blocks in ascending offset order.
    pub fn free_blocks(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.free_by_end.iter().map(|(&end, &begin)| begin..end)
    }

    /// Logical size of the underlying buffer.
    #[inline]
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer.size()
    }

    /// `[first allocated byte, buffer end)`, empty when nothing is allocated.
    #[must_use]
    pub fn allocated_range(&self) -> Range<usize> {
        let end = self.buffer.size();
        if self.allocated == 0 {
            return end..end;
        }
        let begin = match self.free_by_end.iter().next() {
            Some((&free_end, &0)) => free_end,
            _ => 0,
        };
        begin..end
    }

    /// Size cap, if any.
    #[inline]
    #[must_use]
    pub const fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    /// Active fragmentation policy.
    #[inline]
    #[must_use]
    pub const fn policy(&self) -> FragmentPolicy {
        self.policy
    }

    /// The underlying buffer.
    #[inline]
    #[must_use]
    pub const fn buffer(&self) -> &ScopedBuffer {
        &self.buffer
    }

    /// The underlying buffer, mutably. Resizing it directly breaks the
    /// allocator's accounting; write through it instead.
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut ScopedBuffer {
        &mut self.buffer
    }

    /// Copies `values` to byte `offset` of the buffer.
    pub fn write_pod<T: Pod>(&mut self, offset: usize, values: &[T]) {
        self.buffer.write_pod(offset, values);
    }

    /// Reads `count` values from byte `offset` of the buffer.
    #[must_use]
    pub fn read_pod<T: Pod>(&self, offset: usize, count: usize) -> Vec<T> {
        self.buffer.read_pod(offset, count)
    }
}

/// Thread-safe free-list allocator over one [`ScopedBuffer`].
pub struct BufferAllocator {
    core: Mutex<AllocatorCore>,
}

impl BufferAllocator {
    /// Creates an allocator with no size cap.
    #[must_use]
    pub fn new(usage: BufferUsage) -> Self {
        Self::from_buffer(ScopedBuffer::new(usage), None)
    }

    /// Creates an allocator whose buffer may never exceed `max_size` bytes.
    #[must_use]
    pub fn with_max_size(usage: BufferUsage, max_size: usize) -> Self {
        Self::from_buffer(ScopedBuffer::new(usage), Some(max_size))
    }

    /// Wraps an existing (empty) buffer.
    #[must_use]
    pub fn from_buffer(buffer: ScopedBuffer, max_size: Option<usize>) -> Self {
        debug_assert_eq!(buffer.size(), 0, "allocator buffers must start empty");
        Self {
            core: Mutex::new(AllocatorCore::new(buffer, max_size)),
        }
    }

    /// Takes the allocator mutex.
    ///
    /// Any allocate or deallocate may move the buffer contents, so callers
    /// that need a slice to stay valid across operations hold this guard.
    pub fn lock(&self) -> MutexGuard<'_, AllocatorCore> {
        self.core.lock()
    }

    /// See [`AllocatorCore::allocate`].
    ///
    /// # Errors
    ///
    /// [`AllocError::CapacityExceeded`] if the size cap would be passed.
    pub fn allocate(&self, n: usize) -> AllocResult<usize> {
        self.core.lock().allocate(n)
    }

    /// See [`AllocatorCore::fragmented_allocate`].
    ///
    /// # Errors
    ///
    /// [`AllocError::CapacityExceeded`] if the request cannot be satisfied.
    pub fn fragmented_allocate(&self, n: usize, out: &mut Vec<Range<usize>>) -> AllocResult<()> {
        self.core.lock().fragmented_allocate(n, out)
    }

    /// See [`AllocatorCore::deallocate`].
    pub fn deallocate(&self, begin: usize, end: usize) {
        self.core.lock().deallocate(begin, end);
    }

    /// See [`AllocatorCore::proxy_allocate`].
    #[must_use]
    pub fn proxy_allocate(&self, n: usize) -> bool {
        self.core.lock().proxy_allocate(n)
    }

    /// See [`AllocatorCore::proxy_fragmented_allocate`].
    #[must_use]
    pub fn proxy_fragmented_allocate(&self, n: usize) -> bool {
        self.core.lock().proxy_fragmented_allocate(n)
    }

    /// Bytes currently handed out.
    #[must_use]
    pub fn bytes_allocated(&self) -> usize {
        self.core.lock().bytes_allocated()
    }

    /// Sum of all free block sizes.
    #[must_use]
    pub fn free_blocks_total_size(&self) -> usize {
        self.core.lock().free_blocks_total_size()
    }

    /// Logical size of the underlying buffer.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.core.lock().buffer_size()
    }

    /// `[first allocated byte, buffer end)`.
    #[must_use]
    pub fn allocated_range(&self) -> Range<usize> {
        self.core.lock().allocated_range()
    }

    /// Largest contiguous allocation that would currently succeed.
    #[must_use]
    pub fn max_allocate_possible(&self) -> usize {
        self.core.lock().max_allocate_possible()
    }

    /// Largest fragmented allocation that would currently succeed.
    #[must_use]
    pub fn max_fragmented_allocate_possible(&self) -> usize {
        self.core.lock().max_fragmented_allocate_possible()
    }

    /// Copies `values` to byte `offset`.
    pub fn write_pod<T: Pod>(&self, offset: usize, values: &[T]) {
        self.core.lock().write_pod(offset, values);
    }

    /// Reads `count` values from byte `offset`.
    #[must_use]
    pub fn read_pod<T: Pod>(&self, offset: usize, count: usize) -> Vec<T> {
        self.core.lock().read_pod(offset, count)
    }

    /// Flushes the underlying buffer to `backend`. See [`ScopedBuffer::flush`].
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn flush(&self, backend: &mut dyn BufferBackend, target: BindTarget) -> GpuResult<bool> {
        self.core.lock().buffer_mut().flush(backend, target)
    }
}

impl std::fmt::Debug for BufferAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.lock();
        f.debug_struct("BufferAllocator")
            .field("buffer_size", &core.buffer_size())
            .field("allocated", &core.bytes_allocated())
            .field("free_blocks", &core.free_block_count())
            .field("max_size", &core.max_size())
            .finish()
    }
}

//! Draw commands: what geometry a descriptor submits.

use std::ops::Range;

use parking_lot::Mutex;
use triad_core::{BufferBackend, GpuResult, IndexElement, IndexGroupAllocator, IndexType};

use crate::device::PrimitiveType;

/// Geometry source of a [`DrawCallDescriptor`](super::DrawCallDescriptor).
pub trait DrawCommand: Send + Sync {
    /// Primitive assembly mode.
    fn primitive(&self) -> PrimitiveType;

    /// Identity of the buffer the ranges index into; 0 for non-indexed
    /// commands. Commands sharing a non-zero identity can be merged.
    fn buffer_identity(&self) -> usize;

    /// Index width, or `None` for array draws.
    fn index_type(&self) -> Option<IndexType>;

    /// Nothing to submit this frame.
    fn is_empty(&self) -> bool;

    /// Ranges to submit, in index (or vertex) units.
    fn ranges(&self) -> Vec<Range<usize>>;

    /// Uploads and binds whatever the command reads. Presentation thread.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    fn prepare(&self, backend: &mut dyn BufferBackend) -> GpuResult<()>;
}

/// Draws every live group of an [`IndexGroupAllocator`], coalesced.
pub struct IndexedDraw<I: IndexElement> {
    primitive: PrimitiveType,
    indices: IndexGroupAllocator<I>,
}

impl<I: IndexElement> IndexedDraw<I> {
    /// Draws the groups of `indices` as `primitive`.
    #[must_use]
    pub fn new(primitive: PrimitiveType, indices: IndexGroupAllocator<I>) -> Self {
        Self { primitive, indices }
    }

    /// The allocator this command draws from.
    #[must_use]
    pub fn indices(&self) -> &IndexGroupAllocator<I> {
        &self.indices
    }
}

impl<I: IndexElement> DrawCommand for IndexedDraw<I> {
    fn primitive(&self) -> PrimitiveType {
        self.primitive
    }

    fn buffer_identity(&self) -> usize {
        self.indices.buffer_identity()
    }

    fn index_type(&self) -> Option<IndexType> {
        Some(I::INDEX_TYPE)
    }

    fn is_empty(&self) -> bool {
        self.indices.live_group_count() == 0
    }

    fn ranges(&self) -> Vec<Range<usize>> {
        self.indices.draw_ranges()
    }

    fn prepare(&self, backend: &mut dyn BufferBackend) -> GpuResult<()> {
        self.indices.flush(backend).map(|_| ())
    }
}

/// Draws a vertex range without indices.
pub struct ArrayDraw {
    primitive: PrimitiveType,
    vertices: Mutex<Range<usize>>,
}

impl ArrayDraw {
    /// Draws `vertices` as `primitive`.
    #[must_use]
    pub fn new(primitive: PrimitiveType, vertices: Range<usize>) -> Self {
        Self {
            primitive,
            vertices: Mutex::new(vertices),
        }
    }

    /// Replaces the vertex range.
    pub fn set_range(&self, vertices: Range<usize>) {
        *self.vertices.lock() = vertices;
    }
}

impl DrawCommand for ArrayDraw {
    fn primitive(&self) -> PrimitiveType {
        self.primitive
    }

    fn buffer_identity(&self) -> usize {
        0
    }

    fn index_type(&self) -> Option<IndexType> {
        None
    }

    fn is_empty(&self) -> bool {
        self.vertices.lock().is_empty()
    }

    fn ranges(&self) -> Vec<Range<usize>> {
        vec![self.vertices.lock().clone()]
    }

    fn prepare(&self, _backend: &mut dyn BufferBackend) -> GpuResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triad_core::{EngineConfig, HeadlessBufferBackend};

    #[test]
    fn test_indexed_draw_tracks_groups() {
        let indices = IndexGroupAllocator::<u16>::with_config(&EngineConfig::default());
        let draw = IndexedDraw::new(PrimitiveType::Triangles, indices.clone());
        assert!(draw.is_empty());

        let a = indices.allocate_index_group(6).unwrap();
        let _b = indices.allocate_index_group(3).unwrap();
        assert_eq!(draw.ranges(), vec![0..9]);
        assert_eq!(draw.index_type(), Some(IndexType::U16));
        assert_eq!(draw.buffer_identity(), indices.buffer_identity());

        drop(a);
        assert_eq!(draw.ranges(), vec![6..9]);

        let mut backend = HeadlessBufferBackend::new();
        draw.prepare(&mut backend).unwrap();
        assert!(indices.gpu_handle().is_some());
    }

    #[test]
    fn test_array_draw_range() {
        let draw = ArrayDraw::new(PrimitiveType::Lines, 0..0);
        assert!(draw.is_empty());
        draw.set_range(4..10);
        assert!(!draw.is_empty());
        assert_eq!(draw.ranges(), vec![4..10]);
        assert_eq!(draw.buffer_identity(), 0);
    }
}

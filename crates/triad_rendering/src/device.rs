//! Draw-side graphics abstraction.
//!
//! Buffer management lives in [`triad_core::BufferBackend`]; this module
//! adds the calls a draw traversal issues. Nothing here names a concrete
//! graphics API.

use std::ops::Range;

use triad_core::{BufferBackend, GpuBufferId, IndexType, VertexPointer};

/// A linked shader program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// A texture object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Primitive assembly mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveType {
    /// Independent points.
    Points,
    /// Independent line segments.
    Lines,
    /// Connected line segments.
    LineStrip,
    /// Independent triangles.
    Triangles,
    /// Connected triangles.
    TriangleStrip,
}

/// Scalar type of one attribute component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentType {
    /// 32-bit float.
    F32,
    /// Unsigned byte.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 32-bit integer.
    U32,
}

/// How one vertex attribute is read from its record buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeFormat {
    /// Components per vertex (1 to 4).
    pub components: u8,
    /// Component scalar type.
    pub component: ComponentType,
    /// Map integer components to `[0, 1]` / `[-1, 1]`.
    pub normalized: bool,
    /// Bytes between consecutive vertices.
    pub stride: u32,
    /// Byte offset of the attribute within a record.
    pub offset: u32,
}

impl AttributeFormat {
    /// Tightly packed `f32` attribute.
    #[must_use]
    pub const fn float(components: u8, stride: u32, offset: u32) -> Self {
        Self {
            components,
            component: ComponentType::F32,
            normalized: false,
            stride,
            offset,
        }
    }
}

/// Blend equation preset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Blending disabled.
    #[default]
    Opaque,
    /// Source-alpha blending.
    Alpha,
    /// Additive blending.
    Additive,
}

/// Fixed-function state applied before a draw.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderState {
    /// Blend preset.
    pub blend: BlendMode,
    /// Depth testing enabled.
    pub depth_test: bool,
    /// Depth writes enabled.
    pub depth_write: bool,
    /// Back-face culling enabled.
    pub cull_back_faces: bool,
}

/// Draw calls the core issues. Driven only from the presentation thread.
pub trait DrawBackend {
    /// Makes `program` current.
    fn use_program(&mut self, program: ProgramId);

    /// Binds `textures` to consecutive units starting at 0.
    fn bind_textures(&mut self, textures: &[TextureId]);

    /// Applies fixed-function state.
    fn apply_state(&mut self, state: &RenderState);

    /// Points attribute `slot` at `buffer` (or client memory).
    fn set_attribute(
        &mut self,
        slot: usize,
        buffer: Option<GpuBufferId>,
        pointer: VertexPointer,
        format: &AttributeFormat,
    );

    /// Uploads the current program's uniform block.
    fn upload_uniforms(&mut self, data: &[u8]);

    /// Draws `vertices` without an index buffer.
    fn draw_arrays(&mut self, primitive: PrimitiveType, vertices: Range<usize>);

    /// Draws `indices` from the bound index buffer.
    fn draw_elements(&mut self, primitive: PrimitiveType, index_type: IndexType, indices: Range<usize>);

    /// Draws several index ranges in one call.
    fn multi_draw_elements(&mut self, primitive: PrimitiveType, index_type: IndexType, ranges: &[Range<usize>]);

    /// Whether [`multi_draw_elements`](Self::multi_draw_elements) is native.
    fn supports_multi_draw(&self) -> bool;
}

/// A device providing both buffer and draw operations.
pub trait GraphicsDevice: BufferBackend + DrawBackend {}

impl<T: BufferBackend + DrawBackend> GraphicsDevice for T {}

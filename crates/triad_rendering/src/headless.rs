//! Recording [`GraphicsDevice`](crate::device::GraphicsDevice) for headless
//! runs and tests.

use std::ops::Range;

use triad_core::{
    BindTarget, BufferBackend, BufferUsage, GpuBufferId, GpuResult, HeadlessBufferBackend, IndexType,
    VertexPointer,
};

use crate::device::{AttributeFormat, DrawBackend, PrimitiveType, ProgramId, RenderState, TextureId};

/// One recorded draw-side call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    /// `use_program`.
    UseProgram(ProgramId),
    /// `bind_textures`.
    BindTextures(Vec<TextureId>),
    /// `apply_state`.
    ApplyState(RenderState),
    /// `set_attribute`; pointers are recorded as their byte offset, or
    /// `None` for client memory.
    SetAttribute {
        /// Attribute slot.
        slot: usize,
        /// Source buffer.
        buffer: Option<GpuBufferId>,
        /// Byte offset into `buffer`.
        offset: Option<usize>,
        /// Attribute layout.
        format: AttributeFormat,
    },
    /// `upload_uniforms`.
    UploadUniforms(Vec<u8>),
    /// `draw_arrays`.
    DrawArrays(PrimitiveType, Range<usize>),
    /// `draw_elements`.
    DrawElements(PrimitiveType, IndexType, Range<usize>),
    /// `multi_draw_elements`.
    MultiDrawElements(PrimitiveType, IndexType, Vec<Range<usize>>),
}

impl DeviceCall {
    /// Returns true for the calls that submit geometry.
    #[must_use]
    pub const fn is_draw(&self) -> bool {
        matches!(
            self,
            Self::DrawArrays(..) | Self::DrawElements(..) | Self::MultiDrawElements(..)
        )
    }
}

/// Host-memory device that records every draw-side call.
#[derive(Default)]
pub struct HeadlessDevice {
    buffers: HeadlessBufferBackend,
    calls: Vec<DeviceCall>,
    multi_draw: bool,
}

impl HeadlessDevice {
    /// Creates a device that supports multi-draw.
    #[must_use]
    pub fn new() -> Self {
        Self {
            multi_draw: true,
            ..Self::default()
        }
    }

    /// Creates a device without native multi-draw.
    #[must_use]
    pub fn without_multi_draw() -> Self {
        Self::default()
    }

    /// Turns native multi-draw support on or off.
    pub fn set_multi_draw(&mut self, enabled: bool) {
        self.multi_draw = enabled;
    }

    /// Calls recorded since the last [`take_calls`](Self::take_calls).
    #[must_use]
    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    /// Drains the recorded calls.
    pub fn take_calls(&mut self) -> Vec<DeviceCall> {
        std::mem::take(&mut self.calls)
    }

    /// The buffer side of the device.
    #[must_use]
    pub const fn buffers(&self) -> &HeadlessBufferBackend {
        &self.buffers
    }
}

impl BufferBackend for HeadlessDevice {
    fn create_buffer(
        &mut self,
        usage: BufferUsage,
        target: BindTarget,
        size: usize,
    ) -> GpuResult<GpuBufferId> {
        self.buffers.create_buffer(usage, target, size)
    }

    fn upload(&mut self, id: GpuBufferId, offset: usize, data: &[u8]) -> GpuResult<()> {
        self.buffers.upload(id, offset, data)
    }

    fn bind(&mut self, id: GpuBufferId, target: BindTarget) -> GpuResult<()> {
        self.buffers.bind(id, target)
    }

    fn delete(&mut self, id: GpuBufferId) {
        self.buffers.delete(id);
    }
}

impl DrawBackend for HeadlessDevice {
    fn use_program(&mut self, program: ProgramId) {
        self.calls.push(DeviceCall::UseProgram(program));
    }

    fn bind_textures(&mut self, textures: &[TextureId]) {
        self.calls.push(DeviceCall::BindTextures(textures.to_vec()));
    }

    fn apply_state(&mut self, state: &RenderState) {
        self.calls.push(DeviceCall::ApplyState(*state));
    }

    fn set_attribute(
        &mut self,
        slot: usize,
        buffer: Option<GpuBufferId>,
        pointer: VertexPointer,
        format: &AttributeFormat,
    ) {
        let offset = match pointer {
            VertexPointer::Offset(offset) => Some(offset),
            VertexPointer::Client(_) => None,
        };
        self.calls.push(DeviceCall::SetAttribute {
            slot,
            buffer,
            offset,
            format: *format,
        });
    }

    fn upload_uniforms(&mut self, data: &[u8]) {
        self.calls.push(DeviceCall::UploadUniforms(data.to_vec()));
    }

    fn draw_arrays(&mut self, primitive: PrimitiveType, vertices: Range<usize>) {
        self.calls.push(DeviceCall::DrawArrays(primitive, vertices));
    }

    fn draw_elements(&mut self, primitive: PrimitiveType, index_type: IndexType, indices: Range<usize>) {
        self.calls.push(DeviceCall::DrawElements(primitive, index_type, indices));
    }

    fn multi_draw_elements(&mut self, primitive: PrimitiveType, index_type: IndexType, ranges: &[Range<usize>]) {
        self.calls
            .push(DeviceCall::MultiDrawElements(primitive, index_type, ranges.to_vec()));
    }

    fn supports_multi_draw(&self) -> bool {
        self.multi_draw
    }
}

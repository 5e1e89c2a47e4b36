//! Draw call descriptors and their batch sort order.

use std::cmp::Ordering;
use std::sync::Arc;

use triad_core::{
    AttributeStore, BindTarget, BufferBackend, GpuBufferId, GpuResult, ImplicitStream, VertexPointer,
};

use super::command::DrawCommand;
use super::order::DrawOrder;
use crate::device::{AttributeFormat, ProgramId, RenderState, TextureId};

/// Textures bound to consecutive units. Shared between descriptors by `Arc`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureSet(pub Vec<TextureId>);

/// Raw uniform block contents. Shared between descriptors by `Arc`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct UniformBlock(pub Vec<u8>);

impl UniformBlock {
    /// Block holding the bytes of `value`.
    #[must_use]
    pub fn from_pod<T: bytemuck::Pod>(value: &T) -> Self {
        Self(bytemuck::bytes_of(value).to_vec())
    }
}

/// Buffer feeding one attribute slot.
#[derive(Clone, Debug)]
pub enum AttributeSource {
    /// Records of an attribute store.
    Store(Arc<AttributeStore>),
    /// A per-consumer implicit stream.
    Implicit(Arc<ImplicitStream>),
}

impl AttributeSource {
    /// Address of the shared buffer owner; equal for clones of one source.
    #[must_use]
    pub fn identity(&self) -> usize {
        match self {
            Self::Store(store) => Arc::as_ptr(store) as usize,
            Self::Implicit(stream) => Arc::as_ptr(stream) as usize,
        }
    }

    /// Uploads pending changes and returns the handle and pointer for an
    /// attribute at `byte_offset`.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn bind(
        &self,
        backend: &mut dyn BufferBackend,
        byte_offset: usize,
    ) -> GpuResult<(Option<GpuBufferId>, VertexPointer)> {
        match self {
            Self::Store(store) => {
                store.flush(backend)?;
                let core = store.lock();
                let buffer = core.buffer();
                Ok((buffer.gpu_handle(), buffer.offset_pointer(byte_offset)))
            }
            Self::Implicit(stream) => {
                let mut buffer = stream.lock();
                buffer.flush(backend, BindTarget::Vertex)?;
                Ok((buffer.gpu_handle(), buffer.offset_pointer(byte_offset)))
            }
        }
    }
}

impl From<Arc<AttributeStore>> for AttributeSource {
    fn from(store: Arc<AttributeStore>) -> Self {
        Self::Store(store)
    }
}

impl From<Arc<ImplicitStream>> for AttributeSource {
    fn from(stream: Arc<ImplicitStream>) -> Self {
        Self::Implicit(stream)
    }
}

/// One attribute slot of a descriptor.
#[derive(Clone, Debug)]
pub struct AttributeBinding {
    /// Attribute slot index.
    pub slot: usize,
    /// Data source; required whenever `format` is set.
    pub source: Option<AttributeSource>,
    /// Layout; `None` leaves the slot unused.
    pub format: Option<AttributeFormat>,
}

/// Everything needed to issue one draw.
///
/// Shared pieces (textures, state, uniforms, command, order) are held by
/// `Arc` and compared by identity when sorting, so descriptors built from
/// the same handles end up adjacent.
#[derive(Clone, Default)]
pub struct DrawCallDescriptor {
    /// Shader program.
    pub program: Option<ProgramId>,
    /// Texture bindings.
    pub textures: Arc<TextureSet>,
    /// Fixed-function state.
    pub state: Arc<RenderState>,
    /// Attribute slots, in any order.
    pub attributes: Vec<AttributeBinding>,
    /// Uniform block uploaded after the program is bound.
    pub uniforms: Option<Arc<UniformBlock>>,
    /// Geometry to submit.
    pub command: Option<Arc<dyn DrawCommand>>,
    /// Optional dynamic sort key, ordered before everything else.
    pub order: Option<Arc<DrawOrder>>,
}

impl DrawCallDescriptor {
    /// Descriptor drawing `command` with `program`.
    #[must_use]
    pub fn new(program: ProgramId, command: Arc<dyn DrawCommand>) -> Self {
        Self {
            program: Some(program),
            command: Some(command),
            ..Self::default()
        }
    }

    /// Sets the texture bindings.
    #[must_use]
    pub fn with_textures(mut self, textures: Arc<TextureSet>) -> Self {
        self.textures = textures;
        self
    }

    /// Sets the fixed-function state.
    #[must_use]
    pub fn with_state(mut self, state: Arc<RenderState>) -> Self {
        self.state = state;
        self
    }

    /// Adds an attribute slot.
    #[must_use]
    pub fn with_attribute(
        mut self,
        slot: usize,
        source: impl Into<AttributeSource>,
        format: AttributeFormat,
    ) -> Self {
        self.attributes.push(AttributeBinding {
            slot,
            source: Some(source.into()),
            format: Some(format),
        });
        self
    }

    /// Sets the uniform block.
    #[must_use]
    pub fn with_uniforms(mut self, uniforms: Arc<UniformBlock>) -> Self {
        self.uniforms = Some(uniforms);
        self
    }

    /// Sets the dynamic order handle.
    #[must_use]
    pub fn with_order(mut self, order: Arc<DrawOrder>) -> Self {
        self.order = Some(order);
        self
    }

    /// A program and a command are set, every slot is below `max_slots`,
    /// and every formatted slot has a source.
    #[must_use]
    pub fn is_valid(&self, max_slots: usize) -> bool {
        self.program.is_some()
            && self.command.is_some()
            && self.attributes.iter().all(|binding| {
                binding.slot < max_slots && (binding.format.is_none() || binding.source.is_some())
            })
    }

    /// Batch sort order.
    ///
    /// Keys, most significant first: order handle (through `order`,
    /// handle-less descriptors last), program, textures, state, attribute
    /// sources, attribute formats, uniforms, command buffer, command.
    pub fn batch_cmp(&self, other: &Self, order: &dyn Fn(&DrawOrder, &DrawOrder) -> Ordering) -> Ordering {
        let by_order = match (&self.order, &other.order) {
            (Some(a), Some(b)) => order(a, b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_order
            .then_with(|| self.program.cmp(&other.program))
            .then_with(|| address(&self.textures).cmp(&address(&other.textures)))
            .then_with(|| address(&self.state).cmp(&address(&other.state)))
            .then_with(|| self.source_keys().cmp(other.source_keys()))
            .then_with(|| self.format_keys().cmp(other.format_keys()))
            .then_with(|| {
                let a = self.uniforms.as_ref().map(address);
                a.cmp(&other.uniforms.as_ref().map(address))
            })
            .then_with(|| self.command_key().cmp(&other.command_key()))
    }

    fn source_keys(&self) -> impl Iterator<Item = (usize, Option<usize>)> + '_ {
        self.attributes
            .iter()
            .map(|b| (b.slot, b.source.as_ref().map(AttributeSource::identity)))
    }

    fn format_keys(&self) -> impl Iterator<Item = (usize, Option<AttributeFormat>)> + '_ {
        self.attributes.iter().map(|b| (b.slot, b.format))
    }

    fn command_key(&self) -> Option<(usize, usize)> {
        self.command
            .as_ref()
            .map(|c| (c.buffer_identity(), Arc::as_ptr(c).cast::<()>() as usize))
    }
}

impl std::fmt::Debug for DrawCallDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawCallDescriptor")
            .field("program", &self.program)
            .field("textures", &self.textures)
            .field("state", &self.state)
            .field("attributes", &self.attributes.len())
            .field("has_command", &self.command.is_some())
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

fn address<T>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PrimitiveType;
    use crate::draw::command::ArrayDraw;
    use crate::draw::order::ascending_order;

    fn command() -> Arc<dyn DrawCommand> {
        Arc::new(ArrayDraw::new(PrimitiveType::Triangles, 0..3))
    }

    #[test]
    fn test_validity() {
        let valid = DrawCallDescriptor::new(ProgramId(1), command());
        assert!(valid.is_valid(8));
        assert!(!DrawCallDescriptor::default().is_valid(8));

        let mut missing_source = valid.clone();
        missing_source.attributes.push(AttributeBinding {
            slot: 0,
            source: None,
            format: Some(AttributeFormat::float(3, 12, 0)),
        });
        assert!(!missing_source.is_valid(8));

        let mut unused_slot = valid;
        unused_slot.attributes.push(AttributeBinding {
            slot: 9,
            source: None,
            format: None,
        });
        assert!(!unused_slot.is_valid(8));
    }

    #[test]
    fn test_order_handle_dominates_program() {
        let compare = ascending_order();
        let early = DrawCallDescriptor::new(ProgramId(9), command())
            .with_order(Arc::new(DrawOrder::new(0)));
        let late = DrawCallDescriptor::new(ProgramId(1), command())
            .with_order(Arc::new(DrawOrder::new(1)));
        let unordered = DrawCallDescriptor::new(ProgramId(0), command());

        assert_eq!(early.batch_cmp(&late, &*compare), Ordering::Less);
        assert_eq!(late.batch_cmp(&unordered, &*compare), Ordering::Less);
        assert_eq!(unordered.batch_cmp(&early, &*compare), Ordering::Greater);
    }

    #[test]
    fn test_handles_compare_by_identity() {
        let compare = ascending_order();
        let textures = Arc::new(TextureSet(vec![TextureId(4)]));
        let a = DrawCallDescriptor::new(ProgramId(2), command()).with_textures(Arc::clone(&textures));
        assert_eq!(a.batch_cmp(&a.clone(), &*compare), Ordering::Equal);

        // Equal state values behind different handles still sort apart.
        let b = a.clone().with_state(Arc::new(RenderState::default()));
        assert_ne!(a.batch_cmp(&b, &*compare), Ordering::Equal);
    }
}

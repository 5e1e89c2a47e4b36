//! Current-state tracking for one draw pass.

use std::ops::Range;
use std::sync::Arc;

use triad_core::{GpuResult, IndexType, MAX_ATTRIBUTE_SLOTS};

use super::descriptor::{DrawCallDescriptor, TextureSet, UniformBlock};
use crate::device::{AttributeFormat, GraphicsDevice, PrimitiveType, ProgramId, RenderState};
use crate::pipeline::DrawStats;

/// What ranges must share to go out in one call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CommandKey {
    buffer: usize,
    primitive: PrimitiveType,
    index_type: Option<IndexType>,
}

/// Issues only the state changes a descriptor actually needs and merges
/// consecutive compatible ranges.
///
/// Lives for one pass over a sorted list; nothing is assumed about device
/// state before the pass.
pub struct StateTracker {
    multi_draw: bool,
    program: Option<ProgramId>,
    textures: Option<Arc<TextureSet>>,
    state: Option<RenderState>,
    attributes: [Option<(usize, AttributeFormat)>; MAX_ATTRIBUTE_SLOTS],
    uniforms: Option<Arc<UniformBlock>>,
    command: Option<CommandKey>,
    pending: Vec<Range<usize>>,
}

impl StateTracker {
    /// Tracker for a device; `multi_draw` enables merged submission.
    #[must_use]
    pub fn new(multi_draw: bool) -> Self {
        Self {
            multi_draw,
            program: None,
            textures: None,
            state: None,
            attributes: [None; MAX_ATTRIBUTE_SLOTS],
            uniforms: None,
            command: None,
            pending: Vec::new(),
        }
    }

    /// Applies `descriptor` drawn with `program` and queues its ranges.
    ///
    /// The caller has already checked validity and emptiness.
    ///
    /// # Errors
    ///
    /// Propagates backend failures from uploads.
    pub fn submit<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        stats: &mut DrawStats,
        descriptor: &DrawCallDescriptor,
        program: ProgramId,
    ) -> GpuResult<()> {
        let Some(command) = descriptor.command.as_ref() else {
            return Ok(());
        };
        let key = CommandKey {
            buffer: command.buffer_identity(),
            primitive: command.primitive(),
            index_type: command.index_type(),
        };

        if self.needs_change(descriptor, program, key) {
            self.flush(device, stats);
        }

        if self.program != Some(program) {
            device.use_program(program);
            self.program = Some(program);
            self.uniforms = None;
            stats.program_switches += 1;
        }

        let textures_changed = self
            .textures
            .as_ref()
            .map_or(true, |t| !Arc::ptr_eq(t, &descriptor.textures) && **t != *descriptor.textures);
        if textures_changed {
            device.bind_textures(&descriptor.textures.0);
            stats.texture_switches += 1;
        }
        self.textures = Some(Arc::clone(&descriptor.textures));

        if self.state != Some(*descriptor.state) {
            device.apply_state(&descriptor.state);
            self.state = Some(*descriptor.state);
            stats.state_switches += 1;
        }

        for binding in &descriptor.attributes {
            let (Some(source), Some(format)) = (&binding.source, binding.format) else {
                continue;
            };
            let Some(current) = self.attributes.get_mut(binding.slot) else {
                continue;
            };
            let wanted = Some((source.identity(), format));
            if *current == wanted {
                continue;
            }
            let (buffer, pointer) = source.bind(device, format.offset as usize)?;
            device.set_attribute(binding.slot, buffer, pointer, &format);
            *current = wanted;
            stats.attribute_switches += 1;
        }

        if let Some(uniforms) = &descriptor.uniforms {
            let changed = self
                .uniforms
                .as_ref()
                .map_or(true, |u| !Arc::ptr_eq(u, uniforms) && **u != **uniforms);
            if changed {
                device.upload_uniforms(&uniforms.0);
                stats.uniform_uploads += 1;
            }
            self.uniforms = Some(Arc::clone(uniforms));
        }

        if self.command != Some(key) {
            command.prepare(device)?;
            self.command = Some(key);
        }

        for range in command.ranges() {
            if range.is_empty() {
                continue;
            }
            match self.pending.last_mut() {
                Some(last) if last.end == range.start => last.end = range.end,
                _ => self.pending.push(range),
            }
        }
        Ok(())
    }

    /// Submits whatever is still queued. Call once at the end of a pass.
    pub fn finish<D: GraphicsDevice>(&mut self, device: &mut D, stats: &mut DrawStats) {
        self.flush(device, stats);
    }

    fn needs_change(&self, descriptor: &DrawCallDescriptor, program: ProgramId, key: CommandKey) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        self.program != Some(program)
            || self.command != Some(key)
            || self.textures.as_ref().map_or(true, |t| **t != *descriptor.textures)
            || self.state != Some(*descriptor.state)
            || descriptor.uniforms.as_ref().is_some_and(|u| {
                self.uniforms.as_ref().map_or(true, |current| **current != **u)
            })
            || descriptor.attributes.iter().any(|b| match (&b.source, b.format) {
                (Some(source), Some(format)) => {
                    self.attributes.get(b.slot).copied().flatten() != Some((source.identity(), format))
                }
                _ => false,
            })
    }

    fn flush<D: GraphicsDevice>(&mut self, device: &mut D, stats: &mut DrawStats) {
        let Some(key) = self.command else {
            self.pending.clear();
            return;
        };
        if self.pending.is_empty() {
            return;
        }
        stats.ranges_submitted += self.pending.len() as u32;
        match key.index_type {
            Some(index_type) if self.multi_draw && self.pending.len() > 1 => {
                device.multi_draw_elements(key.primitive, index_type, &self.pending);
                stats.draw_calls += 1;
                stats.multi_draw_batches += 1;
            }
            Some(index_type) => {
                for range in self.pending.drain(..) {
                    device.draw_elements(key.primitive, index_type, range);
                    stats.draw_calls += 1;
                }
            }
            None => {
                for range in self.pending.drain(..) {
                    device.draw_arrays(key.primitive, range);
                    stats.draw_calls += 1;
                }
            }
        }
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BlendMode;
    use crate::draw::command::ArrayDraw;
    use crate::headless::{DeviceCall, HeadlessDevice};

    fn descriptor(program: u32, vertices: Range<usize>) -> DrawCallDescriptor {
        DrawCallDescriptor::new(
            ProgramId(program),
            Arc::new(ArrayDraw::new(PrimitiveType::Triangles, vertices)),
        )
    }

    #[test]
    fn test_redundant_state_not_reissued() {
        let mut device = HeadlessDevice::new();
        let mut stats = DrawStats::default();
        let mut tracker = StateTracker::new(true);
        let state = Arc::new(RenderState {
            blend: BlendMode::Alpha,
            ..RenderState::default()
        });

        let a = descriptor(1, 0..3).with_state(Arc::clone(&state));
        let b = descriptor(1, 3..6).with_state(state);
        tracker.submit(&mut device, &mut stats, &a, ProgramId(1)).unwrap();
        tracker.submit(&mut device, &mut stats, &b, ProgramId(1)).unwrap();
        tracker.finish(&mut device, &mut stats);

        assert_eq!(stats.program_switches, 1);
        assert_eq!(stats.state_switches, 1);
        // Adjacent array ranges merge into one draw.
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(
            device.calls().last(),
            Some(&DeviceCall::DrawArrays(PrimitiveType::Triangles, 0..6))
        );
    }

    #[test]
    fn test_program_change_flushes_pending_first() {
        let mut device = HeadlessDevice::new();
        let mut stats = DrawStats::default();
        let mut tracker = StateTracker::new(true);

        tracker.submit(&mut device, &mut stats, &descriptor(1, 0..3), ProgramId(1)).unwrap();
        tracker.submit(&mut device, &mut stats, &descriptor(2, 3..6), ProgramId(2)).unwrap();
        tracker.finish(&mut device, &mut stats);

        let calls = device.take_calls();
        let draw = calls
            .iter()
            .position(|c| *c == DeviceCall::DrawArrays(PrimitiveType::Triangles, 0..3))
            .unwrap();
        let switch = calls
            .iter()
            .position(|c| *c == DeviceCall::UseProgram(ProgramId(2)))
            .unwrap();
        assert!(draw < switch);
        assert_eq!(stats.draw_calls, 2);
        assert_eq!(stats.program_switches, 2);
    }
}

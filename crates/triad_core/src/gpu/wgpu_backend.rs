//! [`BufferBackend`] on top of `wgpu`.
//!
//! wgpu has no global binding points, so `bind` only records which resource
//! is current for each target. Render code fetches the `wgpu::Buffer` with
//! [`WgpuBufferBackend::buffer`] when it records a pass.

use std::collections::HashMap;
use std::sync::Arc;

use super::{BindTarget, BufferBackend, BufferUsage, GpuBufferId};
use crate::error::{GpuError, GpuResult};

/// GPU buffers owned by a `wgpu` device.
pub struct WgpuBufferBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    next_id: u64,
    buffers: HashMap<GpuBufferId, wgpu::Buffer>,
    bound: HashMap<BindTarget, GpuBufferId>,
}

impl WgpuBufferBackend {
    /// Wraps an existing device and queue.
    #[must_use]
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            next_id: 0,
            buffers: HashMap::new(),
            bound: HashMap::new(),
        }
    }

    /// Returns the wgpu resource behind a handle.
    #[must_use]
    pub fn buffer(&self, id: GpuBufferId) -> Option<&wgpu::Buffer> {
        self.buffers.get(&id)
    }

    /// Returns the resource last bound at `target`.
    #[must_use]
    pub fn bound(&self, target: BindTarget) -> Option<&wgpu::Buffer> {
        self.bound.get(&target).and_then(|id| self.buffers.get(id))
    }
}

fn usages_for(target: BindTarget) -> wgpu::BufferUsages {
    let base = wgpu::BufferUsages::COPY_DST;
    match target {
        BindTarget::Vertex => base | wgpu::BufferUsages::VERTEX,
        BindTarget::Index => base | wgpu::BufferUsages::INDEX,
        BindTarget::Uniform => base | wgpu::BufferUsages::UNIFORM,
    }
}

impl BufferBackend for WgpuBufferBackend {
    fn create_buffer(
        &mut self,
        _usage: BufferUsage,
        target: BindTarget,
        size: usize,
    ) -> GpuResult<GpuBufferId> {
        let align = wgpu::COPY_BUFFER_ALIGNMENT;
        let aligned = ((size as u64).max(align) + align - 1) / align * align;
        let max = self.device.limits().max_buffer_size;
        if aligned > max {
            return Err(GpuError::ResourceCreationFailed {
                size,
                reason: format!("device max_buffer_size is {max}"),
            });
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("triad scoped buffer"),
            size: aligned,
            usage: usages_for(target),
            mapped_at_creation: false,
        });
        self.next_id += 1;
        let id = GpuBufferId(self.next_id);
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    fn upload(&mut self, id: GpuBufferId, offset: usize, data: &[u8]) -> GpuResult<()> {
        let buffer = self.buffers.get(&id).ok_or(GpuError::UnknownBuffer(id))?;
        let size = buffer.size() as usize;
        if offset + data.len() > size {
            return Err(GpuError::UploadOutOfBounds {
                offset,
                len: data.len(),
                size,
            });
        }
        debug_assert_eq!(offset as u64 % wgpu::COPY_BUFFER_ALIGNMENT, 0);
        debug_assert_eq!(data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT, 0);
        self.queue.write_buffer(buffer, offset as u64, data);
        Ok(())
    }

    fn bind(&mut self, id: GpuBufferId, target: BindTarget) -> GpuResult<()> {
        if !self.buffers.contains_key(&id) {
            return Err(GpuError::UnknownBuffer(id));
        }
        self.bound.insert(target, id);
        Ok(())
    }

    fn delete(&mut self, id: GpuBufferId) {
        if let Some(buffer) = self.buffers.remove(&id) {
            buffer.destroy();
            self.bound.retain(|_, bound| *bound != id);
        }
    }
}

//! Deferred release of GPU handles.
//!
//! A [`ScopedBuffer`](crate::memory::ScopedBuffer) may be dropped on any
//! thread, but its GPU resource must be deleted on the thread that owns the
//! backend. Dropping hands the handle to this queue; the presentation thread
//! drains it.

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::{BufferBackend, GpuBufferId};

/// Multi-producer queue of GPU handles waiting for deletion.
///
/// Cloning is cheap and every clone feeds the same queue.
#[derive(Clone)]
pub struct GpuReleaseQueue {
    tx: Sender<GpuBufferId>,
    rx: Receiver<GpuBufferId>,
}

impl GpuReleaseQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Schedules `id` for deletion. Callable from any thread.
    pub fn defer(&self, id: GpuBufferId) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(id);
    }

    /// Number of handles waiting.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Deletes every handle queued so far. Returns how many were released.
    ///
    /// Must run on the thread that owns `backend`.
    pub fn release_pending(&self, backend: &mut dyn BufferBackend) -> usize {
        let mut released = 0;
        for id in self.rx.try_iter() {
            backend.delete(id);
            released += 1;
        }
        if released > 0 {
            tracing::debug!(released, "released deferred GPU buffers");
        }
        released
    }
}

impl Default for GpuReleaseQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{BindTarget, BufferUsage, HeadlessBufferBackend};

    #[test]
    fn test_release_from_other_thread() {
        let mut backend = HeadlessBufferBackend::new();
        let id = backend
            .create_buffer(BufferUsage::Dynamic, BindTarget::Vertex, 16)
            .unwrap();

        let queue = GpuReleaseQueue::new();
        let producer = queue.clone();
        std::thread::spawn(move || producer.defer(id)).join().unwrap();

        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.release_pending(&mut backend), 1);
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(queue.pending(), 0);
    }
}

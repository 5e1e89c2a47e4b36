//! Implicit per-consumer attribute streams.
//!
//! An implicit stream is a side buffer indexed by the same record indices as
//! its parent [`AttributeStore`](super::AttributeStore), holding values one
//! consumer (a canvas, a pass) computes for every record. Slot 0 always holds
//! the consumer's "invisible" value, so records that were discarded render
//! as nothing.
//!
//! Each stream has its own mutex, separate from the parent store's
//! allocator mutex, so consumers never contend with each other or with
//! explicit attribute writers.

use bytemuck::Pod;
use parking_lot::{Mutex, MutexGuard};

use crate::gpu::{BufferUsage, GpuReleaseQueue};
use crate::memory::ScopedBuffer;

/// Identifies the consumer an implicit stream belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u64);

/// A side buffer kept large enough to cover every record of its store.
pub struct ImplicitStream {
    consumer: ConsumerId,
    record_size: usize,
    buffer: Mutex<ScopedBuffer>,
}

impl ImplicitStream {
    pub(crate) fn new(
        consumer: ConsumerId,
        invisible: &[u8],
        records: usize,
        usage: BufferUsage,
        release: Option<GpuReleaseQueue>,
    ) -> Self {
        debug_assert!(!invisible.is_empty(), "implicit records need at least one byte");
        let mut buffer = ScopedBuffer::new(usage);
        if let Some(queue) = release {
            buffer = buffer.with_release_queue(queue);
        }
        buffer.resize(records.max(1) * invisible.len());
        buffer.bytes_mut(0..invisible.len()).copy_from_slice(invisible);
        Self {
            consumer,
            record_size: invisible.len(),
            buffer: Mutex::new(buffer),
        }
    }

    /// Owning consumer.
    #[inline]
    #[must_use]
    pub const fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// Bytes per record.
    #[inline]
    #[must_use]
    pub const fn record_size(&self) -> usize {
        self.record_size
    }

    /// Records the buffer currently covers.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.buffer.lock().size() / self.record_size
    }

    /// Grows the buffer to cover at least `records` records.
    pub(crate) fn ensure_records(&self, records: usize) {
        let mut buffer = self.buffer.lock();
        let needed = records * self.record_size;
        if buffer.size() < needed {
            buffer.resize(needed);
        }
    }

    /// Writes `values` starting at record `index`.
    pub fn write<T: Pod>(&self, index: usize, values: &[T]) {
        debug_assert!(index != 0, "slot 0 holds the invisible record");
        self.buffer.lock().write_pod(index * self.record_size, values);
    }

    /// Reads `count` values starting at record `index`.
    #[must_use]
    pub fn read<T: Pod>(&self, index: usize, count: usize) -> Vec<T> {
        self.buffer.lock().read_pod(index * self.record_size, count)
    }

    /// Takes this stream's mutex, e.g. to flush it on the presentation thread.
    pub fn lock(&self) -> MutexGuard<'_, ScopedBuffer> {
        self.buffer.lock()
    }
}

impl std::fmt::Debug for ImplicitStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImplicitStream")
            .field("consumer", &self.consumer)
            .field("record_size", &self.record_size)
            .finish_non_exhaustive()
    }
}

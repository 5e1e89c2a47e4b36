//! Attribute stores: record-indexed views over a [`BufferAllocator`].

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Weak};

use bytemuck::Pod;
use parking_lot::{Mutex, MutexGuard, RwLock};

use super::implicit::{ConsumerId, ImplicitStream};
use super::key::AttributeKey;
use super::registry::RegistryShared;
use crate::config::BufferConfig;
use crate::error::{AllocError, AllocResult, GpuResult};
use crate::gpu::{BindTarget, BufferBackend, BufferUsage, GpuReleaseQueue};
use crate::memory::{AllocatorCore, BufferAllocator, ScopedBuffer};

/// One attribute buffer holding fixed-size records.
///
/// Record 0 is reserved at construction and holds the default record that
/// discarded indices point at. Allocation never hands out an index beyond
/// what the key's index width can address.
pub struct AttributeStore {
    key: AttributeKey,
    allocator: BufferAllocator,
    usage: BufferUsage,
    /// True when the index width, not the byte cap, bounds the buffer.
    index_bound: bool,
    release: GpuReleaseQueue,
    implicit: RwLock<HashMap<ConsumerId, Arc<ImplicitStream>>>,
    registry: Mutex<Weak<RegistryShared>>,
}

impl AttributeStore {
    /// Creates a store for `key` with record 0 reserved and zeroed.
    #[must_use]
    pub fn new(key: AttributeKey, config: &BufferConfig, release: GpuReleaseQueue) -> Self {
        debug_assert!(key.record_size > 0, "records need at least one byte");
        let record_size = key.record_size;
        let index_cap = key.max_records().saturating_mul(record_size);
        let (max_bytes, index_bound) = match config.max_attribute_buffer_bytes {
            Some(cap) => {
                let whole = (cap / record_size * record_size).max(record_size);
                (whole.min(index_cap), whole >= index_cap)
            }
            None => (index_cap, true),
        };

        let buffer = ScopedBuffer::new(config.attribute_usage).with_release_queue(release.clone());
        let allocator = BufferAllocator::from_buffer(buffer, Some(max_bytes));
        // An empty buffer under a cap of at least one record always has room.
        let reserved = allocator.allocate(record_size);
        debug_assert_eq!(reserved, Ok(0));

        Self {
            key,
            allocator,
            usage: config.attribute_usage,
            index_bound,
            release,
            implicit: RwLock::new(HashMap::new()),
            registry: Mutex::new(Weak::new()),
        }
    }

    /// The store's key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> AttributeKey {
        self.key
    }

    /// Bytes per record.
    #[inline]
    #[must_use]
    pub const fn record_size(&self) -> usize {
        self.key.record_size
    }

    /// Records the buffer currently spans, record 0 included.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.allocator.buffer_size() / self.key.record_size
    }

    fn capacity_error(&self, error: AllocError, records: usize, current: usize) -> AllocError {
        match error {
            AllocError::CapacityExceeded { .. } if self.index_bound => AllocError::IndexRangeExceeded {
                requested_last: current + records - 1,
                max_index: self.key.index_type.max_index(),
            },
            other => other,
        }
    }

    fn grow_implicit(&self, records: usize) {
        for stream in self.implicit.read().values() {
            stream.ensure_records(records);
        }
    }

    /// Allocates `records` contiguous records and returns the first index.
    ///
    /// Implicit streams are grown afterwards to cover the new highest index.
    ///
    /// # Errors
    ///
    /// [`AllocError::ZeroSized`] for `records == 0`,
    /// [`AllocError::IndexRangeExceeded`] if the index width is exhausted,
    /// [`AllocError::CapacityExceeded`] if the configured byte cap is.
    pub fn allocate_attribute_data(&self, records: usize) -> AllocResult<usize> {
        if records == 0 {
            return Err(AllocError::ZeroSized);
        }
        let record_size = self.key.record_size;
        let (offset, high) = {
            let mut core = self.allocator.lock();
            let current = core.buffer_size() / record_size;
            let offset = core
                .allocate(records * record_size)
                .map_err(|e| self.capacity_error(e, records, current))?;
            (offset, core.buffer_size() / record_size)
        };
        self.grow_implicit(high);
        Ok(offset / record_size)
    }

    /// Allocates `records` records as one or more index ranges appended to `out`.
    ///
    /// # Errors
    ///
    /// As [`allocate_attribute_data`](Self::allocate_attribute_data). Nothing is
    /// allocated on failure.
    pub fn allocate_attribute_data_fragmented(
        &self,
        records: usize,
        out: &mut Vec<Range<usize>>,
    ) -> AllocResult<()> {
        let record_size = self.key.record_size;
        let mut bytes = Vec::new();
        let high = {
            let mut core = self.allocator.lock();
            let current = core.buffer_size() / record_size;
            core.fragmented_allocate(records * record_size, &mut bytes)
                .map_err(|e| self.capacity_error(e, records, current))?;
            core.buffer_size() / record_size
        };
        out.extend(bytes.into_iter().map(|r| r.start / record_size..r.end / record_size));
        self.grow_implicit(high);
        Ok(())
    }

    /// Returns `count` records starting at `first` to the store.
    pub fn deallocate_attribute_data(&self, first: usize, count: usize) {
        debug_assert!(first != 0 || count == 0, "record 0 is reserved");
        let record_size = self.key.record_size;
        self.allocator
            .deallocate(first * record_size, (first + count) * record_size);
    }

    /// Whether `records` contiguous records could be allocated now.
    #[must_use]
    pub fn proxy_allocate(&self, records: usize) -> bool {
        self.allocator.proxy_allocate(records * self.key.record_size)
    }

    /// Whether `records` records could be allocated in fragments now.
    #[must_use]
    pub fn proxy_fragmented_allocate(&self, records: usize) -> bool {
        self.allocator
            .proxy_fragmented_allocate(records * self.key.record_size)
    }

    /// Writes `values` starting at record `first`.
    pub fn write_records<T: Pod>(&self, first: usize, values: &[T]) {
        self.allocator.write_pod(first * self.key.record_size, values);
    }

    /// Reads `count` values of `T` starting at record `first`.
    #[must_use]
    pub fn read_records<T: Pod>(&self, first: usize, count: usize) -> Vec<T> {
        self.allocator.read_pod(first * self.key.record_size, count)
    }

    /// Takes the record buffer's allocator mutex.
    pub fn lock(&self) -> MutexGuard<'_, AllocatorCore> {
        self.allocator.lock()
    }

    /// Returns the implicit stream for `consumer`, creating it on first use.
    ///
    /// `invisible` is the consumer's record for slot 0; its length fixes the
    /// stream's record size.
    pub fn implicit_stream(&self, consumer: ConsumerId, invisible: &[u8]) -> Arc<ImplicitStream> {
        if let Some(stream) = self.implicit.read().get(&consumer) {
            return Arc::clone(stream);
        }
        let mut streams = self.implicit.write();
        let stream = streams.entry(consumer).or_insert_with(|| {
            Arc::new(ImplicitStream::new(
                consumer,
                invisible,
                self.record_count(),
                self.usage,
                Some(self.release.clone()),
            ))
        });
        Arc::clone(stream)
    }

    /// Every implicit stream created so far.
    #[must_use]
    pub fn implicit_streams(&self) -> Vec<Arc<ImplicitStream>> {
        self.implicit.read().values().cloned().collect()
    }

    /// Flushes the record buffer as vertex data.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn flush(&self, backend: &mut dyn BufferBackend) -> GpuResult<bool> {
        self.allocator.flush(backend, BindTarget::Vertex)
    }

    pub(crate) fn attach(&self, registry: Weak<RegistryShared>) {
        *self.registry.lock() = registry;
    }

    pub(crate) fn detach(&self) {
        *self.registry.lock() = Weak::new();
    }
}

impl Drop for AttributeStore {
    fn drop(&mut self) {
        // Take the back-reference out before the registry lock is touched.
        let registry = std::mem::take(self.registry.get_mut());
        if let Some(shared) = registry.upgrade() {
            shared.unregister(self.key);
        }
    }
}

impl std::fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeStore")
            .field("key", &self.key)
            .field("allocator", &self.allocator)
            .field("implicit_streams", &self.implicit.read().len())
            .finish_non_exhaustive()
    }
}

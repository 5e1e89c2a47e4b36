//! # Attribute Store Registry
//!
//! Hands out shared [`AttributeStore`]s keyed by [`AttributeKey`], reusing
//! an existing store whenever one can take the request.
//!
//! ## Teardown
//!
//! Stores and the registry point at each other weakly and both sides
//! unregister on drop. Neither side ever holds its own lock while taking the
//! other's:
//!
//! - a dropping store moves its registry back-reference out first, then
//!   locks the registry to prune itself;
//! - a dropping registry swaps its whole map into a local container under
//!   its lock, releases the lock, and only then clears each live store's
//!   back-reference.
//!
//! Locking registry-then-store on one path and store-then-registry on the
//! other would deadlock against a store being dropped concurrently.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::key::AttributeKey;
use super::store::AttributeStore;
use crate::config::{BufferConfig, EngineConfig};
use crate::error::{AllocError, AllocResult};
use crate::gpu::GpuReleaseQueue;

/// A contiguous run of records in a shared store.
#[derive(Debug, Clone)]
pub struct AttributeAllocation {
    /// The store holding the records.
    pub store: Arc<AttributeStore>,
    /// Record indices, `[first, first + count)`.
    pub records: Range<usize>,
}

/// Records spread over one or more runs in a shared store.
#[derive(Debug, Clone)]
pub struct FragmentedAttributeAllocation {
    /// The store holding the records.
    pub store: Arc<AttributeStore>,
    /// Record index runs in allocation order.
    pub records: Vec<Range<usize>>,
}

pub(crate) struct RegistryShared {
    stores: Mutex<HashMap<AttributeKey, Vec<Weak<AttributeStore>>>>,
    config: BufferConfig,
    release: GpuReleaseQueue,
}

impl RegistryShared {
    pub(crate) fn unregister(&self, key: AttributeKey) {
        let mut stores = self.stores.lock();
        if let Some(list) = stores.get_mut(&key) {
            list.retain(|weak| weak.strong_count() > 0);
            if list.is_empty() {
                stores.remove(&key);
            }
        }
    }

    fn candidates(&self, key: AttributeKey) -> Vec<Arc<AttributeStore>> {
        self.stores
            .lock()
            .get(&key)
            .map(|list| list.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }
}

impl Drop for RegistryShared {
    fn drop(&mut self) {
        let stores = std::mem::take(&mut *self.stores.lock());
        for store in stores.into_values().flatten().filter_map(|weak| weak.upgrade()) {
            store.detach();
        }
    }
}

/// Finds or creates attribute stores for a key.
///
/// Lookups scan every live store for the key. Few distinct keys coexist in
/// practice, so the scan stays short.
#[derive(Clone)]
pub struct AttributeStoreAllocator {
    shared: Arc<RegistryShared>,
}

impl AttributeStoreAllocator {
    /// Creates an empty registry configured from `config.buffers`.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                stores: Mutex::new(HashMap::new()),
                config: config.buffers.clone(),
                release: GpuReleaseQueue::new(),
            }),
        }
    }

    /// Queue receiving GPU handles of dropped store buffers. Drain it on the
    /// presentation thread.
    #[must_use]
    pub fn release_queue(&self) -> &GpuReleaseQueue {
        &self.shared.release
    }

    fn create_store(&self, key: AttributeKey) -> Arc<AttributeStore> {
        let store = Arc::new(AttributeStore::new(
            key,
            &self.shared.config,
            self.shared.release.clone(),
        ));
        tracing::debug!(?key, "created attribute store");
        store
    }

    fn register(&self, store: &Arc<AttributeStore>) {
        store.attach(Arc::downgrade(&self.shared));
        self.shared
            .stores
            .lock()
            .entry(store.key())
            .or_default()
            .push(Arc::downgrade(store));
    }

    /// Allocates `records` contiguous records from a store with `key`.
    ///
    /// Existing stores are tried first; a new store is created and
    /// registered only if none can take the request.
    ///
    /// # Errors
    ///
    /// [`AllocError::ZeroSized`] for `records == 0`. Otherwise fails if
    /// even an empty store cannot hold `records` records.
    pub fn attribute_store(&self, key: AttributeKey, records: usize) -> AllocResult<AttributeAllocation> {
        if records == 0 {
            return Err(AllocError::ZeroSized);
        }
        for store in self.shared.candidates(key) {
            if !store.proxy_allocate(records) {
                continue;
            }
            // Another thread may have taken the room since the check.
            if let Ok(first) = store.allocate_attribute_data(records) {
                return Ok(AttributeAllocation {
                    store,
                    records: first..first + records,
                });
            }
        }

        let store = self.create_store(key);
        let first = store.allocate_attribute_data(records)?;
        self.register(&store);
        Ok(AttributeAllocation {
            store,
            records: first..first + records,
        })
    }

    /// Like [`attribute_store`](Self::attribute_store) but the records may
    /// be split over several runs.
    ///
    /// # Errors
    ///
    /// Fails if even an empty store cannot hold `records` records.
    pub fn attribute_store_fragmented(
        &self,
        key: AttributeKey,
        records: usize,
    ) -> AllocResult<FragmentedAttributeAllocation> {
        for store in self.shared.candidates(key) {
            if !store.proxy_fragmented_allocate(records) {
                continue;
            }
            let mut runs = Vec::new();
            if store.allocate_attribute_data_fragmented(records, &mut runs).is_ok() {
                return Ok(FragmentedAttributeAllocation { store, records: runs });
            }
        }

        let store = self.create_store(key);
        let mut runs = Vec::new();
        store.allocate_attribute_data_fragmented(records, &mut runs)?;
        self.register(&store);
        Ok(FragmentedAttributeAllocation { store, records: runs })
    }

    /// The store a contiguous request would be served from, without
    /// allocating. `None` means a new store would be needed.
    #[must_use]
    pub fn proxy_attribute_store(&self, key: AttributeKey, records: usize) -> Option<Arc<AttributeStore>> {
        self.shared
            .candidates(key)
            .into_iter()
            .find(|store| store.proxy_allocate(records))
    }

    /// Live stores registered for `key`.
    #[must_use]
    pub fn store_count(&self, key: AttributeKey) -> usize {
        self.shared
            .stores
            .lock()
            .get(&key)
            .map_or(0, |list| list.iter().filter(|weak| weak.strong_count() > 0).count())
    }
}

impl std::fmt::Debug for AttributeStoreAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeStoreAllocator")
            .field("keys", &self.shared.stores.lock().len())
            .finish_non_exhaustive()
    }
}

//! # TRIAD Core
//!
//! Triple-buffered scene synchronization and GPU buffer sub-allocation for
//! a simulation thread and a presentation thread sharing one scene:
//! - The simulation mutates attributes, indices and draw lists freely
//! - The presentation reads a frozen snapshot without locking the scene
//! - GPU uploads are deferred, batched and limited to what changed
//!
//! ## Architecture Rules
//!
//! 1. **Shadow memory first** - CPU writes never touch the GPU directly
//! 2. **Short critical sections** - Only the slot rotation is globally serialized
//! 3. **Exhaustion is a value** - Running out of room returns an error, never panics
//!
//! ## Example
//!
//! ```rust,ignore
//! use triad_core::{AttributeKey, AttributeStoreAllocator, EngineConfig, IndexType};
//!
//! let config = EngineConfig::default();
//! let stores = AttributeStoreAllocator::new(&config);
//! let alloc = stores.attribute_store(AttributeKey::new(16, IndexType::U16), 4)?;
//! alloc.store.write_records(alloc.records.start, &[[0.0f32; 4]; 4]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::perf)]
#![warn(clippy::pedantic)]

pub mod attributes;
pub mod config;
pub mod error;
pub mod gpu;
pub mod index;
pub mod memory;
pub mod sync;

pub use attributes::{
    AttributeAllocation, AttributeKey, AttributeStore, AttributeStoreAllocator, ConsumerId,
    FragmentedAttributeAllocation, ImplicitStream,
};
pub use config::{BufferConfig, CleanupConfig, DrawConfig, EngineConfig, MAX_ATTRIBUTE_SLOTS};
pub use error::{AllocError, AllocResult, ConfigError, GpuError, GpuResult};
pub use gpu::{BindTarget, BufferBackend, BufferUsage, GpuBufferId, GpuReleaseQueue, HeadlessBufferBackend};
pub use index::{IndexElement, IndexGroup, IndexGroupAllocator, IndexType};
pub use memory::{BufferAllocator, DirtyRanges, ScopedBuffer, VertexPointer};
pub use sync::{
    DeletionPhase, PhasedDelete, SignalConnection, SignalTime, SignalType, SlotIds,
    TripleBufferCoordinator,
};

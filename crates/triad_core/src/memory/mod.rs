//! # Memory Management
//!
//! Shadow-memory buffers and the allocators that carve them up.
//!
//! ## Design Philosophy
//!
//! - CPU writes go to shadow memory and are uploaded lazily, range by range
//! - One growable buffer serves many small allocations
//! - Running out of room is a return value the caller checks

mod allocator;
mod dirty_ranges;
mod pool;
mod scoped_buffer;

pub use allocator::{AllocatorCore, BufferAllocator, FragmentPolicy};
pub use dirty_ranges::DirtyRanges;
pub use pool::{PoolHandle, SlotPool};
pub use scoped_buffer::{ScopedBuffer, VertexPointer, BUFFER_ALIGNMENT};

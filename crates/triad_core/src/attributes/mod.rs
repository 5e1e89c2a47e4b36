//! # Attribute Storage
//!
//! Per-vertex attribute records packed into shared, growable buffers.
//!
//! ```text
//!  AttributeStoreAllocator
//!    key (16 B, u16) ──▶ [ store A ][ store B ]
//!    key (32 B, u32) ──▶ [ store C ]
//!
//!  store A: [ rec 0 | rec 1 | rec 2 | ... ]   BufferAllocator, one mutex
//!           implicit(canvas 1): [ inv | .. ]  own mutex
//!           implicit(canvas 2): [ inv | .. ]  own mutex
//! ```

mod implicit;
mod key;
mod registry;
mod store;

pub use implicit::{ConsumerId, ImplicitStream};
pub use key::AttributeKey;
pub use registry::{AttributeAllocation, AttributeStoreAllocator, FragmentedAttributeAllocation};
pub use store::AttributeStore;

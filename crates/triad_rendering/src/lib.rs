//! # TRIAD Rendering
//!
//! Sorted, batched draw submission on top of `triad_core`:
//! - Draw call descriptors sorted so equal state is adjacent
//! - Triple-buffered draw lists the presentation thread reads without
//!   touching the simulation slot
//! - State changes issued only when a value changes, adjacent ranges merged
//!   into multi-draws
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    DRAW SUBMISSION                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  DrawCallDescriptor → DrawBatchList (sorted per slot)         │
//! │         ↓                         ↓                           │
//! │  AttributeStore / IndexGroupAllocator → StateTracker → device │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::perf)]
#![warn(clippy::pedantic)]

pub mod device;
pub mod draw;
pub mod headless;
pub mod pipeline;

pub use device::{
    AttributeFormat, BlendMode, ComponentType, DrawBackend, GraphicsDevice, PrimitiveType, ProgramId,
    RenderState, TextureId,
};
pub use draw::{
    ArrayDraw, AttributeBinding, AttributeSource, DrawBatchList, DrawCallDescriptor, DrawCommand,
    DrawElementId, DrawOrder, DrawOrderComparator, IndexedDraw, StateTracker, TextureSet, UniformBlock,
};
pub use headless::{DeviceCall, HeadlessDevice};
pub use pipeline::{present_frame, DrawStats};

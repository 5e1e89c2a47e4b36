//! # Draw Batching
//!
//! Problem: issuing draws in scene order switches programs, textures and
//! buffers far more often than needed, and the presentation thread cannot
//! read a list the simulation thread is editing.
//!
//! Solution: a [`DrawBatchList`] keeps one descriptor vector per frame slot.
//! The simulation thread edits its slot; the list sorts it by state cost
//! once per dirty frame and copies it forward. The presentation thread walks
//! the `present` slot through a [`StateTracker`] that skips redundant state
//! changes and merges adjacent ranges into multi-draws.
//!
//! Sort keys, most expensive state first:
//!
//! ```text
//! order handle > program > textures > state > attribute buffers
//!              > attribute formats > uniforms > command buffer > command
//! ```

mod batch_list;
mod command;
mod descriptor;
mod order;
mod state_tracker;

pub use batch_list::{DrawBatchList, DrawElementId};
pub use command::{ArrayDraw, DrawCommand, IndexedDraw};
pub use descriptor::{AttributeBinding, AttributeSource, DrawCallDescriptor, TextureSet, UniformBlock};
pub use order::{ascending_order, DrawOrder, DrawOrderComparator};
pub use state_tracker::StateTracker;

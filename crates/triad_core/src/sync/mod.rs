//! # Frame Synchronization
//!
//! Two threads, three slots, no waiting.
//!
//! ## The Problem
//!
//! ```text
//! Simulation thread:    WRITE scene state, attribute data, draw lists
//! Presentation thread:  READ a consistent snapshot, issue GPU calls
//!
//! Shared mutex around the scene: presentation stalls behind simulation
//! Double buffer:                 simulation stalls until presentation swaps
//! ```
//!
//! ## The Solution: Triple Buffering
//!
//! The simulation always has a slot of its own to write while the
//! presentation reads another, and the third holds the newest finished
//! frame. Each thread advances its role on its own schedule; only the role
//! rotation is serialized.
//!
//! Objects referenced from more than one slot are destroyed through
//! [`PhasedDelete`], which runs a hook on each thread before the final drop.

mod coordinator;
mod phased;
mod signals;
mod slots;

pub use coordinator::{FrameCounters, PendingWork, TripleBufferCoordinator};
pub use phased::{DeletionPhase, PhasedDelete};
pub use signals::{SignalCallback, SignalConnection, SignalTime, SignalType};
pub use slots::{next_simulation_slot, SlotIds, SLOT_COUNT};

//! Slot roles and the derangement that picks the next simulation slot.

use std::sync::atomic::{AtomicU32, Ordering};

/// Number of scene-state slots.
pub const SLOT_COUNT: usize = 3;

/// The slot the simulation moves to, given the slot it just finished
/// (`last`) and the slot being presented.
///
/// For distinct inputs this is the unique remaining slot. When the
/// presentation thread has caught up (`last == present`) the next slot in
/// rotation is used.
#[inline]
#[must_use]
pub const fn next_simulation_slot(last: usize, present: usize) -> usize {
    if last == present {
        (last + 1) % SLOT_COUNT
    } else {
        SLOT_COUNT - last - present
    }
}

/// Which slot each role is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotIds {
    /// Slot read by the presentation thread.
    pub present: usize,
    /// Slot the simulation most recently completed.
    pub last_simulation: usize,
    /// Slot the simulation is writing.
    pub current_simulation: usize,
}

impl SlotIds {
    /// Binding at construction: `present = 0, last = 1, current = 2`.
    pub const INITIAL: Self = Self {
        present: 0,
        last_simulation: 1,
        current_simulation: 2,
    };

    /// Returns true if the simulation slot is neither read by the
    /// presentation thread nor the one it will read next.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.present < SLOT_COUNT
            && self.last_simulation < SLOT_COUNT
            && self.current_simulation < SLOT_COUNT
            && self.current_simulation != self.last_simulation
            && self.current_simulation != self.present
    }

    /// Roles after the simulation completes a frame.
    #[must_use]
    pub const fn after_simulation(self) -> Self {
        let last = self.current_simulation;
        Self {
            present: self.present,
            last_simulation: last,
            current_simulation: next_simulation_slot(last, self.present),
        }
    }

    /// Roles after the presentation thread picks up the latest frame.
    #[must_use]
    pub const fn after_presentation(self) -> Self {
        Self {
            present: self.last_simulation,
            ..self
        }
    }

    const fn pack(self) -> u32 {
        (self.present as u32) | (self.last_simulation as u32) << 8 | (self.current_simulation as u32) << 16
    }

    const fn unpack(bits: u32) -> Self {
        Self {
            present: (bits & 0xFF) as usize,
            last_simulation: ((bits >> 8) & 0xFF) as usize,
            current_simulation: ((bits >> 16) & 0xFF) as usize,
        }
    }
}

impl Default for SlotIds {
    fn default() -> Self {
        Self::INITIAL
    }
}

/// All three role bindings in one atomic word, so a lock-free reader never
/// sees a half-updated rotation.
#[derive(Debug)]
pub(crate) struct AtomicSlotIds(AtomicU32);

impl AtomicSlotIds {
    pub(crate) const fn new(ids: SlotIds) -> Self {
        Self(AtomicU32::new(ids.pack()))
    }

    #[inline]
    pub(crate) fn load(&self) -> SlotIds {
        SlotIds::unpack(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn store(&self, ids: SlotIds) {
        debug_assert!(ids.is_consistent(), "inconsistent slot binding {ids:?}");
        self.0.store(ids.pack(), Ordering::Release);
    }
}

//! # Phased Deletion
//!
//! Objects shared by both threads cannot simply be dropped: the
//! presentation thread may still be reading the slot that references them.
//! A phased deletion runs three hooks, each on its own thread and frame,
//! before the object is finally dropped:
//!
//! ```text
//!  enqueue ──▶ on_placed            (calling thread, immediately)
//!  complete_simulation_frame ──▶ simulation_phase   (simulation thread)
//!  begin_presentation_frame  ──▶ render_phase       (presentation thread)
//!  complete_simulation_frame ──▶ drop               (simulation thread)
//! ```
//!
//! Pending objects live in a [`SlotPool`]; each entry records how far it
//! got. The final drain drops only entries whose render phase already ran
//! and carries the rest over to the next frame.

use crate::memory::{PoolHandle, SlotPool};

use super::coordinator::TripleBufferCoordinator;

/// Hooks run by the coordinator before an object is dropped.
///
/// All hooks default to doing nothing. The object's `Drop` is the final
/// phase.
pub trait PhasedDelete: Send {
    /// Runs immediately on enqueue.
    ///
    /// An object owning other phased-deleted objects enqueues them here, so
    /// children go through every phase no later than their parent.
    fn on_placed(&mut self, coordinator: &TripleBufferCoordinator) {
        let _ = coordinator;
    }

    /// Runs on the simulation thread during the next completed frame.
    fn simulation_phase(&mut self) {}

    /// Runs on the presentation thread after [`simulation_phase`](Self::simulation_phase).
    fn render_phase(&mut self) {}
}

/// How far a pending deletion has progressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeletionPhase {
    /// `on_placed` ran.
    Placed,
    /// `simulation_phase` ran.
    SimulationDone,
    /// `render_phase` ran; the object is dropped at the next drain.
    RenderDone,
}

pub(crate) struct PendingDeletion {
    /// `None` while a hook is running outside the queue lock.
    pub(crate) object: Option<Box<dyn PhasedDelete>>,
    pub(crate) phase: DeletionPhase,
}

/// Pending objects plus the three hand-off queues.
#[derive(Default)]
pub(crate) struct DeletionQueues {
    pub(crate) pending: SlotPool<PendingDeletion>,
    /// Enqueued, waiting for the next simulation frame.
    pub(crate) placed: Vec<PoolHandle>,
    /// Simulation hook scheduled.
    pub(crate) simulated: Vec<PoolHandle>,
    /// Render hook scheduled; dropped once it ran.
    pub(crate) rendered: Vec<PoolHandle>,
}

impl DeletionQueues {
    pub(crate) fn insert(&mut self, object: Box<dyn PhasedDelete>) -> PoolHandle {
        let handle = self.pending.insert(PendingDeletion {
            object: Some(object),
            phase: DeletionPhase::Placed,
        });
        self.placed.push(handle);
        handle
    }

    /// Moves the placed queue into the simulated queue.
    pub(crate) fn advance_placed(&mut self) {
        let placed = std::mem::take(&mut self.placed);
        self.simulated.extend(placed);
    }

    /// Moves the simulated queue into the rendered queue.
    pub(crate) fn advance_simulated(&mut self) {
        let simulated = std::mem::take(&mut self.simulated);
        self.rendered.extend(simulated);
    }

    /// Removes every entry whose render phase ran; keeps the others queued.
    pub(crate) fn take_rendered(&mut self) -> Vec<Box<dyn PhasedDelete>> {
        let queued = std::mem::take(&mut self.rendered);
        let mut destroyed = Vec::with_capacity(queued.len());
        for handle in queued {
            let done = self
                .pending
                .get(handle)
                .is_some_and(|entry| entry.phase == DeletionPhase::RenderDone && entry.object.is_some());
            if done {
                if let Some(object) = self.pending.remove(handle).and_then(|entry| entry.object) {
                    destroyed.push(object);
                }
            } else {
                self.rendered.push(handle);
            }
        }
        destroyed
    }

    /// Takes the object out for a hook call.
    pub(crate) fn checkout(&mut self, handle: PoolHandle) -> Option<Box<dyn PhasedDelete>> {
        self.pending.get_mut(handle).and_then(|entry| entry.object.take())
    }

    /// Puts the object back after a hook call.
    pub(crate) fn checkin(&mut self, handle: PoolHandle, object: Box<dyn PhasedDelete>, phase: DeletionPhase) {
        if let Some(entry) = self.pending.get_mut(handle) {
            entry.object = Some(object);
            entry.phase = phase;
        }
    }

    pub(crate) fn phase(&self, handle: PoolHandle) -> Option<DeletionPhase> {
        self.pending.get(handle).map(|entry| entry.phase)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl PhasedDelete for Noop {}

    #[test]
    fn test_queue_progression() {
        let mut queues = DeletionQueues::default();
        let handle = queues.insert(Box::new(Noop));
        assert_eq!(queues.phase(handle), Some(DeletionPhase::Placed));

        queues.advance_placed();
        queues.advance_simulated();
        assert!(queues.take_rendered().is_empty(), "render phase has not run");
        assert_eq!(queues.rendered, vec![handle]);

        let object = queues.checkout(handle).unwrap();
        queues.checkin(handle, object, DeletionPhase::RenderDone);
        assert_eq!(queues.take_rendered().len(), 1);
        assert!(queues.is_empty());
        assert_eq!(queues.phase(handle), None);
    }
}

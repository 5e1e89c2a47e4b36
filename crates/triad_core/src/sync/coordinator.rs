//! # Triple Buffer Coordinator
//!
//! Rotates three scene-state slots between the simulation and presentation
//! threads.
//!
//! ```text
//!  simulation thread          slots            presentation thread
//!  ─────────────────    ┌───┬───┬───┐        ───────────────────
//!  writes current ────▶ │ 0 │ 1 │ 2 │ ◀──── reads present
//!                       └───┴───┴───┘
//!  complete_simulation_frame:            begin_presentation_frame:
//!    last    := current                    present := last
//!    current := the slot that is neither
//!               last nor present
//! ```
//!
//! Neither thread ever waits for the other. The coordinator mutex only
//! guards the rotation itself and the callbacks registered under it; the
//! role bindings are published in a single atomic word so readers never
//! need the mutex.
//!
//! ## Caller contract
//!
//! `complete_simulation_frame` is only called from the simulation thread and
//! `begin_presentation_frame` only from the presentation thread. This is not
//! checked.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use super::phased::{DeletionPhase, DeletionQueues, PhasedDelete};
use super::signals::{SignalConnection, SignalTable, SignalTime, SignalType};
use super::slots::{AtomicSlotIds, SlotIds};
use crate::config::{CleanupConfig, EngineConfig};
use crate::memory::PoolHandle;

enum Deferred {
    Action(Box<dyn FnOnce() + Send>),
    SimulationPhase(PoolHandle),
    RenderPhase(PoolHandle),
}

struct ActionQueue {
    tx: Sender<Deferred>,
    rx: Receiver<Deferred>,
}

impl ActionQueue {
    fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    fn push(&self, deferred: Deferred) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(deferred);
    }

    fn len(&self) -> usize {
        self.rx.len()
    }
}

/// Frames driven so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCounters {
    /// Completed simulation frames.
    pub simulation: u64,
    /// Begun presentation frames.
    pub presentation: u64,
}

/// Work still queued in the coordinator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingWork {
    /// Objects not yet dropped.
    pub deletions: usize,
    /// Deferred closures and hooks for the simulation thread.
    pub simulation_actions: usize,
    /// Deferred closures and hooks for the presentation thread.
    pub rendering_actions: usize,
}

impl PendingWork {
    /// Returns true if nothing is queued.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.deletions == 0 && self.simulation_actions == 0 && self.rendering_actions == 0
    }
}

/// Coordinates slot roles, deferred actions and phased deletion between the
/// simulation and presentation threads.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct TripleBufferCoordinator {
    slots: AtomicSlotIds,
    update: Mutex<()>,
    signals: SignalTable,
    simulation_actions: ActionQueue,
    rendering_actions: ActionQueue,
    deletions: Mutex<DeletionQueues>,
    simulation_frames: AtomicU64,
    presentation_frames: AtomicU64,
    cleanup: CleanupConfig,
}

impl TripleBufferCoordinator {
    /// Creates a coordinator with default settings and the
    /// `present = 0, last = 1, current = 2` binding.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    /// Creates a coordinator using `config.cleanup`.
    #[must_use]
    pub fn with_config(config: &EngineConfig) -> Self {
        Self {
            slots: AtomicSlotIds::new(SlotIds::INITIAL),
            update: Mutex::new(()),
            signals: SignalTable::new(),
            simulation_actions: ActionQueue::new(),
            rendering_actions: ActionQueue::new(),
            deletions: Mutex::new(DeletionQueues::default()),
            simulation_frames: AtomicU64::new(0),
            presentation_frames: AtomicU64::new(0),
            cleanup: config.cleanup.clone(),
        }
    }

    /// A consistent snapshot of all three role bindings.
    #[inline]
    #[must_use]
    pub fn slots(&self) -> SlotIds {
        self.slots.load()
    }

    /// Slot read by the presentation thread.
    #[inline]
    #[must_use]
    pub fn present_id(&self) -> usize {
        self.slots().present
    }

    /// Slot the simulation most recently completed.
    #[inline]
    #[must_use]
    pub fn last_simulation_id(&self) -> usize {
        self.slots().last_simulation
    }

    /// Slot the simulation is writing.
    #[inline]
    #[must_use]
    pub fn current_simulation_id(&self) -> usize {
        self.slots().current_simulation
    }

    /// Registers `callback` for `signal` at `time`.
    ///
    /// Callbacks with lower `priority` run first; ties run in connection
    /// order. `*Lock` callbacks run under the coordinator mutex and must not
    /// drive another frame transition.
    pub fn connect(
        &self,
        signal: SignalType,
        time: SignalTime,
        callback: impl Fn(&SlotIds) + Send + Sync + 'static,
        priority: i32,
    ) -> SignalConnection {
        self.signals.connect(signal, time, callback, priority)
    }

    /// Removes a callback. Returns false if it was already removed.
    pub fn disconnect(&self, connection: SignalConnection) -> bool {
        self.signals.disconnect(connection)
    }

    /// Queues `action` for the next `complete_simulation_frame`. Any thread.
    pub fn schedule_simulation_action(&self, action: impl FnOnce() + Send + 'static) {
        self.simulation_actions.push(Deferred::Action(Box::new(action)));
    }

    /// Queues `action` for the next `begin_presentation_frame`. Any thread.
    pub fn schedule_rendering_action(&self, action: impl FnOnce() + Send + 'static) {
        self.rendering_actions.push(Deferred::Action(Box::new(action)));
    }

    /// Starts a phased deletion of `object`. Any thread.
    ///
    /// `on_placed` runs before this returns; the remaining phases follow
    /// over the next frames. The returned handle only serves
    /// [`deletion_phase`](Self::deletion_phase).
    pub fn enqueue_deletion<T: PhasedDelete + 'static>(&self, object: T) -> PoolHandle {
        self.enqueue_boxed_deletion(Box::new(object))
    }

    /// [`enqueue_deletion`](Self::enqueue_deletion) for an already boxed object.
    pub fn enqueue_boxed_deletion(&self, mut object: Box<dyn PhasedDelete>) -> PoolHandle {
        object.on_placed(self);
        let handle = self.deletions.lock().insert(object);
        self.simulation_actions.push(Deferred::SimulationPhase(handle));
        handle
    }

    /// Progress of a pending deletion; `None` once dropped.
    #[must_use]
    pub fn deletion_phase(&self, handle: PoolHandle) -> Option<DeletionPhase> {
        self.deletions.lock().phase(handle)
    }

    /// Objects not yet dropped.
    #[must_use]
    pub fn pending_deletions(&self) -> usize {
        self.deletions.lock().pending.len()
    }

    /// Everything still queued.
    #[must_use]
    pub fn pending_work(&self) -> PendingWork {
        PendingWork {
            deletions: self.pending_deletions(),
            simulation_actions: self.simulation_actions.len(),
            rendering_actions: self.rendering_actions.len(),
        }
    }

    /// Frames driven so far.
    #[must_use]
    pub fn frame_counters(&self) -> FrameCounters {
        FrameCounters {
            simulation: self.simulation_frames.load(Ordering::Relaxed),
            presentation: self.presentation_frames.load(Ordering::Relaxed),
        }
    }

    /// Ends a simulation frame. Simulation thread only.
    ///
    /// 1. Drops objects whose render phase ran.
    /// 2. Moves newly placed deletions on to their simulation phase.
    /// 3. Runs every simulation action queued before this call, FIFO.
    /// 4. Fires `PreUpdateNoLock`.
    /// 5. Under the coordinator mutex: fires `PreUpdateLock`, sets
    ///    `last := current` and `current := next_simulation_slot(last,
    ///    present)`, fires `PostUpdateLock`.
    /// 6. Fires `PostUpdateNoLock`.
    pub fn complete_simulation_frame(&self) {
        let destroyed = {
            let mut queues = self.deletions.lock();
            let destroyed = queues.take_rendered();
            queues.advance_placed();
            destroyed
        };
        drop(destroyed);

        self.drain(&self.simulation_actions);

        let signal = SignalType::SimulationComplete;
        self.signals.fire(signal, SignalTime::PreUpdateNoLock, &self.slots());
        let ids = {
            let _guard = self.update.lock();
            let before = self.slots();
            self.signals.fire(signal, SignalTime::PreUpdateLock, &before);
            let after = before.after_simulation();
            self.slots.store(after);
            self.signals.fire(signal, SignalTime::PostUpdateLock, &after);
            after
        };
        self.signals.fire(signal, SignalTime::PostUpdateNoLock, &ids);

        let frame = self.simulation_frames.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(
            frame,
            present = ids.present,
            last = ids.last_simulation,
            current = ids.current_simulation,
            "simulation frame complete"
        );
    }

    /// Starts a presentation frame. Presentation thread only.
    ///
    /// 1. Moves simulated deletions on to their render phase.
    /// 2. Fires `PreUpdateNoLock`.
    /// 3. Under the coordinator mutex: fires `PreUpdateLock`, sets
    ///    `present := last`, fires `PostUpdateLock`.
    /// 4. Fires `PostUpdateNoLock`.
    /// 5. Runs every rendering action queued before step 5, FIFO.
    pub fn begin_presentation_frame(&self) {
        self.deletions.lock().advance_simulated();

        let signal = SignalType::PresentBegin;
        self.signals.fire(signal, SignalTime::PreUpdateNoLock, &self.slots());
        let ids = {
            let _guard = self.update.lock();
            let before = self.slots();
            self.signals.fire(signal, SignalTime::PreUpdateLock, &before);
            let after = before.after_presentation();
            self.slots.store(after);
            self.signals.fire(signal, SignalTime::PostUpdateLock, &after);
            after
        };
        self.signals.fire(signal, SignalTime::PostUpdateNoLock, &ids);

        self.drain(&self.rendering_actions);

        let frame = self.presentation_frames.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(frame, present = ids.present, "presentation frame begun");
    }

    /// Runs frame pairs until nothing is queued. Returns the number of pairs.
    ///
    /// Only meaningful once both threads have stopped driving frames.
    pub fn purge_cleanup(&self) -> usize {
        let mut rounds = 0;
        while !self.pending_work().is_idle() {
            self.complete_simulation_frame();
            self.begin_presentation_frame();
            rounds += 1;
            if rounds == self.cleanup.purge_warn_rounds {
                tracing::warn!(rounds, pending = ?self.pending_work(), "purge still has queued work");
            }
        }
        tracing::debug!(rounds, "purge cleanup finished");
        rounds
    }

    /// Runs what was queued at the start of the drain. Anything queued by
    /// the actions themselves waits for the next drain.
    fn drain(&self, queue: &ActionQueue) {
        let count = queue.len();
        for deferred in queue.rx.try_iter().take(count) {
            match deferred {
                Deferred::Action(action) => action(),
                Deferred::SimulationPhase(handle) => {
                    if self.run_phase(handle, DeletionPhase::SimulationDone) {
                        self.rendering_actions.push(Deferred::RenderPhase(handle));
                    }
                }
                Deferred::RenderPhase(handle) => {
                    self.run_phase(handle, DeletionPhase::RenderDone);
                }
            }
        }
    }

    /// Runs one hook outside the deletion lock. Returns false for a stale handle.
    fn run_phase(&self, handle: PoolHandle, phase: DeletionPhase) -> bool {
        let Some(mut object) = self.deletions.lock().checkout(handle) else {
            return false;
        };
        match phase {
            DeletionPhase::SimulationDone => object.simulation_phase(),
            DeletionPhase::RenderDone => object.render_phase(),
            DeletionPhase::Placed => {}
        }
        self.deletions.lock().checkin(handle, object, phase);
        true
    }
}

impl Default for TripleBufferCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TripleBufferCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TripleBufferCoordinator")
            .field("slots", &self.slots())
            .field("frames", &self.frame_counters())
            .field("pending", &self.pending_work())
            .field("signals", &self.signals.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[derive(Default)]
    struct Trace(Mutex<Vec<&'static str>>);

    impl Trace {
        fn push(&self, event: &'static str) {
            self.0.lock().push(event);
        }

        fn events(&self) -> Vec<&'static str> {
            self.0.lock().clone()
        }
    }

    struct Tracked(Arc<Trace>);

    impl PhasedDelete for Tracked {
        fn on_placed(&mut self, _: &TripleBufferCoordinator) {
            self.0.push("placed");
        }
        fn simulation_phase(&mut self) {
            self.0.push("simulation");
        }
        fn render_phase(&mut self) {
            self.0.push("render");
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.push("drop");
        }
    }

    #[test]
    fn test_initial_binding() {
        let coordinator = TripleBufferCoordinator::new();
        assert_eq!(coordinator.present_id(), 0);
        assert_eq!(coordinator.last_simulation_id(), 1);
        assert_eq!(coordinator.current_simulation_id(), 2);
    }

    #[test]
    fn test_rotation() {
        let coordinator = TripleBufferCoordinator::new();
        coordinator.complete_simulation_frame();
        assert_eq!(
            coordinator.slots(),
            SlotIds {
                present: 0,
                last_simulation: 2,
                current_simulation: 1
            }
        );
        coordinator.begin_presentation_frame();
        assert_eq!(coordinator.present_id(), 2);
        assert!(coordinator.slots().is_consistent());
    }

    #[test]
    fn test_signal_order_within_frame() {
        let coordinator = TripleBufferCoordinator::new();
        let trace = Arc::new(Trace::default());
        for (time, tag) in [
            (SignalTime::PostUpdateNoLock, "post-nolock"),
            (SignalTime::PreUpdateLock, "pre-lock"),
            (SignalTime::PreUpdateNoLock, "pre-nolock"),
            (SignalTime::PostUpdateLock, "post-lock"),
        ] {
            let trace = Arc::clone(&trace);
            coordinator.connect(SignalType::SimulationComplete, time, move |_| trace.push(tag), 0);
        }
        let action_trace = Arc::clone(&trace);
        coordinator.schedule_simulation_action(move || action_trace.push("action"));

        coordinator.complete_simulation_frame();
        assert_eq!(
            trace.events(),
            vec!["action", "pre-nolock", "pre-lock", "post-lock", "post-nolock"]
        );
    }

    #[test]
    fn test_lock_signals_see_rotation() {
        let coordinator = TripleBufferCoordinator::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for time in [SignalTime::PreUpdateLock, SignalTime::PostUpdateLock] {
            let seen = Arc::clone(&seen);
            coordinator.connect(
                SignalType::PresentBegin,
                time,
                move |ids| seen.lock().push(ids.present),
                0,
            );
        }
        coordinator.begin_presentation_frame();
        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[test]
    fn test_rendering_actions_run_after_rotation() {
        let coordinator = Arc::new(TripleBufferCoordinator::new());
        let observed = Arc::new(AtomicUsize::new(usize::MAX));
        let (inner, out) = (Arc::clone(&coordinator), Arc::clone(&observed));
        coordinator.schedule_rendering_action(move || out.store(inner.present_id(), Ordering::SeqCst));
        coordinator.begin_presentation_frame();
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_actions_queued_while_draining_wait() {
        let coordinator = Arc::new(TripleBufferCoordinator::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let (inner, counter) = (Arc::clone(&coordinator), Arc::clone(&runs));
        coordinator.schedule_simulation_action(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let counter = Arc::clone(&counter);
            inner.schedule_simulation_action(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        coordinator.complete_simulation_frame();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        coordinator.complete_simulation_frame();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_phased_deletion_order() {
        let coordinator = TripleBufferCoordinator::new();
        let trace = Arc::new(Trace::default());
        let handle = coordinator.enqueue_deletion(Tracked(Arc::clone(&trace)));
        assert_eq!(trace.events(), vec!["placed"]);

        coordinator.complete_simulation_frame();
        assert_eq!(coordinator.deletion_phase(handle), Some(DeletionPhase::SimulationDone));
        coordinator.begin_presentation_frame();
        assert_eq!(coordinator.deletion_phase(handle), Some(DeletionPhase::RenderDone));
        assert_eq!(trace.events(), vec!["placed", "simulation", "render"]);

        coordinator.complete_simulation_frame();
        assert_eq!(trace.events(), vec!["placed", "simulation", "render", "drop"]);
        assert_eq!(coordinator.deletion_phase(handle), None);
        assert!(coordinator.pending_work().is_idle());
    }

    struct Parent {
        trace: Arc<Trace>,
        child: Option<Tracked>,
    }

    impl PhasedDelete for Parent {
        fn on_placed(&mut self, coordinator: &TripleBufferCoordinator) {
            if let Some(child) = self.child.take() {
                coordinator.enqueue_deletion(child);
            }
            self.trace.push("parent placed");
        }
    }

    #[test]
    fn test_children_enqueued_from_on_placed() {
        let coordinator = TripleBufferCoordinator::new();
        let trace = Arc::new(Trace::default());
        coordinator.enqueue_deletion(Parent {
            trace: Arc::clone(&trace),
            child: Some(Tracked(Arc::clone(&trace))),
        });
        assert_eq!(coordinator.pending_deletions(), 2);
        assert_eq!(coordinator.purge_cleanup(), 2);
        assert_eq!(
            trace.events(),
            vec!["placed", "parent placed", "simulation", "render", "drop"]
        );
    }

    #[test]
    fn test_purge_on_idle_coordinator() {
        let coordinator = TripleBufferCoordinator::new();
        assert_eq!(coordinator.purge_cleanup(), 0);
        coordinator.schedule_rendering_action(|| {});
        assert_eq!(coordinator.purge_cleanup(), 1);
    }

    #[test]
    fn test_concurrent_threads_keep_invariant() {
        let coordinator = Arc::new(TripleBufferCoordinator::new());
        let violations = Arc::new(AtomicUsize::new(0));
        let check = Arc::clone(&violations);
        coordinator.connect(
            SignalType::PresentBegin,
            SignalTime::PostUpdateLock,
            move |ids| {
                if !ids.is_consistent() {
                    check.fetch_add(1, Ordering::SeqCst);
                }
            },
            0,
        );

        let sim = Arc::clone(&coordinator);
        let simulation = std::thread::spawn(move || {
            for _ in 0..2_000 {
                sim.complete_simulation_frame();
                assert!(sim.slots().is_consistent());
            }
        });
        for _ in 0..2_000 {
            coordinator.begin_presentation_frame();
            let ids = coordinator.slots();
            assert_ne!(ids.current_simulation, ids.present);
        }
        simulation.join().unwrap();
        assert_eq!(violations.load(Ordering::SeqCst), 0);
    }
}

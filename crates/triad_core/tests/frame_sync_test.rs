//! Integration tests for the triple-buffer coordinator and phased deletion.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use proptest::prelude::*;
use triad_core::{PhasedDelete, SlotIds, TripleBufferCoordinator};

/// Records hook order per object.
#[derive(Default)]
struct Journal(Mutex<Vec<(usize, Stage)>>);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Placed,
    Simulation,
    Render,
    Destroyed,
}

struct Instrumented {
    id: usize,
    journal: Arc<Journal>,
}

impl Instrumented {
    fn log(&self, stage: Stage) {
        self.journal.0.lock().push((self.id, stage));
    }
}

impl PhasedDelete for Instrumented {
    fn on_placed(&mut self, _: &TripleBufferCoordinator) {
        self.log(Stage::Placed);
    }
    fn simulation_phase(&mut self) {
        self.log(Stage::Simulation);
    }
    fn render_phase(&mut self) {
        self.log(Stage::Render);
    }
}

impl Drop for Instrumented {
    fn drop(&mut self) {
        self.log(Stage::Destroyed);
    }
}

fn assert_each_object_ordered(journal: &Journal, objects: usize) {
    let entries = journal.0.lock();
    for id in 0..objects {
        let stages: Vec<Stage> = entries
            .iter()
            .filter(|(owner, _)| *owner == id)
            .map(|(_, stage)| *stage)
            .collect();
        assert_eq!(
            stages,
            vec![Stage::Placed, Stage::Simulation, Stage::Render, Stage::Destroyed],
            "object {id}"
        );
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Complete,
    Begin,
    Enqueue,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![Just(Step::Complete), Just(Step::Begin), Just(Step::Enqueue)]
}

proptest! {
    #[test]
    fn slot_roles_stay_consistent(steps in proptest::collection::vec(any::<bool>(), 1..2_000)) {
        let coordinator = TripleBufferCoordinator::new();
        for simulate in steps {
            if simulate {
                coordinator.complete_simulation_frame();
            } else {
                coordinator.begin_presentation_frame();
            }
            let ids = coordinator.slots();
            prop_assert!(ids.is_consistent(), "{:?}", ids);
            prop_assert_ne!(ids.current_simulation, ids.last_simulation);
            prop_assert_ne!(ids.current_simulation, ids.present);
        }
    }

    #[test]
    fn phased_hooks_run_in_order(steps in proptest::collection::vec(step(), 1..200)) {
        let coordinator = TripleBufferCoordinator::new();
        let journal = Arc::new(Journal::default());
        let mut objects = 0;
        for step in steps {
            match step {
                Step::Complete => coordinator.complete_simulation_frame(),
                Step::Begin => coordinator.begin_presentation_frame(),
                Step::Enqueue => {
                    coordinator.enqueue_deletion(Instrumented { id: objects, journal: Arc::clone(&journal) });
                    objects += 1;
                }
            }
        }
        coordinator.purge_cleanup();
        prop_assert_eq!(coordinator.pending_deletions(), 0);
        assert_each_object_ordered(&journal, objects);
    }
}

#[test]
fn test_end_to_end_triple_buffer() {
    let coordinator = TripleBufferCoordinator::new();
    assert_eq!(
        coordinator.slots(),
        SlotIds { present: 0, last_simulation: 1, current_simulation: 2 }
    );

    coordinator.complete_simulation_frame();
    assert_eq!(
        coordinator.slots(),
        SlotIds { present: 0, last_simulation: 2, current_simulation: 1 }
    );

    coordinator.begin_presentation_frame();
    assert_eq!(
        coordinator.slots(),
        SlotIds { present: 2, last_simulation: 2, current_simulation: 1 }
    );

    coordinator.complete_simulation_frame();
    assert_eq!(
        coordinator.slots(),
        SlotIds { present: 2, last_simulation: 1, current_simulation: 0 }
    );
}

#[test]
fn test_phased_deletion_across_threads() {
    const OBJECTS: usize = 200;
    const FRAMES: usize = 400;

    let coordinator = Arc::new(TripleBufferCoordinator::new());
    let journal = Arc::new(Journal::default());
    let enqueued = Arc::new(AtomicUsize::new(0));

    let simulation = {
        let coordinator = Arc::clone(&coordinator);
        let journal = Arc::clone(&journal);
        let enqueued = Arc::clone(&enqueued);
        thread::spawn(move || {
            for frame in 0..FRAMES {
                if frame < OBJECTS {
                    let id = enqueued.fetch_add(1, Ordering::SeqCst);
                    coordinator.enqueue_deletion(Instrumented { id, journal: Arc::clone(&journal) });
                }
                coordinator.complete_simulation_frame();
            }
        })
    };

    let presentation = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || {
            for _ in 0..FRAMES {
                coordinator.begin_presentation_frame();
                thread::yield_now();
            }
        })
    };

    simulation.join().unwrap();
    presentation.join().unwrap();
    coordinator.purge_cleanup();

    assert_eq!(enqueued.load(Ordering::SeqCst), OBJECTS);
    assert_eq!(coordinator.pending_deletions(), 0);
    assert_each_object_ordered(&journal, OBJECTS);
}

#[test]
fn test_rendering_actions_scheduled_from_simulation() {
    let coordinator = Arc::new(TripleBufferCoordinator::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        let seen = Arc::clone(&seen);
        coordinator.schedule_rendering_action(move || seen.lock().push(i));
    }
    coordinator.complete_simulation_frame();
    assert!(seen.lock().is_empty());

    coordinator.begin_presentation_frame();
    assert_eq!(*seen.lock(), vec![0, 1, 2]);
}

//! Triple-buffered sorted draw list.
//!
//! ```text
//!  simulation thread                        presentation thread
//!  ─────────────────                        ───────────────────
//!  add / remove / update ──▶ slot[current]
//!  complete_simulation_frame:
//!    PreUpdateNoLock:  sort slot[current] if dirty
//!    rotate:           last := current
//!    PostUpdateNoLock: slot[current] := slot[last]
//!                                           begin_presentation_frame:
//!                                             present := last
//!                                           draw: read slot[present]
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use triad_core::sync::SLOT_COUNT;
use triad_core::{
    DrawConfig, EngineConfig, GpuResult, SignalConnection, SignalTime, SignalType, SlotIds,
    TripleBufferCoordinator, MAX_ATTRIBUTE_SLOTS,
};

use super::descriptor::DrawCallDescriptor;
use super::order::{ascending_order, DrawOrder, DrawOrderComparator};
use super::state_tracker::StateTracker;
use crate::device::{GraphicsDevice, ProgramId};
use crate::pipeline::DrawStats;

/// Handle to an element of a [`DrawBatchList`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawElementId(u64);

#[derive(Clone)]
struct Entry {
    id: DrawElementId,
    descriptor: DrawCallDescriptor,
}

/// Simulation-side bookkeeping, guarded by one mutex.
struct ListState {
    /// Element → index in the current simulation slot.
    positions: HashMap<DrawElementId, usize>,
    next_id: u64,
    comparator: DrawOrderComparator,
    sort_count: u64,
    /// Bumped on every change to the current simulation slot.
    generation: u64,
    /// Generation each slot's contents correspond to.
    slot_generations: [u64; SLOT_COUNT],
    /// Order handles of live elements, by address, with their element count.
    observed: HashMap<usize, (Arc<DrawOrder>, usize)>,
}

impl ListState {
    fn touch(&mut self, slot: usize) {
        self.generation += 1;
        self.slot_generations[slot] = self.generation;
    }

    fn observe(&mut self, descriptor: &DrawCallDescriptor, dirty: &Arc<AtomicBool>) {
        let Some(order) = &descriptor.order else {
            return;
        };
        let (_, count) = self
            .observed
            .entry(Arc::as_ptr(order) as usize)
            .or_insert_with(|| (Arc::clone(order), 0));
        if *count == 0 {
            order.subscribe(dirty);
        }
        *count += 1;
    }

    fn forget(&mut self, descriptor: &DrawCallDescriptor, dirty: &Arc<AtomicBool>) {
        let Some(order) = &descriptor.order else {
            return;
        };
        let key = Arc::as_ptr(order) as usize;
        let Some((_, count)) = self.observed.get_mut(&key) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            order.unsubscribe(dirty);
            self.observed.remove(&key);
        }
    }
}

struct BatchShared {
    state: Mutex<ListState>,
    slots: [RwLock<Vec<Option<Entry>>>; SLOT_COUNT],
    dirty: Arc<AtomicBool>,
    config: DrawConfig,
}

impl BatchShared {
    /// Sorts and compacts `slot` if anything changed since the last sort.
    fn sort_if_dirty(&self, slot: usize) {
        if !self.dirty.swap(false, AtomicOrdering::AcqRel) {
            return;
        }
        let mut state = self.state.lock();
        let compare = Arc::clone(&state.comparator);
        let mut entries = self.slots[slot].write();

        let tombstones = entries.iter().filter(|e| e.is_none()).count();
        let mut live: Vec<Entry> = entries.drain(..).flatten().collect();
        live.sort_by(|a, b| a.descriptor.batch_cmp(&b.descriptor, &*compare));

        state.positions.clear();
        for (index, entry) in live.iter().enumerate() {
            state.positions.insert(entry.id, index);
        }
        *entries = live.into_iter().map(Some).collect();

        state.sort_count += 1;
        state.touch(slot);
        tracing::trace!(elements = entries.len(), tombstones, "draw batch list sorted");
    }

    /// Copies the finished slot into the new simulation slot.
    fn copy_forward(&self, from: usize, to: usize) {
        let mut state = self.state.lock();
        if state.slot_generations[to] == state.slot_generations[from] {
            return;
        }
        let source = self.slots[from].read();
        self.slots[to].write().clone_from(&source);
        state.slot_generations[to] = state.slot_generations[from];
    }
}

/// Sorted draw call descriptors, re-sorted lazily on the simulation thread
/// and read lock-free of the simulation by the presentation thread.
///
/// Mutations (`add_element`, `remove_element`, `update_element`) belong to
/// the simulation thread; [`draw`](Self::draw) belongs to the presentation
/// thread and only ever reads the `present` slot.
pub struct DrawBatchList {
    shared: Arc<BatchShared>,
    coordinator: Arc<TripleBufferCoordinator>,
    connections: [SignalConnection; 2],
}

impl DrawBatchList {
    /// Creates an empty list driven by `coordinator`'s frame transitions.
    ///
    /// An out-of-range `draw.attribute_slots` is clamped to
    /// `1..=MAX_ATTRIBUTE_SLOTS`.
    #[must_use]
    pub fn new(coordinator: Arc<TripleBufferCoordinator>, config: &EngineConfig) -> Self {
        let mut draw = config.draw.clone();
        if let Err(error) = config.validate() {
            tracing::warn!(%error, "draw batch list built from an invalid config");
            draw.attribute_slots = draw.attribute_slots.clamp(1, MAX_ATTRIBUTE_SLOTS);
        }
        let shared = Arc::new(BatchShared {
            state: Mutex::new(ListState {
                positions: HashMap::new(),
                next_id: 0,
                comparator: ascending_order(),
                sort_count: 0,
                generation: 0,
                slot_generations: [0; SLOT_COUNT],
                observed: HashMap::new(),
            }),
            slots: std::array::from_fn(|_| RwLock::new(Vec::new())),
            dirty: Arc::new(AtomicBool::new(false)),
            config: draw,
        });

        let sorter = Arc::downgrade(&shared);
        let sort = coordinator.connect(
            SignalType::SimulationComplete,
            SignalTime::PreUpdateNoLock,
            move |ids: &SlotIds| {
                if let Some(shared) = Weak::upgrade(&sorter) {
                    shared.sort_if_dirty(ids.current_simulation);
                }
            },
            0,
        );
        let copier = Arc::downgrade(&shared);
        let copy = coordinator.connect(
            SignalType::SimulationComplete,
            SignalTime::PostUpdateNoLock,
            move |ids: &SlotIds| {
                if let Some(shared) = Weak::upgrade(&copier) {
                    shared.copy_forward(ids.last_simulation, ids.current_simulation);
                }
            },
            0,
        );

        Self {
            shared,
            coordinator,
            connections: [sort, copy],
        }
    }

    /// Appends `descriptor` to the simulation slot and schedules a re-sort.
    pub fn add_element(&self, descriptor: DrawCallDescriptor) -> DrawElementId {
        let slot = self.coordinator.current_simulation_id();
        let mut state = self.shared.state.lock();
        let id = DrawElementId(state.next_id);
        state.next_id += 1;
        state.observe(&descriptor, &self.shared.dirty);

        let mut entries = self.shared.slots[slot].write();
        state.positions.insert(id, entries.len());
        entries.push(Some(Entry { id, descriptor }));
        drop(entries);

        state.touch(slot);
        self.shared.dirty.store(true, AtomicOrdering::Release);
        id
    }

    /// Tombstones `id` in place. Returns false if it was not present.
    pub fn remove_element(&self, id: DrawElementId) -> bool {
        let slot = self.coordinator.current_simulation_id();
        let mut state = self.shared.state.lock();
        let Some(index) = state.positions.remove(&id) else {
            return false;
        };
        let removed = self.shared.slots[slot].write()[index].take();
        if let Some(entry) = removed {
            state.forget(&entry.descriptor, &self.shared.dirty);
        }
        state.touch(slot);
        self.shared.dirty.store(true, AtomicOrdering::Release);
        true
    }

    /// Replaces the descriptor of `id`. Returns false if it was not present.
    pub fn update_element(&self, id: DrawElementId, descriptor: DrawCallDescriptor) -> bool {
        let slot = self.coordinator.current_simulation_id();
        let mut state = self.shared.state.lock();
        let Some(&index) = state.positions.get(&id) else {
            return false;
        };
        state.observe(&descriptor, &self.shared.dirty);
        let replaced = self.shared.slots[slot].write()[index].replace(Entry { id, descriptor });
        if let Some(entry) = replaced {
            state.forget(&entry.descriptor, &self.shared.dirty);
        }
        state.touch(slot);
        self.shared.dirty.store(true, AtomicOrdering::Release);
        true
    }

    /// Installs the comparator applied to order handles and schedules a
    /// re-sort.
    pub fn set_draw_order_comparator(&self, comparator: DrawOrderComparator) {
        self.shared.state.lock().comparator = comparator;
        self.shared.dirty.store(true, AtomicOrdering::Release);
    }

    /// Live elements in the simulation slot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().positions.len()
    }

    /// No live elements in the simulation slot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A re-sort is scheduled for the next simulation frame.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.load(AtomicOrdering::Acquire)
    }

    /// Sorts performed so far.
    #[must_use]
    pub fn sort_count(&self) -> u64 {
        self.shared.state.lock().sort_count
    }

    /// Element order the presentation thread currently sees.
    #[must_use]
    pub fn present_order(&self) -> Vec<DrawElementId> {
        let present = self.coordinator.present_id();
        self.shared.slots[present]
            .read()
            .iter()
            .flatten()
            .map(|entry| entry.id)
            .collect()
    }

    /// Draws the `present` slot. Presentation thread only.
    ///
    /// `select` maps each descriptor's program to the one to draw with;
    /// returning `None` skips the descriptor. Invalid and empty
    /// descriptors are skipped too.
    ///
    /// # Errors
    ///
    /// Propagates backend failures; ranges queued before the failure are
    /// not submitted.
    pub fn draw<D: GraphicsDevice>(
        &self,
        device: &mut D,
        stats: &mut DrawStats,
        select: impl Fn(ProgramId) -> Option<ProgramId>,
    ) -> GpuResult<()> {
        let present = self.coordinator.present_id();
        let entries = self.shared.slots[present].read();
        let max_slots = self.shared.config.attribute_slots;
        let mut tracker = StateTracker::new(self.shared.config.multi_draw && device.supports_multi_draw());

        for entry in entries.iter().flatten() {
            let descriptor = &entry.descriptor;
            let runnable = descriptor.is_valid(max_slots)
                && descriptor.command.as_ref().is_some_and(|c| !c.is_empty());
            let program = if runnable {
                descriptor.program.and_then(&select)
            } else {
                None
            };
            match program {
                Some(program) => tracker.submit(device, stats, descriptor, program)?,
                None => stats.skipped += 1,
            }
        }
        tracker.finish(device, stats);
        Ok(())
    }
}

impl Drop for DrawBatchList {
    fn drop(&mut self) {
        for connection in self.connections {
            self.coordinator.disconnect(connection);
        }
    }
}

impl std::fmt::Debug for DrawBatchList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawBatchList")
            .field("len", &self.len())
            .field("dirty", &self.is_dirty())
            .field("sort_count", &self.sort_count())
            .finish_non_exhaustive()
    }
}

//! Frame transition signals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::slots::SlotIds;

/// Which transition a callback observes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalType {
    /// `complete_simulation_frame`.
    SimulationComplete,
    /// `begin_presentation_frame`.
    PresentBegin,
}

/// When, relative to the slot rotation, a callback runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalTime {
    /// Before the coordinator mutex is taken.
    PreUpdateNoLock,
    /// Under the coordinator mutex, before the rotation.
    PreUpdateLock,
    /// Under the coordinator mutex, after the rotation.
    PostUpdateLock,
    /// After the coordinator mutex is released.
    PostUpdateNoLock,
}

/// Callback invoked with the slot binding current at the time it fires.
pub type SignalCallback = Arc<dyn Fn(&SlotIds) + Send + Sync>;

/// Handle returned by `connect`, used to disconnect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SignalConnection {
    signal: SignalType,
    time: SignalTime,
    id: u64,
}

impl SignalConnection {
    /// Transition this connection listens to.
    #[must_use]
    pub const fn signal(&self) -> SignalType {
        self.signal
    }

    /// Point in the transition this connection fires at.
    #[must_use]
    pub const fn time(&self) -> SignalTime {
        self.time
    }
}

#[derive(Clone)]
struct Slot {
    priority: i32,
    id: u64,
    callback: SignalCallback,
}

const TIMES: usize = 4;

const fn table_index(signal: SignalType, time: SignalTime) -> usize {
    let signal = match signal {
        SignalType::SimulationComplete => 0,
        SignalType::PresentBegin => 1,
    };
    let time = match time {
        SignalTime::PreUpdateNoLock => 0,
        SignalTime::PreUpdateLock => 1,
        SignalTime::PostUpdateLock => 2,
        SignalTime::PostUpdateNoLock => 3,
    };
    signal * TIMES + time
}

/// Callback lists per (signal, time). Lists are copy-on-write so firing
/// never holds a lock while callbacks run.
pub(crate) struct SignalTable {
    lists: [RwLock<Arc<Vec<Slot>>>; 2 * TIMES],
    next_id: AtomicU64,
}

impl SignalTable {
    pub(crate) fn new() -> Self {
        Self {
            lists: std::array::from_fn(|_| RwLock::new(Arc::new(Vec::new()))),
            next_id: AtomicU64::new(0),
        }
    }

    /// Lower priorities run first; equal priorities run in connection order.
    pub(crate) fn connect(
        &self,
        signal: SignalType,
        time: SignalTime,
        callback: impl Fn(&SlotIds) + Send + Sync + 'static,
        priority: i32,
    ) -> SignalConnection {
        let callback: SignalCallback = Arc::new(callback);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut list = self.lists[table_index(signal, time)].write();
        let slots = Arc::make_mut(&mut *list);
        let at = slots.partition_point(|slot| slot.priority <= priority);
        slots.insert(at, Slot { priority, id, callback });
        SignalConnection { signal, time, id }
    }

    pub(crate) fn disconnect(&self, connection: SignalConnection) -> bool {
        let mut list = self.lists[table_index(connection.signal, connection.time)].write();
        let Some(at) = list.iter().position(|slot| slot.id == connection.id) else {
            return false;
        };
        Arc::make_mut(&mut *list).remove(at);
        true
    }

    pub(crate) fn fire(&self, signal: SignalType, time: SignalTime, ids: &SlotIds) {
        let list = Arc::clone(&*self.lists[table_index(signal, time)].read());
        for slot in list.iter() {
            (slot.callback)(ids);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lists.iter().map(|list| list.read().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_priority_order() {
        let table = SignalTable::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (tag, priority) in [("b", 5), ("a", -1), ("c", 5), ("d", 10)] {
            let order = Arc::clone(&order);
            table.connect(
                SignalType::PresentBegin,
                SignalTime::PostUpdateNoLock,
                move |_| order.lock().push(tag),
                priority,
            );
        }
        table.fire(SignalType::PresentBegin, SignalTime::PostUpdateNoLock, &SlotIds::INITIAL);
        assert_eq!(*order.lock(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_disconnect() {
        let table = SignalTable::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        let conn = table.connect(
            SignalType::SimulationComplete,
            SignalTime::PreUpdateLock,
            move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            },
            0,
        );
        table.fire(SignalType::SimulationComplete, SignalTime::PreUpdateLock, &SlotIds::INITIAL);
        assert!(table.disconnect(conn));
        assert!(!table.disconnect(conn));
        table.fire(SignalType::SimulationComplete, SignalTime::PreUpdateLock, &SlotIds::INITIAL);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_callback_may_connect_while_firing() {
        let table = Arc::new(SignalTable::new());
        let inner = Arc::clone(&table);
        table.connect(
            SignalType::PresentBegin,
            SignalTime::PreUpdateNoLock,
            move |_| {
                inner.connect(SignalType::PresentBegin, SignalTime::PreUpdateNoLock, |_| {}, 0);
            },
            0,
        );
        table.fire(SignalType::PresentBegin, SignalTime::PreUpdateNoLock, &SlotIds::INITIAL);
        assert_eq!(table.len(), 2);
    }
}

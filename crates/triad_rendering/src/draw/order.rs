//! Dynamic draw-order handles.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Compares two order handles. Installed per list with
/// [`DrawBatchList::set_draw_order_comparator`](super::DrawBatchList::set_draw_order_comparator).
pub type DrawOrderComparator = Arc<dyn Fn(&DrawOrder, &DrawOrder) -> Ordering + Send + Sync>;

/// Comparator used until one is installed: ascending [`DrawOrder::value`].
#[must_use]
pub fn ascending_order() -> DrawOrderComparator {
    Arc::new(|a: &DrawOrder, b: &DrawOrder| a.value().cmp(&b.value()))
}

/// A mutable sort key shared by any number of descriptors.
///
/// Changing the value flags every list holding a descriptor with this
/// handle for a re-sort on its next simulation frame.
#[derive(Default)]
pub struct DrawOrder {
    value: AtomicI64,
    observers: Mutex<Vec<Weak<AtomicBool>>>,
}

impl DrawOrder {
    /// Creates a handle with `value`.
    #[must_use]
    pub fn new(value: i64) -> Self {
        Self {
            value: AtomicI64::new(value),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Current value.
    #[inline]
    #[must_use]
    pub fn value(&self) -> i64 {
        self.value.load(AtomicOrdering::Acquire)
    }

    /// Stores `value`, notifying observers if it changed.
    pub fn set(&self, value: i64) {
        if self.value.swap(value, AtomicOrdering::AcqRel) == value {
            return;
        }
        self.observers.lock().retain(|observer| match observer.upgrade() {
            Some(flag) => {
                flag.store(true, AtomicOrdering::Release);
                true
            }
            None => false,
        });
    }

    /// Sets `flag` whenever the value changes. Subscribing twice is a no-op.
    pub fn subscribe(&self, flag: &Arc<AtomicBool>) {
        let mut observers = self.observers.lock();
        let weak = Arc::downgrade(flag);
        if !observers.iter().any(|o| o.ptr_eq(&weak)) {
            observers.push(weak);
        }
    }

    /// Stops setting `flag`.
    pub fn unsubscribe(&self, flag: &Arc<AtomicBool>) {
        let weak = Arc::downgrade(flag);
        self.observers
            .lock()
            .retain(|o| o.strong_count() > 0 && !o.ptr_eq(&weak));
    }

    /// Live observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .iter()
            .filter(|o| o.strong_count() > 0)
            .count()
    }
}

impl std::fmt::Debug for DrawOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawOrder").field("value", &self.value()).finish_non_exhaustive()
    }
}

//! Signal/slot primitives connecting operators, nodes and the measurement.
//!
//! [`Signal`] is thread-safe: operators may emit from timer tasks or hardware threads.
//! [`LocalSignal`] lives on the orchestrator thread and carries the node events, so
//! node callbacks may capture `Rc` state such as channel handles.
//!
//! Emission snapshots the connected slots and calls them with no lock held, so a slot
//! may connect, disconnect or emit again without deadlocking.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use crate::gate::lock_unpoisoned;

/// Identifies a connection on one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

/// Action handle: a callable the orchestrator invokes.
pub type Slot<T> = Arc<dyn Fn(T) + Send + Sync>;

type Slots<T> = Vec<(SlotId, Slot<T>)>;

struct SignalInner<T> {
    slots: Slots<T>,
    next_id: u64,
}

/// Thread-safe multicast event.
///
/// Cloning yields another handle to the same signal.
pub struct Signal<T> {
    inner: Arc<Mutex<SignalInner<T>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SignalInner {
                slots: Vec::new(),
                next_id: 0,
            })),
        }
    }
}

impl<T: Clone + Send + 'static> Signal<T> {
    /// Create a signal with no connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a slot. It stays connected until [`Signal::disconnect`].
    pub fn connect(&self, slot: impl Fn(T) + Send + Sync + 'static) -> SlotId {
        let mut inner = lock_unpoisoned(&self.inner);
        let id = SlotId(inner.next_id);
        inner.next_id += 1;
        inner.slots.push((id, Arc::new(slot)));
        id
    }

    /// Remove a connection. Returns false if it was not connected.
    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut inner = lock_unpoisoned(&self.inner);
        let before = inner.slots.len();
        inner.slots.retain(|(slot, _)| *slot != id);
        inner.slots.len() != before
    }

    /// Call every connected slot with `value`, in connection order.
    pub fn emit(&self, value: T) {
        let slots: Vec<Slot<T>> = lock_unpoisoned(&self.inner)
            .slots
            .iter()
            .map(|(_, slot)| slot.clone())
            .collect();
        for slot in slots {
            slot(value.clone());
        }
    }

    /// Number of connected slots.
    pub fn connections(&self) -> usize {
        lock_unpoisoned(&self.inner).slots.len()
    }

    /// An action handle that emits this signal.
    pub fn slot(&self) -> Slot<T> {
        let signal = self.clone();
        Arc::new(move |value| signal.emit(value))
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("connections", &lock_unpoisoned(&self.inner).slots.len())
            .finish()
    }
}

type LocalSlot<T> = Rc<dyn Fn(T)>;

/// Single-threaded multicast event.
pub struct LocalSignal<T> {
    slots: RefCell<Vec<(SlotId, LocalSlot<T>)>>,
    next_id: RefCell<u64>,
}

impl<T> Default for LocalSignal<T> {
    fn default() -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
            next_id: RefCell::new(0),
        }
    }
}

impl<T: Clone> LocalSignal<T> {
    /// Create a signal with no connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a slot.
    pub fn connect(&self, slot: impl Fn(T) + 'static) -> SlotId {
        let mut next = self.next_id.borrow_mut();
        let id = SlotId(*next);
        *next += 1;
        self.slots.borrow_mut().push((id, Rc::new(slot)));
        id
    }

    /// Remove a connection. Returns false if it was not connected.
    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut slots = self.slots.borrow_mut();
        let before = slots.len();
        slots.retain(|(slot, _)| *slot != id);
        slots.len() != before
    }

    /// Call every connected slot with `value`.
    pub fn emit(&self, value: T) {
        let slots: Vec<LocalSlot<T>> = self
            .slots
            .borrow()
            .iter()
            .map(|(_, slot)| slot.clone())
            .collect();
        for slot in slots {
            slot(value.clone());
        }
    }

    /// Number of connected slots.
    pub fn connections(&self) -> usize {
        self.slots.borrow().len()
    }
}

impl<T> fmt::Debug for LocalSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSignal")
            .field("connections", &self.slots.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_reaches_every_slot_until_disconnected() {
        let signal = Signal::<u64>::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t = total.clone();
        let first = signal.connect(move |v| {
            t.fetch_add(v as usize, Ordering::SeqCst);
        });
        let t = total.clone();
        signal.connect(move |v| {
            t.fetch_add(10 * v as usize, Ordering::SeqCst);
        });

        signal.emit(1);
        assert_eq!(total.load(Ordering::SeqCst), 11);

        assert!(signal.disconnect(first));
        assert!(!signal.disconnect(first));
        signal.emit(1);
        assert_eq!(total.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn slots_may_disconnect_themselves() {
        let signal = Signal::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = Arc::new(Mutex::new(None));

        let (s, c, i) = (signal.clone(), calls.clone(), id.clone());
        let connected = signal.connect(move |()| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(own) = *lock_unpoisoned(&i) {
                s.disconnect(own);
            }
        });
        *lock_unpoisoned(&id) = Some(connected);

        signal.emit(());
        signal.emit(());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(signal.connections(), 0);
    }

    #[test]
    fn slot_handle_emits_from_another_thread() {
        let signal = Signal::<f64>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        signal.connect(move |v| lock_unpoisoned(&sink).push(v));

        let action = signal.slot();
        std::thread::spawn(move || action(2.5)).join().unwrap();
        assert_eq!(*lock_unpoisoned(&seen), [2.5]);
    }

    #[test]
    fn local_signal_accepts_rc_state() {
        let signal = LocalSignal::<()>::new();
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        signal.connect(move |()| *c.borrow_mut() += 1);
        signal.emit(());
        signal.emit(());
        assert_eq!(*count.borrow(), 2);
    }
}

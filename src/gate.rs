//! Synchronization gates.
//!
//! A [`Gate`] is a reference-counted latch shared by handle between the measurement
//! and any external party that needs to hold up a phase transition. Two instances are
//! used by every run, bundled in [`Gates`]:
//!
//! - the **run gate** blocks a new run from starting while it is held. A running
//!   measurement holds it from `run()` until it returns to STANDBY.
//! - the **step gate** blocks the measurement after *prepared*, *stopped* and
//!   *finalized* until every holder has released it.
//!
//! `acquire()` and `release()` notify an optional [`GateListener`] exactly once per
//! 0→1 and 1→0 edge. The listener is called with the internal lock released.
//! Async waiters use [`Gate::wait_released`], which is woken by the release edge
//! instead of polling the count.
//!
//! # Example
//!
//! ```
//! use measure_daq::gate::Gate;
//!
//! let gate = Gate::new("step");
//! gate.acquire();
//! gate.acquire();
//! gate.release();
//! assert!(gate.is_acquired());
//! gate.release();
//! gate.release(); // clamped, no-op
//! assert!(!gate.is_acquired());
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Receives edge notifications from a [`Gate`].
pub trait GateListener: Send + Sync {
    /// The count went from zero to one.
    fn gate_acquired(&self) {}

    /// The count went from one to zero.
    fn gate_released(&self) {}
}

struct GateInner {
    name: &'static str,
    count: Mutex<usize>,
    acquired: watch::Sender<bool>,
    listener: Mutex<Option<Arc<dyn GateListener>>>,
}

/// Reference-counted latch with edge callbacks.
///
/// Cloning a `Gate` yields another handle to the same latch.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<GateInner>,
}

impl Gate {
    /// Create a fresh, released gate.
    pub fn new(name: &'static str) -> Self {
        let (acquired, _) = watch::channel(false);
        Self {
            inner: Arc::new(GateInner {
                name,
                count: Mutex::new(0),
                acquired,
                listener: Mutex::new(None),
            }),
        }
    }

    /// Name used in log output.
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Increment the count. Notifies the listener on the 0→1 edge.
    pub fn acquire(&self) {
        let edge = {
            let mut count = lock_unpoisoned(&self.inner.count);
            *count += 1;
            let edge = *count == 1;
            if edge {
                self.inner.acquired.send_replace(true);
            }
            edge
        };

        if edge {
            tracing::trace!(gate = self.inner.name, "gate acquired");
            if let Some(listener) = self.listener() {
                listener.gate_acquired();
            }
        }
    }

    /// Decrement the count, never below zero. Notifies the listener on the 1→0 edge.
    pub fn release(&self) {
        let edge = {
            let mut count = lock_unpoisoned(&self.inner.count);
            if *count == 0 {
                return;
            }
            *count -= 1;
            let edge = *count == 0;
            if edge {
                self.inner.acquired.send_replace(false);
            }
            edge
        };

        if edge {
            tracing::trace!(gate = self.inner.name, "gate released");
            if let Some(listener) = self.listener() {
                listener.gate_released();
            }
        }
    }

    /// Whether at least one holder is outstanding.
    pub fn is_acquired(&self) -> bool {
        *lock_unpoisoned(&self.inner.count) > 0
    }

    /// Current number of outstanding holders.
    pub fn count(&self) -> usize {
        *lock_unpoisoned(&self.inner.count)
    }

    /// Install or remove the edge listener. Replaces any previous listener.
    pub fn set_listener(&self, listener: Option<Arc<dyn GateListener>>) {
        *lock_unpoisoned(&self.inner.listener) = listener;
    }

    fn listener(&self) -> Option<Arc<dyn GateListener>> {
        lock_unpoisoned(&self.inner.listener).clone()
    }

    /// Resolve once the gate is (or becomes) released.
    pub async fn wait_released(&self) {
        let mut acquired = self.inner.acquired.subscribe();
        // The sender lives as long as `self`, so this only returns once released.
        let _ = acquired.wait_for(|held| !*held).await;
    }

    /// Acquire the gate for the lifetime of the returned guard.
    pub fn hold(&self) -> GateGuard {
        self.acquire();
        GateGuard { gate: self.clone() }
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("name", &self.inner.name)
            .field("count", &self.count())
            .finish()
    }
}

/// Releases its gate when dropped.
#[must_use = "the gate is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct GateGuard {
    gate: Gate,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// The gate pair every measurement coordinates on.
#[derive(Clone, Debug)]
pub struct Gates {
    /// Held for the whole lifetime of a run.
    pub run: Gate,
    /// Held by external parties to delay step and scan boundaries.
    pub step: Gate,
}

impl Gates {
    /// Build an independent pair of released gates.
    pub fn new() -> Self {
        Self {
            run: Gate::new("run"),
            step: Gate::new("step"),
        }
    }
}

impl Default for Gates {
    fn default() -> Self {
        Self::new()
    }
}

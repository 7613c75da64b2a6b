//! Scan and trigger operators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::operators::{
    spawn_timer, PreparedScan, PreparedTrigger, ScanOperator, TriggerOperator,
};
use super::signal::Signal;
use crate::gate::lock_unpoisoned;

/// Pass-through scan: every move is complete immediately.
#[derive(Debug, Default)]
pub struct VirtualScan {
    ready: Signal<()>,
}

impl VirtualScan {
    /// Create the operator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScanOperator for VirtualScan {
    fn prepare_scan(&mut self) -> PreparedScan {
        let ready = self.ready.clone();
        PreparedScan {
            move_scan: Arc::new(move |_point: f64| ready.emit(())),
            scan_ready: self.ready.clone(),
        }
    }
}

/// Single-shot timer shared by the delayed operators.
///
/// Starting it again before it fired replaces the pending shot.
#[derive(Debug, Clone)]
struct OneShot {
    name: &'static str,
    delay: Duration,
    fired: Signal<()>,
    pending: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl OneShot {
    fn new(name: &'static str, delay: Duration) -> Self {
        Self {
            name,
            delay,
            fired: Signal::new(),
            pending: Arc::new(Mutex::new(None)),
        }
    }

    fn start(&self) {
        let fired = self.fired.clone();
        let delay = self.delay;
        let task = spawn_timer(self.name, async move {
            tokio::time::sleep(delay).await;
            fired.emit(());
        });

        if let Some(previous) = std::mem::replace(&mut *lock_unpoisoned(&self.pending), task) {
            previous.abort();
        }
    }

    fn cancel(&self) {
        if let Some(task) = lock_unpoisoned(&self.pending).take() {
            task.abort();
        }
    }
}

/// Reports a move as complete after a fixed delay.
#[derive(Debug)]
pub struct DelayedScan {
    timer: OneShot,
}

impl DelayedScan {
    /// Wait `delay` after every move request.
    pub fn new(delay: Duration) -> Self {
        Self {
            timer: OneShot::new("delayed_scan", delay),
        }
    }
}

impl ScanOperator for DelayedScan {
    fn prepare_scan(&mut self) -> PreparedScan {
        let timer = self.timer.clone();
        PreparedScan {
            move_scan: Arc::new(move |_point: f64| timer.start()),
            scan_ready: self.timer.fired.clone(),
        }
    }

    fn finalize_scan(&mut self) {
        self.timer.cancel();
    }
}

/// Fires as soon as it is armed.
#[derive(Debug, Default)]
pub struct ImmediateTrigger {
    fired: Signal<()>,
}

impl ImmediateTrigger {
    /// Create the operator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TriggerOperator for ImmediateTrigger {
    fn prepare_trigger(&mut self) -> PreparedTrigger {
        PreparedTrigger {
            arm_trigger: self.fired.slot(),
            trigger_fired: self.fired.clone(),
        }
    }
}

/// Fires a fixed delay after being armed.
#[derive(Debug)]
pub struct DelayedTrigger {
    timer: OneShot,
}

impl DelayedTrigger {
    /// Fire `delay` after every arm request.
    pub fn new(delay: Duration) -> Self {
        Self {
            timer: OneShot::new("delayed_trigger", delay),
        }
    }
}

impl TriggerOperator for DelayedTrigger {
    fn prepare_trigger(&mut self) -> PreparedTrigger {
        let timer = self.timer.clone();
        PreparedTrigger {
            arm_trigger: Arc::new(move |()| timer.start()),
            trigger_fired: self.timer.fired.clone(),
        }
    }

    fn finalize_trigger(&mut self) {
        self.timer.cancel();
    }
}

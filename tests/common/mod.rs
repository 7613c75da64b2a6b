//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use measure_daq::channel::Channel;
use measure_daq::gate::{GateGuard, Gates};
use measure_daq::measure::{
    Node, NodeEvents, PointOperator, PreparedPoints, PreparedScan, PreparedStatus,
    PreparedTrigger, ScanOperator, Signal, Status, StatusOperator, TriggerOperator,
};

/// Status operator that records every status it is told about.
#[derive(Clone, Default)]
pub struct StatusLog {
    pub statuses: Arc<Mutex<Vec<Status>>>,
    pub progress: Arc<Mutex<Vec<u64>>>,
    pub finalized: Arc<Mutex<usize>>,
}

impl StatusLog {
    pub fn statuses(&self) -> Vec<Status> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn count(&self, status: Status) -> usize {
        self.statuses().iter().filter(|s| **s == status).count()
    }
}

impl StatusOperator for StatusLog {
    fn prepare_status(&mut self, _limit_max: u64) -> PreparedStatus {
        let statuses = self.statuses.clone();
        let progress = self.progress.clone();
        PreparedStatus {
            update_status: Arc::new(move |status| statuses.lock().unwrap().push(status)),
            update_limit: Arc::new(move |value| progress.lock().unwrap().push(value)),
        }
    }

    fn finalize_status(&mut self) {
        *self.finalized.lock().unwrap() += 1;
    }
}

/// Node that counts the measurement events it sees.
#[derive(Default)]
pub struct CountingNode {
    pub events: Rc<RefCell<Vec<&'static str>>>,
}

impl CountingNode {
    pub fn count(&self, event: &str) -> usize {
        self.events.borrow().iter().filter(|e| **e == event).count()
    }
}

impl Node for CountingNode {
    fn connect_to_measurement(&self, events: &NodeEvents) {
        for (name, signal) in [
            ("prepared", &events.prepared),
            ("started", &events.started),
            ("stopped", &events.stopped),
            ("finalized", &events.finalized),
        ] {
            let log = self.events.clone();
            signal.connect(move |()| log.borrow_mut().push(name));
        }
    }
}

/// Node holding the step gate from *stopped* until the test releases it.
pub struct GateHolder {
    gates: Gates,
    pub guard: Rc<RefCell<Option<GateGuard>>>,
}

impl GateHolder {
    pub fn new(gates: &Gates) -> Self {
        Self {
            gates: gates.clone(),
            guard: Rc::new(RefCell::new(None)),
        }
    }

    pub fn release(&self) {
        self.guard.borrow_mut().take();
    }
}

impl Node for GateHolder {
    fn connect_to_measurement(&self, events: &NodeEvents) {
        let gates = self.gates.clone();
        let guard = self.guard.clone();
        events
            .stopped
            .connect(move |()| *guard.borrow_mut() = Some(gates.step.hold()));
    }
}

/// Point operator answering only when the test says so.
#[derive(Clone, Default)]
pub struct ManualPoints {
    pub requests: Arc<Mutex<Vec<usize>>>,
    pub ready: Signal<f64>,
    pub depleted: Signal<()>,
}

impl PointOperator for ManualPoints {
    fn prepare_points(&mut self) -> PreparedPoints {
        let requests = self.requests.clone();
        PreparedPoints {
            request_point: Arc::new(move |step| requests.lock().unwrap().push(step)),
            point_ready: self.ready.clone(),
            point_depleted: self.depleted.clone(),
            points: None,
        }
    }
}

/// Scan operator that only reports ready when the test says so.
#[derive(Clone, Default)]
pub struct ManualScan {
    pub moves: Arc<Mutex<Vec<f64>>>,
    pub ready: Signal<()>,
}

impl ScanOperator for ManualScan {
    fn prepare_scan(&mut self) -> PreparedScan {
        let moves = self.moves.clone();
        PreparedScan {
            move_scan: Arc::new(move |point| moves.lock().unwrap().push(point)),
            scan_ready: self.ready.clone(),
        }
    }
}

/// Trigger operator that only fires when the test says so.
#[derive(Clone, Default)]
pub struct ManualTrigger {
    pub arms: Arc<Mutex<usize>>,
    pub fired: Signal<()>,
}

impl TriggerOperator for ManualTrigger {
    fn prepare_trigger(&mut self) -> PreparedTrigger {
        let arms = self.arms.clone();
        PreparedTrigger {
            arm_trigger: Arc::new(move |()| *arms.lock().unwrap() += 1),
            trigger_fired: self.fired.clone(),
        }
    }
}

/// Channel recording its lifecycle calls into a shared log.
pub struct RecordingChannel {
    name: String,
    inputs: Vec<String>,
    log: Rc<RefCell<Vec<String>>>,
}

impl RecordingChannel {
    pub fn shared(
        name: &str,
        inputs: &[&str],
        log: &Rc<RefCell<Vec<String>>>,
    ) -> Rc<RefCell<RecordingChannel>> {
        Rc::new(RefCell::new(Self {
            name: name.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            log: log.clone(),
        }))
    }

    fn record(&self, call: &str) {
        self.log.borrow_mut().push(format!("{}:{}", self.name, call));
    }
}

impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn depends_on(&self, other: &str) -> bool {
        self.inputs.iter().any(|input| input == other)
    }

    fn begin_scan(&mut self, scan_index: usize) {
        self.record(&format!("begin_scan {scan_index}"));
    }

    fn begin_step(&mut self, step_value: f64) {
        self.record(&format!("begin_step {step_value}"));
    }

    fn end_step(&mut self) {
        self.record("end_step");
    }

    fn end_scan(&mut self) {
        self.record("end_scan");
    }

    fn open_storage(&mut self, _base_path: &Path) {
        self.record("open_storage");
    }

    fn close_storage(&mut self) {
        self.record("close_storage");
    }

    fn add_marker(&mut self, text: &str) {
        self.record(&format!("marker {text}"));
    }

    fn reset(&mut self) {
        self.record("reset");
    }
}

/// Whether `status` appears after the first occurrence of `after`.
pub fn appears_after(statuses: &[Status], after: Status, status: Status) -> bool {
    statuses
        .iter()
        .skip_while(|s| **s != after)
        .any(|s| *s == status)
}

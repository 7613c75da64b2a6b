//! Scanset proxy: several point/scan operator pairs driven as one.
//!
//! Every combination of points is visited exactly once. The first pair varies
//! slowest, the last pair fastest. For each step only the scan operators whose point
//! changed are moved, and the step is ready once all of them report ready.
//!
//! The proxy reports the flat step index as its point value. If every inner point
//! operator supplies a fixed list, the proxy supplies `0..product` of their lengths.

use std::sync::{Arc, Mutex};

use super::operators::{PointOperator, PreparedPoints, PreparedScan, ScanOperator};
use super::signal::{Signal, Slot, SlotId};
use crate::gate::lock_unpoisoned;

#[derive(Default)]
struct ScansetState {
    requests: Vec<Slot<usize>>,
    moves: Vec<Slot<f64>>,
    point_set: Vec<Option<f64>>,
    in_steps: Vec<usize>,
    op_index: usize,
    out_step: usize,
    moving: usize,
    ready: usize,
}

enum Next {
    Request(Slot<usize>, usize),
    Ready(f64),
    Depleted,
}

impl ScansetState {
    fn request_current(&self) -> Next {
        match self.requests.get(self.op_index) {
            Some(request) => Next::Request(request.clone(), self.in_steps[self.op_index]),
            None => Next::Depleted,
        }
    }
}

struct Shared {
    state: Mutex<ScansetState>,
    point_ready: Signal<f64>,
    point_depleted: Signal<()>,
    scan_ready: Signal<()>,
}

impl Shared {
    // Inner operators may answer synchronously, so every call out happens unlocked.
    fn proceed(&self, next: Next) {
        match next {
            Next::Request(request, step) => request(step),
            Next::Ready(value) => self.point_ready.emit(value),
            Next::Depleted => self.point_depleted.emit(()),
        }
    }

    fn on_request(&self, step_index: usize) {
        let next = {
            let mut state = lock_unpoisoned(&self.state);
            if step_index == 0 {
                state.op_index = 0;
                state.in_steps.fill(0);
            }
            state.point_set.fill(None);
            state.out_step = step_index;
            state.request_current()
        };
        self.proceed(next);
    }

    fn on_inner_ready(&self, value: f64) {
        let next = {
            let mut state = lock_unpoisoned(&self.state);
            let index = state.op_index;
            state.point_set[index] = Some(value);
            state.in_steps[index] += 1;

            if index + 1 >= state.requests.len() {
                Next::Ready(state.out_step as f64)
            } else {
                state.op_index += 1;
                state.request_current()
            }
        };
        self.proceed(next);
    }

    fn on_inner_depleted(&self) {
        let next = {
            let mut state = lock_unpoisoned(&self.state);
            let index = state.op_index;
            state.in_steps[index] = 0;

            if index == 0 {
                Next::Depleted
            } else {
                state.op_index -= 1;
                state.request_current()
            }
        };
        self.proceed(next);
    }

    fn on_move(&self) {
        let moves: Vec<(Slot<f64>, f64)> = {
            let mut state = lock_unpoisoned(&self.state);
            let moves: Vec<_> = state
                .point_set
                .iter()
                .zip(&state.moves)
                .filter_map(|(point, slot)| point.map(|point| (slot.clone(), point)))
                .collect();
            state.moving = moves.len();
            state.ready = 0;
            moves
        };

        if moves.is_empty() {
            self.scan_ready.emit(());
        }
        for (slot, point) in moves {
            slot(point);
        }
    }

    fn on_inner_scan_ready(&self) {
        let complete = {
            let mut state = lock_unpoisoned(&self.state);
            state.ready += 1;
            state.ready == state.moving
        };
        if complete {
            self.scan_ready.emit(());
        }
    }
}

/// Point side of a scanset.
pub struct ScansetPoints {
    shared: Arc<Shared>,
    operators: Vec<Box<dyn PointOperator>>,
    connections: Vec<(Signal<f64>, SlotId, Signal<()>, SlotId)>,
}

/// Scan side of a scanset.
pub struct ScansetScan {
    shared: Arc<Shared>,
    operators: Vec<Box<dyn ScanOperator>>,
    connections: Vec<(Signal<()>, SlotId)>,
}

/// Combine point/scan pairs, outermost first, into one point and one scan operator.
pub fn scanset(
    pairs: Vec<(Box<dyn PointOperator>, Box<dyn ScanOperator>)>,
) -> (ScansetPoints, ScansetScan) {
    let count = pairs.len();
    let shared = Arc::new(Shared {
        state: Mutex::new(ScansetState {
            point_set: vec![None; count],
            in_steps: vec![0; count],
            ..ScansetState::default()
        }),
        point_ready: Signal::new(),
        point_depleted: Signal::new(),
        scan_ready: Signal::new(),
    });

    let (points, scans): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
    (
        ScansetPoints {
            shared: shared.clone(),
            operators: points,
            connections: Vec::new(),
        },
        ScansetScan {
            shared,
            operators: scans,
            connections: Vec::new(),
        },
    )
}

impl PointOperator for ScansetPoints {
    fn prepare_points(&mut self) -> PreparedPoints {
        let mut requests = Vec::with_capacity(self.operators.len());
        let mut total: Option<usize> = Some(1);

        for operator in &mut self.operators {
            let prepared = operator.prepare_points();

            let shared = self.shared.clone();
            let ready_id = prepared
                .point_ready
                .connect(move |value| shared.on_inner_ready(value));
            let shared = self.shared.clone();
            let depleted_id = prepared
                .point_depleted
                .connect(move |()| shared.on_inner_depleted());

            total = total.zip(prepared.points.as_ref()).map(|(n, p)| n * p.len());
            requests.push(prepared.request_point);
            self.connections.push((
                prepared.point_ready,
                ready_id,
                prepared.point_depleted,
                depleted_id,
            ));
        }

        lock_unpoisoned(&self.shared.state).requests = requests;

        let shared = self.shared.clone();
        PreparedPoints {
            request_point: Arc::new(move |step_index: usize| shared.on_request(step_index)),
            point_ready: self.shared.point_ready.clone(),
            point_depleted: self.shared.point_depleted.clone(),
            points: total.map(|n| (0..n).map(|i| i as f64).collect()),
        }
    }

    fn finalize_points(&mut self) {
        for (ready, ready_id, depleted, depleted_id) in self.connections.drain(..) {
            ready.disconnect(ready_id);
            depleted.disconnect(depleted_id);
        }
        lock_unpoisoned(&self.shared.state).requests.clear();
        for operator in &mut self.operators {
            operator.finalize_points();
        }
    }
}

impl ScanOperator for ScansetScan {
    fn prepare_scan(&mut self) -> PreparedScan {
        let mut moves = Vec::with_capacity(self.operators.len());
        for operator in &mut self.operators {
            let prepared = operator.prepare_scan();
            let shared = self.shared.clone();
            let id = prepared
                .scan_ready
                .connect(move |()| shared.on_inner_scan_ready());
            moves.push(prepared.move_scan);
            self.connections.push((prepared.scan_ready, id));
        }

        lock_unpoisoned(&self.shared.state).moves = moves;

        let shared = self.shared.clone();
        PreparedScan {
            move_scan: Arc::new(move |_point: f64| shared.on_move()),
            scan_ready: self.shared.scan_ready.clone(),
        }
    }

    fn finalize_scan(&mut self) {
        for (ready, id) in self.connections.drain(..) {
            ready.disconnect(id);
        }
        lock_unpoisoned(&self.shared.state).moves.clear();
        for operator in &mut self.operators {
            operator.finalize_scan();
        }
    }
}

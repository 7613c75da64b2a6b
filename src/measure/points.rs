//! Point operators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::operators::{PointOperator, PreparedPoints};
use super::signal::Signal;

/// Visits a predefined list of points in order.
#[derive(Debug)]
pub struct FixedPoints {
    points: Arc<[f64]>,
    ready: Signal<f64>,
    depleted: Signal<()>,
}

impl FixedPoints {
    /// Visit `points` in order, then report depletion.
    pub fn new(points: impl Into<Vec<f64>>) -> Self {
        Self {
            points: points.into().into(),
            ready: Signal::new(),
            depleted: Signal::new(),
        }
    }

    /// `steps` evenly spaced points from `start` to `stop`, both included.
    ///
    /// A single step yields just `start`.
    pub fn linear(start: f64, stop: f64, steps: usize) -> Self {
        let points: Vec<f64> = match steps {
            0 => Vec::new(),
            1 => vec![start],
            _ => {
                let increment = (stop - start) / (steps - 1) as f64;
                (0..steps).map(|i| start + increment * i as f64).collect()
            }
        };
        Self::new(points)
    }

    /// The configured points.
    pub fn points(&self) -> &[f64] {
        &self.points
    }
}

impl PointOperator for FixedPoints {
    fn prepare_points(&mut self) -> PreparedPoints {
        let points = self.points.clone();
        let ready = self.ready.clone();
        let depleted = self.depleted.clone();

        PreparedPoints {
            request_point: Arc::new(move |step_index: usize| match points.get(step_index) {
                Some(value) => ready.emit(*value),
                None => depleted.emit(()),
            }),
            point_ready: self.ready.clone(),
            point_depleted: self.depleted.clone(),
            points: Some(self.points.to_vec()),
        }
    }
}

/// Emits the step index as point and never runs out.
#[derive(Debug, Default)]
pub struct InfinitePoints {
    ready: Signal<f64>,
    depleted: Signal<()>,
}

impl InfinitePoints {
    /// Create the operator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PointOperator for InfinitePoints {
    fn prepare_points(&mut self) -> PreparedPoints {
        let ready = self.ready.clone();
        PreparedPoints {
            request_point: Arc::new(move |step_index: usize| ready.emit(step_index as f64)),
            point_ready: self.ready.clone(),
            point_depleted: self.depleted.clone(),
            points: None,
        }
    }
}

/// Emits the step index as point for a step count that grows at runtime.
///
/// Starts with one step. The measurement adds a step whenever the limit is skipped,
/// which is how an interactive "next step" control extends an open-ended run.
#[derive(Debug)]
pub struct ExtendablePoints {
    steps: Arc<AtomicUsize>,
    served: Arc<AtomicUsize>,
    ready: Signal<f64>,
    depleted: Signal<()>,
}

impl Default for ExtendablePoints {
    fn default() -> Self {
        Self {
            steps: Arc::new(AtomicUsize::new(1)),
            served: Arc::new(AtomicUsize::new(0)),
            ready: Signal::new(),
            depleted: Signal::new(),
        }
    }
}

impl ExtendablePoints {
    /// Create the operator with a single step.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow one more step.
    pub fn add_step(&self) {
        self.steps.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of steps currently allowed.
    pub fn step_count(&self) -> usize {
        self.steps.load(Ordering::SeqCst)
    }
}

impl PointOperator for ExtendablePoints {
    fn prepare_points(&mut self) -> PreparedPoints {
        self.served.store(0, Ordering::SeqCst);

        let steps = self.steps.clone();
        let served = self.served.clone();
        let ready = self.ready.clone();
        let depleted = self.depleted.clone();

        PreparedPoints {
            request_point: Arc::new(move |step_index: usize| {
                // Every request counts, including the one reporting depletion.
                let previously = served.fetch_add(1, Ordering::SeqCst);
                if previously >= steps.load(Ordering::SeqCst) {
                    depleted.emit(());
                } else {
                    ready.emit(step_index as f64);
                }
            }),
            point_ready: self.ready.clone(),
            point_depleted: self.depleted.clone(),
            points: None,
        }
    }

    fn extend_points(&mut self) -> bool {
        self.add_step();
        true
    }
}

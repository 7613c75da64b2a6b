//! Operator protocols.
//!
//! Each of the five operator roles follows the same contract: `prepare_*` hands the
//! measurement an action handle ([`Slot`]) plus the completion signals it listens to,
//! and `finalize_*` releases whatever the operator set up. The measurement invokes an
//! action at most once per cycle and expects exactly one completion in return.
//!
//! Completion signals may be emitted from any thread, including synchronously from
//! within the action handle itself.

use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::error;

use super::signal::{Signal, Slot};
use super::status::Status;

/// Returned by [`PointOperator::prepare_points`].
pub struct PreparedPoints {
    /// Request the point for a step index.
    pub request_point: Slot<usize>,
    /// Emitted with the point value for the requested step.
    pub point_ready: Signal<f64>,
    /// Emitted instead of `point_ready` when no point is left for this scan.
    pub point_depleted: Signal<()>,
    /// Every point of a scan, if known up front.
    pub points: Option<Vec<f64>>,
}

/// Returned by [`ScanOperator::prepare_scan`].
pub struct PreparedScan {
    /// Move to a point.
    pub move_scan: Slot<f64>,
    /// Emitted once the move has completed.
    pub scan_ready: Signal<()>,
}

/// Returned by [`TriggerOperator::prepare_trigger`].
pub struct PreparedTrigger {
    /// Arm the trigger.
    pub arm_trigger: Slot<()>,
    /// Emitted when acquisition may begin.
    pub trigger_fired: Signal<()>,
}

/// Returned by [`LimitOperator::prepare_limit`].
pub struct PreparedLimit {
    /// Begin counting towards the limit.
    pub start_limit: Slot<()>,
    /// Emitted when acquisition should end.
    pub limit_reached: Signal<()>,
    /// Optional progress updates, bounded by `limit_max`.
    pub limit_updated: Option<Signal<u64>>,
    /// Maximum progress value, 0 if unknown.
    pub limit_max: u64,
}

/// Returned by [`StatusOperator::prepare_status`].
pub struct PreparedStatus {
    /// Receives every status change.
    pub update_status: Slot<Status>,
    /// Receives limit progress.
    pub update_limit: Slot<u64>,
}

/// Chooses the point of every step.
pub trait PointOperator {
    /// Wire up for a run.
    fn prepare_points(&mut self) -> PreparedPoints;

    /// Release run resources.
    fn finalize_points(&mut self) {}

    /// Grow the point source by one step, if it supports that.
    ///
    /// Called when the limit is skipped. Returns whether a step was added.
    fn extend_points(&mut self) -> bool {
        false
    }
}

/// Moves the setup to a point.
pub trait ScanOperator {
    /// Wire up for a run.
    fn prepare_scan(&mut self) -> PreparedScan;

    /// Release run resources.
    fn finalize_scan(&mut self) {}
}

/// Decides when acquisition of a step begins.
pub trait TriggerOperator {
    /// Wire up for a run.
    fn prepare_trigger(&mut self) -> PreparedTrigger;

    /// Release run resources.
    fn finalize_trigger(&mut self) {}
}

/// Decides when acquisition of a step ends.
pub trait LimitOperator {
    /// Wire up for a run.
    fn prepare_limit(&mut self) -> PreparedLimit;

    /// Release run resources.
    fn finalize_limit(&mut self) {}
}

/// Reports progress.
pub trait StatusOperator {
    /// Wire up for a run. `limit_max` is the limit operator's maximum.
    fn prepare_status(&mut self, limit_max: u64) -> PreparedStatus;

    /// Called once the run is back in standby.
    fn finalize_status(&mut self) {}
}

impl<T: PointOperator + ?Sized> PointOperator for Box<T> {
    fn prepare_points(&mut self) -> PreparedPoints {
        (**self).prepare_points()
    }

    fn finalize_points(&mut self) {
        (**self).finalize_points();
    }

    fn extend_points(&mut self) -> bool {
        (**self).extend_points()
    }
}

impl<T: ScanOperator + ?Sized> ScanOperator for Box<T> {
    fn prepare_scan(&mut self) -> PreparedScan {
        (**self).prepare_scan()
    }

    fn finalize_scan(&mut self) {
        (**self).finalize_scan();
    }
}

impl<T: TriggerOperator + ?Sized> TriggerOperator for Box<T> {
    fn prepare_trigger(&mut self) -> PreparedTrigger {
        (**self).prepare_trigger()
    }

    fn finalize_trigger(&mut self) {
        (**self).finalize_trigger();
    }
}

impl<T: LimitOperator + ?Sized> LimitOperator for Box<T> {
    fn prepare_limit(&mut self) -> PreparedLimit {
        (**self).prepare_limit()
    }

    fn finalize_limit(&mut self) {
        (**self).finalize_limit();
    }
}

impl<T: StatusOperator + ?Sized> StatusOperator for Box<T> {
    fn prepare_status(&mut self, limit_max: u64) -> PreparedStatus {
        (**self).prepare_status(limit_max)
    }

    fn finalize_status(&mut self) {
        (**self).finalize_status();
    }
}

/// Spawn a timer future on the ambient tokio runtime.
///
/// Without a runtime the timer cannot run; the failure is logged and `None` returned.
pub(crate) fn spawn_timer<F>(operator: &'static str, future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(err) => {
            error!(operator, error = %err, "no tokio runtime, timer not started");
            None
        }
    }
}

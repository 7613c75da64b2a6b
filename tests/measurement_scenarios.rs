//! Measurement state machine scenarios, driven synchronously through `dispatch_pending`.

mod common;

use std::cell::RefCell;
use std::fs;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{
    appears_after, CountingNode, GateHolder, ManualPoints, ManualScan, ManualTrigger,
    RecordingChannel, StatusLog,
};
use measure_daq::channel::{ChannelOptions, ChannelRef, ChannelRegistry, StreamChannel, StreamFile};
use measure_daq::error::DaqError;
use measure_daq::gate::Gates;
use measure_daq::measure::{
    CountLimit, ExtendablePoints, FixedPoints, ImmediateLimit, ManualLimit, MeasurementBuilder,
    Node, NodeEvents, PointOperator, PreparedPoints, Signal, Status,
};

fn has_marker(text: &str, marker: &str) -> bool {
    let suffix = format!(" - {marker}");
    text.lines().any(|line| line.starts_with("# ") && line.ends_with(&suffix))
}

#[test]
fn two_points_two_scans_visit_four_steps() {
    let log = StatusLog::default();
    let node = Rc::new(CountingNode::default());

    let mut m = MeasurementBuilder::new(Gates::new())
        .scan_count(2)
        .node(node.clone())
        .point_operator(FixedPoints::new(vec![0.25, 0.75]))
        .limit_operator(ImmediateLimit::new())
        .status_operator(log.clone())
        .build()
        .unwrap();

    m.run().unwrap();
    m.dispatch_pending();

    assert!(m.is_finished());
    assert_eq!(m.status(), Status::Standby);
    assert_eq!(log.count(Status::EnteringStep), 4);
    assert_eq!(log.count(Status::EnteringScan), 2);
    assert_eq!(log.count(Status::Running), 4);
    assert_eq!(log.statuses().last(), Some(&Status::Standby));
    assert_eq!(*log.finalized.lock().unwrap(), 1);

    assert_eq!(node.count("prepared"), 1);
    assert_eq!(node.count("started"), 4);
    assert_eq!(node.count("stopped"), 4);
    assert_eq!(node.count("finalized"), 1);

    assert_eq!(m.current_scan(), Some(1));
    assert_eq!(m.points(), [0.25, 0.75]);
}

#[test]
fn abort_while_running_skips_the_limit_and_never_reconfigures() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("run");
    let registry = ChannelRegistry::new();
    registry.open("det", ChannelOptions::default()).unwrap();
    let log = StatusLog::default();

    let mut m = MeasurementBuilder::new(Gates::new())
        .storage_base(base.clone())
        .channels(registry.shared())
        .point_operator(FixedPoints::new(vec![0.0, 1.0, 2.0]))
        .limit_operator(ManualLimit::new())
        .status_operator(log.clone())
        .build()
        .unwrap();

    m.run().unwrap();
    m.dispatch_pending();
    assert_eq!(m.status(), Status::Running);
    let before = log.statuses().len();

    m.abort();
    assert!(m.is_aborting());
    m.dispatch_pending();

    assert!(m.is_finished());
    let after = log.statuses()[before..].to_vec();
    assert!(!after.contains(&Status::Configuring));
    assert!(after.contains(&Status::Finalizing));
    assert_eq!(after.last(), Some(&Status::Standby));
    assert_eq!(m.current_step(), Some(0));

    let text = fs::read_to_string(StreamFile::path_for(&base, "det")).unwrap();
    assert!(has_marker(&text, "SKIPPED"));
    assert!(has_marker(&text, "ABORTED"));
}

#[test]
fn held_run_gate_rejects_a_second_measurement() {
    let gates = Gates::new();
    let build = || {
        MeasurementBuilder::new(gates.clone())
            .point_operator(FixedPoints::new(vec![1.0]))
            .limit_operator(ManualLimit::new())
            .build()
            .unwrap()
    };

    let mut first = build();
    let mut second = build();
    first.run().unwrap();

    assert!(matches!(second.run(), Err(DaqError::RunBlockAcquired)));
    assert_eq!(second.status(), Status::Standby);

    first.abort();
    first.dispatch_pending();
    assert!(first.is_finished());
    assert!(!gates.run.is_acquired());

    second.run().unwrap();
    assert!(gates.run.is_acquired());
}

#[test]
fn pause_before_the_first_step_and_resume() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("paused");
    let registry = ChannelRegistry::new();
    registry.open("det", ChannelOptions::default()).unwrap();

    let mut m = MeasurementBuilder::new(Gates::new())
        .storage_base(base.clone())
        .channels(registry.shared())
        .point_operator(FixedPoints::new(vec![1.0, 2.0]))
        .limit_operator(ImmediateLimit::new())
        .build()
        .unwrap();

    m.set_pause_flag(true);
    m.run().unwrap();
    m.dispatch_pending();
    assert_eq!(m.status(), Status::Paused);
    assert_eq!(m.current_step(), None);

    // Nothing moves while paused.
    assert_eq!(m.dispatch_pending(), 0);

    m.resume().unwrap();
    m.dispatch_pending();
    assert!(m.is_finished());

    let text = fs::read_to_string(StreamFile::path_for(&base, "det")).unwrap();
    assert!(has_marker(&text, "PAUSED"));
    assert!(has_marker(&text, "RESUMED"));
    assert!(!has_marker(&text, "ABORTED"));
}

#[test]
fn abort_while_paused_finalizes() {
    let log = StatusLog::default();
    let node = Rc::new(CountingNode::default());
    let limit = ManualLimit::new();
    let reacher = limit.reacher();

    let mut m = MeasurementBuilder::new(Gates::new())
        .node(node.clone())
        .point_operator(FixedPoints::new(vec![1.0, 2.0, 3.0]))
        .limit_operator(limit)
        .status_operator(log.clone())
        .build()
        .unwrap();

    m.run().unwrap();
    m.dispatch_pending();
    m.set_pause_flag(true);
    reacher.emit(());
    m.dispatch_pending();
    assert_eq!(m.status(), Status::Paused);
    assert_eq!(m.current_step(), Some(0));

    m.abort();
    assert!(!m.is_pausing());
    m.dispatch_pending();

    assert!(m.is_finished());
    assert_eq!(node.count("finalized"), 1);
    assert_eq!(node.count("started"), 1);
    assert!(appears_after(&log.statuses(), Status::Paused, Status::Finalizing));
}

#[test]
fn skip_limit_extends_open_ended_points() {
    let mut m = MeasurementBuilder::new(Gates::new())
        .point_operator(ExtendablePoints::new())
        .limit_operator(ManualLimit::new())
        .build()
        .unwrap();

    m.run().unwrap();
    m.dispatch_pending();
    assert_eq!(m.status(), Status::Running);
    assert_eq!(m.current_step(), Some(0));

    m.skip_limit();
    m.dispatch_pending();
    assert_eq!(m.status(), Status::Running);
    assert_eq!(m.current_step(), Some(1));
    assert_eq!(m.points(), [0.0, 1.0]);

    m.abort();
    m.dispatch_pending();
    assert!(m.is_finished());
}

#[test]
fn skip_limit_outside_running_is_ignored() {
    let mut m = MeasurementBuilder::new(Gates::new())
        .point_operator(FixedPoints::new(vec![1.0]))
        .limit_operator(ManualLimit::new())
        .build()
        .unwrap();

    m.run().unwrap();
    m.skip_limit();
    assert_eq!(m.status(), Status::Preparing);
    m.dispatch_pending();
    assert_eq!(m.status(), Status::Running);
}

#[test]
fn step_gate_delays_every_step_boundary() {
    let gates = Gates::new();
    let holder = Rc::new(GateHolder::new(&gates));

    let mut m = MeasurementBuilder::new(gates.clone())
        .node(holder.clone())
        .point_operator(FixedPoints::new(vec![1.0, 2.0]))
        .limit_operator(ImmediateLimit::new())
        .build()
        .unwrap();

    m.run().unwrap();
    m.dispatch_pending();
    assert_eq!(m.status(), Status::LeavingStep);
    assert_eq!(m.current_step(), Some(0));
    assert_eq!(m.dispatch_pending(), 0);

    holder.release();
    m.dispatch_pending();
    assert_eq!(m.status(), Status::LeavingStep);
    assert_eq!(m.current_step(), Some(1));

    holder.release();
    m.dispatch_pending();
    assert!(m.is_finished());
}

#[test]
fn abort_while_preparing_never_enters_a_scan() {
    let log = StatusLog::default();
    let node = Rc::new(CountingNode::default());
    let mut m = MeasurementBuilder::new(Gates::new())
        .node(node.clone())
        .point_operator(FixedPoints::new(vec![1.0]))
        .limit_operator(ImmediateLimit::new())
        .status_operator(log.clone())
        .build()
        .unwrap();

    m.run().unwrap();
    m.abort();
    m.dispatch_pending();

    assert!(m.is_finished());
    assert!(!log.statuses().contains(&Status::EnteringScan));
    assert_eq!(node.count("started"), 0);
    assert_eq!(node.count("finalized"), 1);
}

#[test]
fn abort_while_waiting_for_a_point() {
    let points = ManualPoints::default();
    let log = StatusLog::default();
    let mut m = MeasurementBuilder::new(Gates::new())
        .point_operator(points.clone())
        .limit_operator(ImmediateLimit::new())
        .status_operator(log.clone())
        .build()
        .unwrap();

    m.run().unwrap();
    m.dispatch_pending();
    assert_eq!(m.status(), Status::EnteringStep);
    assert_eq!(*points.requests.lock().unwrap(), [0]);

    m.abort();
    m.dispatch_pending();
    assert!(m.is_finished());

    // A late answer finds nobody listening.
    points.ready.emit(5.0);
    assert_eq!(m.dispatch_pending(), 0);
    assert!(!log.statuses().contains(&Status::Configuring));
    assert!(m.points().is_empty());
}

#[test]
fn depletion_ends_each_scan() {
    let points = ManualPoints::default();
    let log = StatusLog::default();
    let mut m = MeasurementBuilder::new(Gates::new())
        .scan_count(2)
        .point_operator(points.clone())
        .limit_operator(ImmediateLimit::new())
        .status_operator(log.clone())
        .build()
        .unwrap();

    m.run().unwrap();
    m.dispatch_pending();
    points.ready.emit(3.0);
    m.dispatch_pending();
    points.depleted.emit(());
    m.dispatch_pending();
    assert_eq!(m.current_scan(), Some(1));
    assert_eq!(m.status(), Status::EnteringStep);

    points.depleted.emit(());
    m.dispatch_pending();
    assert!(m.is_finished());
    assert_eq!(*points.requests.lock().unwrap(), [0, 1, 0]);
    assert_eq!(log.count(Status::LeavingScan), 2);
    assert_eq!(m.points(), [3.0]);
}

#[test]
fn channels_are_driven_in_dependency_order() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let derived = RecordingChannel::shared("b", &["a"], &calls);
    let source = RecordingChannel::shared("a", &[], &calls);

    let mut m = MeasurementBuilder::new(Gates::new())
        .storage_base("unused")
        .channel(derived)
        .channel(source)
        .point_operator(FixedPoints::new(vec![0.5]))
        .limit_operator(ImmediateLimit::new())
        .build()
        .unwrap();

    m.run().unwrap();
    m.dispatch_pending();
    assert!(m.is_finished());

    let expected = [
        "a:reset",
        "b:reset",
        "a:open_storage",
        "b:open_storage",
        "a:begin_scan 0",
        "b:begin_scan 0",
        "a:begin_step 0.5",
        "b:begin_step 0.5",
        "a:end_step",
        "b:end_step",
        "a:end_scan",
        "b:end_scan",
        "a:close_storage",
        "b:close_storage",
    ];
    assert_eq!(*calls.borrow(), expected);
}

#[test]
fn circular_channels_are_rejected_and_static_ones_skipped() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let cyclic = MeasurementBuilder::new(Gates::new())
        .channel(RecordingChannel::shared("a", &["b"], &calls))
        .channel(RecordingChannel::shared("b", &["a"], &calls))
        .point_operator(FixedPoints::new(vec![1.0]))
        .limit_operator(ImmediateLimit::new())
        .build();
    assert!(matches!(cyclic, Err(DaqError::CircularDependency)));

    let fixed = StreamChannel::shared("calibration", ChannelOptions::default().with_static(true));
    let live = StreamChannel::shared("det", ChannelOptions::default());
    let m = MeasurementBuilder::new(Gates::new())
        .channel(fixed)
        .channel(live)
        .point_operator(FixedPoints::new(vec![1.0]))
        .limit_operator(ImmediateLimit::new())
        .build()
        .unwrap();
    assert_eq!(m.channels().len(), 1);
    assert_eq!(m.channels()[0].borrow().name(), "det");
}

/// Adds a fixed number of samples to a channel at every start.
struct BurstNode {
    channel: ChannelRef,
    samples: usize,
}

impl Node for BurstNode {
    fn connect_to_measurement(&self, events: &NodeEvents) {
        let channel = self.channel.clone();
        let samples = self.samples;
        events.started.connect(move |()| {
            for i in 0..samples {
                channel.borrow_mut().add_data(i as f64);
            }
        });
    }
}

#[test]
fn count_limit_reports_progress_to_the_status_operator() {
    let det = StreamChannel::shared("det", ChannelOptions::default());
    let log = StatusLog::default();

    let mut m = MeasurementBuilder::new(Gates::new())
        .channel(det.clone())
        .node(Rc::new(BurstNode {
            channel: det.clone(),
            samples: 3,
        }))
        .point_operator(FixedPoints::new(vec![1.0, 2.0]))
        .limit_operator(CountLimit::new(det.clone(), 3))
        .status_operator(log.clone())
        .build()
        .unwrap();

    m.run().unwrap();
    m.dispatch_pending();

    assert!(m.is_finished());
    assert_eq!(*log.progress.lock().unwrap(), [1, 2, 3, 1, 2, 3]);
    assert_eq!(det.borrow().step_count(), 2);
}

/// Answers two points per scan, numbered on from 100, without a fixed list.
#[derive(Default)]
struct NumberedPoints {
    served: Arc<AtomicUsize>,
    ready: Signal<f64>,
    depleted: Signal<()>,
}

impl PointOperator for NumberedPoints {
    fn prepare_points(&mut self) -> PreparedPoints {
        let served = self.served.clone();
        let ready = self.ready.clone();
        let depleted = self.depleted.clone();
        PreparedPoints {
            request_point: Arc::new(move |step| {
                if step < 2 {
                    let n = served.fetch_add(1, Ordering::SeqCst);
                    ready.emit(100.0 + n as f64);
                } else {
                    depleted.emit(());
                }
            }),
            point_ready: self.ready.clone(),
            point_depleted: self.depleted.clone(),
            points: None,
        }
    }
}

#[test]
fn generated_points_accumulate_across_scans() {
    let mut m = MeasurementBuilder::new(Gates::new())
        .scan_count(2)
        .point_operator(NumberedPoints::default())
        .limit_operator(ImmediateLimit::new())
        .build()
        .unwrap();

    m.run().unwrap();
    m.dispatch_pending();

    assert!(m.is_finished());
    assert_eq!(m.points(), [100.0, 101.0, 102.0, 103.0]);
}

#[test]
fn abort_while_configuring_drops_the_late_move() {
    let scan = ManualScan::default();
    let log = StatusLog::default();
    let mut m = MeasurementBuilder::new(Gates::new())
        .point_operator(FixedPoints::new(vec![1.0, 2.0]))
        .scan_operator(scan.clone())
        .limit_operator(ImmediateLimit::new())
        .status_operator(log.clone())
        .build()
        .unwrap();

    m.run().unwrap();
    m.dispatch_pending();
    assert_eq!(m.status(), Status::Configuring);
    assert_eq!(*scan.moves.lock().unwrap(), [1.0]);

    m.abort();
    m.dispatch_pending();
    assert!(m.is_finished());

    scan.ready.emit(());
    assert_eq!(m.dispatch_pending(), 0);
    assert!(!log.statuses().contains(&Status::TriggerArmed));
    assert!(appears_after(&log.statuses(), Status::Configuring, Status::LeavingScan));
    assert_eq!(log.statuses().last(), Some(&Status::Standby));
}

#[test]
fn abort_while_trigger_armed_drops_the_late_trigger() {
    let trigger = ManualTrigger::default();
    let node = Rc::new(CountingNode::default());
    let log = StatusLog::default();
    let mut m = MeasurementBuilder::new(Gates::new())
        .node(node.clone())
        .point_operator(FixedPoints::new(vec![1.0, 2.0]))
        .trigger_operator(trigger.clone())
        .limit_operator(ImmediateLimit::new())
        .status_operator(log.clone())
        .build()
        .unwrap();

    m.run().unwrap();
    m.dispatch_pending();
    assert_eq!(m.status(), Status::TriggerArmed);
    assert_eq!(*trigger.arms.lock().unwrap(), 1);

    m.abort();
    m.dispatch_pending();
    assert!(m.is_finished());

    trigger.fired.emit(());
    assert_eq!(m.dispatch_pending(), 0);
    assert!(!log.statuses().contains(&Status::Running));
    assert!(appears_after(&log.statuses(), Status::TriggerArmed, Status::LeavingScan));
    assert_eq!(node.count("started"), 0);
    assert_eq!(node.count("finalized"), 1);
}

#[test]
fn abort_while_leaving_a_step_unwinds_once_the_gate_drains() {
    let gates = Gates::new();
    let holder = Rc::new(GateHolder::new(&gates));
    let log = StatusLog::default();
    let mut m = MeasurementBuilder::new(gates.clone())
        .node(holder.clone())
        .point_operator(FixedPoints::new(vec![1.0, 2.0, 3.0]))
        .limit_operator(ImmediateLimit::new())
        .status_operator(log.clone())
        .build()
        .unwrap();

    m.run().unwrap();
    m.dispatch_pending();
    assert_eq!(m.status(), Status::LeavingStep);

    m.abort();
    assert!(m.is_aborting());
    assert_eq!(m.status(), Status::LeavingStep);
    assert_eq!(m.dispatch_pending(), 0);
    assert!(!m.is_finished());

    holder.release();
    m.dispatch_pending();
    assert!(m.is_finished());
    assert_eq!(log.count(Status::Running), 1);
    assert_eq!(log.count(Status::EnteringStep), 1);
    assert_eq!(m.current_step(), Some(0));
}

#[test]
fn pause_requested_during_the_last_step_still_pauses() {
    let limit = ManualLimit::new();
    let reacher = limit.reacher();
    let log = StatusLog::default();
    let mut m = MeasurementBuilder::new(Gates::new())
        .point_operator(FixedPoints::new(vec![1.0]))
        .limit_operator(limit)
        .status_operator(log.clone())
        .build()
        .unwrap();

    m.run().unwrap();
    m.dispatch_pending();
    assert_eq!(m.status(), Status::Running);

    m.set_pause_flag(true);
    reacher.emit(());
    m.dispatch_pending();
    assert_eq!(m.status(), Status::Paused);
    assert!(!m.is_finished());

    m.resume().unwrap();
    m.dispatch_pending();
    assert!(m.is_finished());
    assert_eq!(log.count(Status::Running), 1);
    assert!(appears_after(&log.statuses(), Status::Paused, Status::LeavingScan));
}

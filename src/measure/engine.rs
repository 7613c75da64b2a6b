//! The measurement orchestrator.
//!
//! A [`Measurement`] drives one run: it steps the point operator through every step of
//! `scan_count` scan iterations, moves the scan operator, waits for the trigger and the
//! limit, and calls the channel lifecycle in dependency order at every boundary.
//!
//! # Execution model
//!
//! All phases run on the thread that owns the measurement. Operators may complete
//! from any thread; their completion signals are forwarded into an unbounded event
//! queue, and each queued event runs exactly one phase. No phase ever runs inside
//! another one, so an operator that completes synchronously from within its action
//! handle is still handled in order.
//!
//! The measurement suspends in three places where external parties may hold the step
//! gate (after *prepared*, after *stopped* and after *finalized*) and in the paused
//! state, which only [`Measurement::resume`] leaves. [`Measurement::drive`] sleeps on
//! the event queue and on the step gate's release edge, never polling.
//!
//! ```text
//! run() ──prepared──> [step gate] ─> begin_scan ─> begin_step ─> request_point
//!   point_ready ─> move_scan ─> scan_ready ─> arm_trigger ─> trigger_fired
//!   ─> start_limit + started ─> limit_reached ─> stopped ─> [step gate] ─> end_step
//!   ... end_scan ─> finalized ─> [step gate] ─> standby
//! ```
//!
//! # Example
//!
//! ```no_run
//! use measure_daq::gate::Gates;
//! use measure_daq::measure::{FixedPoints, ImmediateLimit, MeasurementBuilder};
//!
//! # async fn demo() -> measure_daq::error::AppResult<()> {
//! let mut measurement = MeasurementBuilder::new(Gates::new())
//!     .scan_count(2)
//!     .point_operator(FixedPoints::new(vec![0.0, 0.5, 1.0]))
//!     .limit_operator(ImmediateLimit::new())
//!     .build()?;
//!
//! measurement.execute().await?;
//! assert!(measurement.is_finished());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::rc::Rc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::actuators::{ImmediateTrigger, VirtualScan};
use super::operators::{
    LimitOperator, PointOperator, PreparedLimit, PreparedPoints, PreparedScan, PreparedStatus,
    PreparedTrigger, ScanOperator, StatusOperator, TriggerOperator,
};
use super::reporting::HiddenStatus;
use super::signal::{LocalSignal, Signal, SlotId};
use super::status::Status;
use crate::channel::{sort_channels, SharedChannel};
use crate::error::{AppResult, DaqError};
use crate::gate::Gates;

/// Events a node can connect to.
#[derive(Debug, Default)]
pub struct NodeEvents {
    /// The run is prepared. Hold the step gate to delay the first scan.
    pub prepared: LocalSignal<()>,
    /// Acquisition for a step begins.
    pub started: LocalSignal<()>,
    /// Acquisition for a step ended. Hold the step gate to delay the step boundary.
    pub stopped: LocalSignal<()>,
    /// The run is over. Hold the step gate to delay the return to standby.
    pub finalized: LocalSignal<()>,
}

/// A participant of a measurement, typically a device.
pub trait Node {
    /// Connect to the events of a starting run.
    fn connect_to_measurement(&self, events: &NodeEvents);
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Control {
    Abort,
    SetPause(bool),
    Resume,
    SkipLimit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Event {
    PointReady(f64),
    PointDepleted,
    ScanReady,
    TriggerFired,
    LimitReached,
    Control(Control),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateWait {
    AfterPrepared,
    AfterStopped,
    AfterFinalized,
}

struct Connection<T> {
    signal: Signal<T>,
    id: Option<SlotId>,
}

impl<T: Clone + Send + 'static> Connection<T> {
    fn forward(signal: &Signal<T>, events: &mpsc::UnboundedSender<Event>, make: fn(T) -> Event) -> Self {
        let events = events.clone();
        let id = signal.connect(move |value| {
            // The receiver only goes away with the measurement itself.
            let _ = events.send(make(value));
        });
        Self {
            signal: signal.clone(),
            id: Some(id),
        }
    }

    fn is_connected(&self) -> bool {
        self.id.is_some()
    }

    fn disconnect(&mut self) {
        if let Some(id) = self.id.take() {
            self.signal.disconnect(id);
        }
    }
}

struct Wiring {
    points: PreparedPoints,
    scan: PreparedScan,
    trigger: PreparedTrigger,
    limit: PreparedLimit,
    status: PreparedStatus,
    point_ready: Connection<f64>,
    point_depleted: Connection<()>,
    scan_ready: Connection<()>,
    trigger_fired: Connection<()>,
    limit_reached: Connection<()>,
    limit_updated: Option<Connection<u64>>,
}

impl Wiring {
    fn accepts(&self, event: Event) -> bool {
        match event {
            Event::PointReady(_) => self.point_ready.is_connected(),
            Event::PointDepleted => self.point_depleted.is_connected(),
            Event::ScanReady => self.scan_ready.is_connected(),
            Event::TriggerFired => self.trigger_fired.is_connected(),
            Event::LimitReached => self.limit_reached.is_connected(),
            Event::Control(_) => true,
        }
    }

    fn disconnect_all(&mut self) {
        self.point_ready.disconnect();
        self.point_depleted.disconnect();
        self.scan_ready.disconnect();
        self.trigger_fired.disconnect();
        self.limit_reached.disconnect();
        if let Some(updated) = &mut self.limit_updated {
            updated.disconnect();
        }
    }
}

/// Status in which an operator completion is expected.
fn expected_status(event: Event) -> Option<Status> {
    match event {
        Event::PointReady(_) | Event::PointDepleted => Some(Status::EnteringStep),
        Event::ScanReady => Some(Status::Configuring),
        Event::TriggerFired => Some(Status::TriggerArmed),
        Event::LimitReached => Some(Status::Running),
        Event::Control(_) => None,
    }
}

/// Sends control requests to a measurement from any thread or task.
///
/// Requests are queued and applied by the measurement's event loop.
#[derive(Debug, Clone)]
pub struct MeasurementHandle {
    events: mpsc::UnboundedSender<Event>,
}

impl MeasurementHandle {
    fn send(&self, control: Control) {
        if self.events.send(Event::Control(control)).is_err() {
            debug!(?control, "measurement is gone, control request dropped");
        }
    }

    /// Request an abort.
    pub fn abort(&self) {
        self.send(Control::Abort);
    }

    /// Set or clear the pause flag.
    pub fn set_pause_flag(&self, flag: bool) {
        self.send(Control::SetPause(flag));
    }

    /// Resume a paused measurement.
    pub fn resume(&self) {
        self.send(Control::Resume);
    }

    /// Skip the limit of the running step.
    pub fn skip_limit(&self) {
        self.send(Control::SkipLimit);
    }

    /// Whether the measurement has been dropped.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// Builds a [`Measurement`].
///
/// Point and limit operators are required. Scan, trigger and status default to
/// [`VirtualScan`], [`ImmediateTrigger`] and [`HiddenStatus`].
pub struct MeasurementBuilder {
    gates: Gates,
    scan_count: usize,
    storage_base: Option<PathBuf>,
    nodes: Vec<Rc<dyn Node>>,
    channels: Vec<SharedChannel>,
    point: Option<Box<dyn PointOperator>>,
    scan: Option<Box<dyn ScanOperator>>,
    trigger: Option<Box<dyn TriggerOperator>>,
    limit: Option<Box<dyn LimitOperator>>,
    status: Option<Box<dyn StatusOperator>>,
}

impl MeasurementBuilder {
    /// Start a builder coordinating on `gates`.
    pub fn new(gates: Gates) -> Self {
        Self {
            gates,
            scan_count: 1,
            storage_base: None,
            nodes: Vec::new(),
            channels: Vec::new(),
            point: None,
            scan: None,
            trigger: None,
            limit: None,
            status: None,
        }
    }

    /// Number of scan iterations. Defaults to 1.
    pub fn scan_count(mut self, scan_count: usize) -> Self {
        self.scan_count = scan_count;
        self
    }

    /// Stream channel data to files below this base path.
    pub fn storage_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.storage_base = Some(base.into());
        self
    }

    /// Add a node.
    pub fn node(mut self, node: Rc<dyn Node>) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add a channel.
    pub fn channel(mut self, channel: SharedChannel) -> Self {
        self.channels.push(channel);
        self
    }

    /// Add several channels.
    pub fn channels(mut self, channels: impl IntoIterator<Item = SharedChannel>) -> Self {
        self.channels.extend(channels);
        self
    }

    /// Set the point operator.
    pub fn point_operator(mut self, operator: impl PointOperator + 'static) -> Self {
        self.point = Some(Box::new(operator));
        self
    }

    /// Set the scan operator.
    pub fn scan_operator(mut self, operator: impl ScanOperator + 'static) -> Self {
        self.scan = Some(Box::new(operator));
        self
    }

    /// Set the trigger operator.
    pub fn trigger_operator(mut self, operator: impl TriggerOperator + 'static) -> Self {
        self.trigger = Some(Box::new(operator));
        self
    }

    /// Set the limit operator.
    pub fn limit_operator(mut self, operator: impl LimitOperator + 'static) -> Self {
        self.limit = Some(Box::new(operator));
        self
    }

    /// Set the status operator.
    pub fn status_operator(mut self, operator: impl StatusOperator + 'static) -> Self {
        self.status = Some(Box::new(operator));
        self
    }

    /// Validate the configuration and sort the channels by dependency.
    ///
    /// Static channels are left out.
    ///
    /// # Errors
    ///
    /// [`DaqError::MissingOperator`] without point or limit operator,
    /// [`DaqError::CircularDependency`] if the channels form a cycle and
    /// [`DaqError::Config`] for a zero scan count.
    pub fn build(self) -> AppResult<Measurement> {
        if self.scan_count == 0 {
            return Err(DaqError::Config("scan count must be at least 1".into()));
        }
        let point = self.point.ok_or(DaqError::MissingOperator("point"))?;
        let limit = self.limit.ok_or(DaqError::MissingOperator("limit"))?;

        let channels: Vec<SharedChannel> = self
            .channels
            .into_iter()
            .filter(|channel| !channel.borrow().is_static())
            .collect();
        let channels = sort_channels(channels)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Measurement {
            run_id: Uuid::new_v4(),
            gates: self.gates,
            nodes: self.nodes,
            channels,
            scan_count: self.scan_count,
            storage_base: self.storage_base,
            point_op: point,
            scan_op: self.scan.unwrap_or_else(|| Box::new(VirtualScan::new())),
            trigger_op: self
                .trigger
                .unwrap_or_else(|| Box::new(ImmediateTrigger::new())),
            limit_op: limit,
            status_op: self.status.unwrap_or_else(|| Box::new(HiddenStatus)),
            node_events: NodeEvents::default(),
            status: Status::Standby,
            current_scan: None,
            current_step: None,
            pausing: false,
            aborting: false,
            abort_on_next_status: false,
            abort_retry: false,
            generated_points: Vec::new(),
            fixed_points: None,
            wiring: None,
            pending_wait: None,
            started: false,
            finished: false,
            events_tx,
            events_rx,
        })
    }
}

/// One measurement run.
///
/// Constructed by [`MeasurementBuilder`], started once with [`Measurement::run`] or
/// [`Measurement::execute`], and discarded after it returned to standby.
pub struct Measurement {
    run_id: Uuid,
    gates: Gates,
    nodes: Vec<Rc<dyn Node>>,
    channels: Vec<SharedChannel>,
    scan_count: usize,
    storage_base: Option<PathBuf>,

    point_op: Box<dyn PointOperator>,
    scan_op: Box<dyn ScanOperator>,
    trigger_op: Box<dyn TriggerOperator>,
    limit_op: Box<dyn LimitOperator>,
    status_op: Box<dyn StatusOperator>,
    node_events: NodeEvents,

    status: Status,
    current_scan: Option<usize>,
    current_step: Option<usize>,
    pausing: bool,
    aborting: bool,
    abort_on_next_status: bool,
    abort_retry: bool,
    generated_points: Vec<f64>,
    fixed_points: Option<Vec<f64>>,

    wiring: Option<Wiring>,
    pending_wait: Option<GateWait>,
    started: bool,
    finished: bool,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl Measurement {
    /// Unique id of this run, used in log output.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Index of the current scan iteration, once the first one began.
    pub fn current_scan(&self) -> Option<usize> {
        self.current_scan
    }

    /// Index of the current step within the scan, once the first one was requested.
    pub fn current_step(&self) -> Option<usize> {
        self.current_step
    }

    /// Number of scan iterations.
    pub fn scan_count(&self) -> usize {
        self.scan_count
    }

    /// Points of the run.
    ///
    /// The point operator's fixed list if it supplied one, otherwise every point
    /// generated so far in order, across all scans.
    pub fn points(&self) -> &[f64] {
        self.fixed_points
            .as_deref()
            .unwrap_or(&self.generated_points)
    }

    /// Whether the pause flag is set.
    pub fn is_pausing(&self) -> bool {
        self.pausing
    }

    /// Whether an abort is in progress.
    pub fn is_aborting(&self) -> bool {
        self.aborting
    }

    /// Whether the run has returned to standby.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Channels in the order they are driven.
    pub fn channels(&self) -> &[SharedChannel] {
        &self.channels
    }

    /// Node events. Connections made here before `run()` behave like node connections.
    pub fn node_events(&self) -> &NodeEvents {
        &self.node_events
    }

    /// The gate pair this measurement coordinates on.
    pub fn gates(&self) -> &Gates {
        &self.gates
    }

    /// A handle for control requests from other tasks.
    pub fn handle(&self) -> MeasurementHandle {
        MeasurementHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Start the run.
    ///
    /// Prepares every operator, connects the nodes, resets all channels, opens storage
    /// if a storage base is set and emits *prepared*. The run then proceeds through
    /// [`Measurement::dispatch_pending`] or [`Measurement::drive`].
    ///
    /// # Errors
    ///
    /// [`DaqError::RunBlockAcquired`] if the run gate is held,
    /// [`DaqError::AlreadyStarted`] on a second call.
    pub fn run(&mut self) -> AppResult<()> {
        if self.started {
            return Err(DaqError::AlreadyStarted);
        }
        if self.gates.run.is_acquired() {
            return Err(DaqError::RunBlockAcquired);
        }
        self.gates.run.acquire();
        self.started = true;

        info!(
            run_id = %self.run_id,
            scan_count = self.scan_count,
            channels = self.channels.len(),
            nodes = self.nodes.len(),
            "starting measurement"
        );

        let points = self.point_op.prepare_points();
        let scan = self.scan_op.prepare_scan();
        let trigger = self.trigger_op.prepare_trigger();
        let limit = self.limit_op.prepare_limit();
        let status = self.status_op.prepare_status(limit.limit_max);

        if let Some(fixed) = &points.points {
            self.fixed_points = Some(fixed.clone());
        }

        let events = &self.events_tx;
        let limit_updated = limit.limit_updated.as_ref().map(|updated| {
            let update_limit = status.update_limit.clone();
            let id = updated.connect(move |progress| update_limit(progress));
            Connection {
                signal: updated.clone(),
                id: Some(id),
            }
        });
        self.wiring = Some(Wiring {
            point_ready: Connection::forward(&points.point_ready, events, Event::PointReady),
            point_depleted: Connection::forward(&points.point_depleted, events, |()| {
                Event::PointDepleted
            }),
            scan_ready: Connection::forward(&scan.scan_ready, events, |()| Event::ScanReady),
            trigger_fired: Connection::forward(&trigger.trigger_fired, events, |()| {
                Event::TriggerFired
            }),
            limit_reached: Connection::forward(&limit.limit_reached, events, |()| {
                Event::LimitReached
            }),
            limit_updated,
            points,
            scan,
            trigger,
            limit,
            status,
        });

        self.set_status(Status::Preparing);

        for node in &self.nodes {
            node.connect_to_measurement(&self.node_events);
        }

        for channel in &self.channels {
            channel.borrow_mut().reset();
        }
        if let Some(base) = &self.storage_base {
            for channel in &self.channels {
                channel.borrow_mut().open_storage(base);
            }
        }

        self.node_events.prepared.emit(());
        self.pending_wait = Some(GateWait::AfterPrepared);
        self.settle();
        Ok(())
    }

    /// Process every queued event and every gate wait that can complete now.
    ///
    /// Never blocks. Returns the number of phases run.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            if let Ok(event) = self.events_rx.try_recv() {
                self.dispatch(event);
                handled += 1;
            } else if self.try_complete_wait() {
                handled += 1;
            } else {
                return handled;
            }
        }
    }

    /// Run the event loop until the measurement returned to standby.
    ///
    /// Wakes on operator completions, control requests and the step gate's release
    /// edge. Returns immediately if the run was never started.
    pub async fn drive(&mut self) {
        loop {
            self.dispatch_pending();
            if self.finished || !self.started {
                return;
            }

            if self.pending_wait.is_some() {
                let step = self.gates.step.clone();
                tokio::select! {
                    Some(event) = self.events_rx.recv() => self.dispatch(event),
                    () = step.wait_released() => {}
                }
            } else {
                match self.events_rx.recv().await {
                    Some(event) => self.dispatch(event),
                    None => return,
                }
            }
        }
    }

    /// Start the run and drive it to completion.
    pub async fn execute(&mut self) -> AppResult<()> {
        self.run()?;
        self.drive().await;
        info!(run_id = %self.run_id, aborted = self.aborting, "measurement finished");
        Ok(())
    }

    /// Set or clear the pause flag.
    ///
    /// With the flag set, the next step boundary pauses the run until
    /// [`Measurement::resume`].
    pub fn set_pause_flag(&mut self, flag: bool) {
        self.pausing = flag;
    }

    /// Leave the paused state.
    ///
    /// If the run has not reached a step boundary yet, only the flag is cleared.
    ///
    /// # Errors
    ///
    /// [`DaqError::PauseFlagNotSet`] if the pause flag is not set.
    pub fn resume(&mut self) -> AppResult<()> {
        if !self.pausing {
            return Err(DaqError::PauseFlagNotSet);
        }
        self.pausing = false;

        if self.status == Status::Paused {
            self.add_channel_marker("RESUMED");
            self.begin_step();
            self.settle();
        }
        Ok(())
    }

    /// Synthesize the limit of the running step.
    ///
    /// Extendable point operators gain one step first. Outside of RUNNING the request
    /// is ignored.
    pub fn skip_limit(&mut self) {
        if self.status != Status::Running {
            warn!(run_id = %self.run_id, status = %self.status, "skip limit ignored outside of RUNNING");
            return;
        }
        self.skip_current_limit();
        self.settle();
    }

    /// Abort the run as soon as the current phase allows.
    pub fn abort(&mut self) {
        self.abort_now();
        self.settle();
    }

    fn skip_current_limit(&mut self) {
        if self.point_op.extend_points() {
            debug!(run_id = %self.run_id, "point operator extended by one step");
        }
        self.add_channel_marker("SKIPPED");
        if let Some(wiring) = &self.wiring {
            wiring.limit.limit_reached.emit(());
        }
    }

    fn abort_now(&mut self) {
        debug!(run_id = %self.run_id, status = %self.status, "abort requested");
        match self.status {
            Status::Standby => return,
            Status::Preparing | Status::LeavingStep => self.aborting = true,
            Status::EnteringScan | Status::LeavingScan => self.abort_on_next_status = true,
            Status::EnteringStep => {
                if let Some(wiring) = &mut self.wiring {
                    wiring.point_ready.disconnect();
                    wiring.point_depleted.disconnect();
                }
                self.aborting = true;
                self.end_scan();
            }
            Status::Configuring => {
                if let Some(wiring) = &mut self.wiring {
                    wiring.scan_ready.disconnect();
                }
                self.aborting = true;
                self.end_step();
            }
            Status::TriggerArmed => {
                if let Some(wiring) = &mut self.wiring {
                    wiring.trigger_fired.disconnect();
                }
                self.aborting = true;
                self.end_step();
            }
            Status::Running => {
                self.aborting = true;
                self.skip_current_limit();
            }
            Status::Finalizing => {}
            Status::Paused => {
                self.aborting = true;
                self.pausing = false;
                self.for_each_channel(|channel| channel.end_scan());
                self.finalize();
            }
        }
        self.add_channel_marker("ABORTED");
    }

    fn settle(&mut self) {
        while std::mem::take(&mut self.abort_retry) {
            self.abort_now();
        }
    }

    fn dispatch(&mut self, event: Event) {
        if let Event::Control(control) = event {
            self.apply_control(control);
            return;
        }

        let connected = self.wiring.as_ref().is_some_and(|w| w.accepts(event));
        if !connected {
            trace!(run_id = %self.run_id, ?event, "event from disconnected operator dropped");
            return;
        }
        if expected_status(event) != Some(self.status) {
            warn!(run_id = %self.run_id, ?event, status = %self.status, "operator event out of phase, ignored");
            return;
        }

        match event {
            Event::PointReady(value) => self.on_point_ready(value),
            Event::PointDepleted => self.end_scan(),
            Event::ScanReady => self.on_scan_ready(),
            Event::TriggerFired => self.on_trigger_fired(),
            Event::LimitReached => self.on_limit_reached(),
            Event::Control(_) => {}
        }
        self.settle();
    }

    fn apply_control(&mut self, control: Control) {
        match control {
            Control::Abort => self.abort(),
            Control::SetPause(flag) => self.set_pause_flag(flag),
            Control::Resume => {
                if let Err(err) = self.resume() {
                    warn!(run_id = %self.run_id, error = %err, "resume request ignored");
                }
            }
            Control::SkipLimit => self.skip_limit(),
        }
    }

    fn try_complete_wait(&mut self) -> bool {
        let Some(wait) = self.pending_wait else {
            return false;
        };
        if self.gates.step.is_acquired() {
            return false;
        }

        self.pending_wait = None;
        trace!(run_id = %self.run_id, ?wait, "step gate drained");
        match wait {
            GateWait::AfterPrepared => self.after_prepared(),
            GateWait::AfterStopped => self.end_step(),
            GateWait::AfterFinalized => self.after_finalized(),
        }
        self.settle();
        true
    }

    fn set_status(&mut self, status: Status) {
        debug!(run_id = %self.run_id, from = %self.status, to = %status, "status changed");
        self.status = status;
        if let Some(wiring) = &self.wiring {
            (wiring.status.update_status)(status);
        }
        if self.abort_on_next_status {
            self.abort_on_next_status = false;
            self.abort_retry = true;
        }
    }

    fn add_channel_marker(&self, text: &str) {
        if self.storage_base.is_none() {
            return;
        }
        let marker = format!(
            "{} - {}",
            chrono::Local::now().format("%d.%m.%Y %H:%M:%S"),
            text
        );
        for channel in &self.channels {
            channel.borrow_mut().add_marker(&marker);
        }
    }

    fn for_each_channel(&self, mut call: impl FnMut(&mut dyn crate::channel::Channel)) {
        for channel in &self.channels {
            call(&mut *channel.borrow_mut());
        }
    }

    fn after_prepared(&mut self) {
        if self.aborting {
            self.finalize();
        } else {
            self.begin_scan();
        }
    }

    fn begin_scan(&mut self) {
        let scan = self.current_scan.map_or(0, |scan| scan + 1);
        self.current_scan = Some(scan);
        self.current_step = None;

        self.for_each_channel(|channel| channel.begin_scan(scan));
        self.set_status(Status::EnteringScan);
        self.begin_step();
    }

    fn begin_step(&mut self) {
        let next = self.current_step.map_or(0, |step| step + 1);

        if self.pausing {
            self.set_status(Status::EnteringStep);
            self.add_channel_marker("PAUSED");
            self.set_status(Status::Paused);
            return;
        }

        // A fixed point list ends the scan without asking the operator again.
        if let Some(fixed) = &self.fixed_points {
            if next >= fixed.len() {
                self.end_scan();
                return;
            }
        }

        self.set_status(Status::EnteringStep);
        self.current_step = Some(next);
        if let Some(wiring) = &self.wiring {
            (wiring.points.request_point)(next);
        }
    }

    fn on_point_ready(&mut self, value: f64) {
        if self.aborting {
            self.end_scan();
            return;
        }

        self.generated_points.push(value);
        self.for_each_channel(|channel| channel.begin_step(value));
        self.set_status(Status::Configuring);
        if let Some(wiring) = &self.wiring {
            (wiring.scan.move_scan)(value);
        }
    }

    fn on_scan_ready(&mut self) {
        self.set_status(Status::TriggerArmed);
        if let Some(wiring) = &self.wiring {
            (wiring.trigger.arm_trigger)(());
        }
    }

    fn on_trigger_fired(&mut self) {
        self.set_status(Status::Running);
        if let Some(wiring) = &self.wiring {
            (wiring.limit.start_limit)(());
        }
        self.node_events.started.emit(());
    }

    fn on_limit_reached(&mut self) {
        self.set_status(Status::LeavingStep);
        self.node_events.stopped.emit(());
        self.pending_wait = Some(GateWait::AfterStopped);
    }

    fn end_step(&mut self) {
        self.for_each_channel(|channel| channel.end_step());

        if self.aborting {
            self.end_scan();
        } else {
            self.begin_step();
        }
    }

    fn end_scan(&mut self) {
        self.for_each_channel(|channel| channel.end_scan());
        self.set_status(Status::LeavingScan);

        let last = self.current_scan.map_or(0, |scan| scan + 1) >= self.scan_count;
        if last || self.aborting {
            self.finalize();
        } else {
            self.begin_scan();
        }
    }

    fn finalize(&mut self) {
        self.set_status(Status::Finalizing);
        self.node_events.finalized.emit(());
        self.pending_wait = Some(GateWait::AfterFinalized);
    }

    fn after_finalized(&mut self) {
        if let Some(wiring) = &mut self.wiring {
            wiring.disconnect_all();
        }

        self.point_op.finalize_points();
        self.scan_op.finalize_scan();
        self.trigger_op.finalize_trigger();
        self.limit_op.finalize_limit();

        self.for_each_channel(|channel| channel.close_storage());

        self.set_status(Status::Standby);
        self.status_op.finalize_status();
        self.wiring = None;

        self.finished = true;
        self.gates.run.release();
        info!(
            run_id = %self.run_id,
            scans = self.current_scan.map_or(0, |scan| scan + 1),
            aborted = self.aborting,
            "measurement returned to standby"
        );
    }
}

impl Drop for Measurement {
    fn drop(&mut self) {
        if self.started && !self.finished {
            warn!(run_id = %self.run_id, status = %self.status, "measurement dropped mid-run, releasing run gate");
            self.gates.run.release();
        }
    }
}

impl std::fmt::Debug for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Measurement")
            .field("run_id", &self.run_id)
            .field("status", &self.status)
            .field("current_scan", &self.current_scan)
            .field("current_step", &self.current_step)
            .field("scan_count", &self.scan_count)
            .field("channels", &self.channels.len())
            .finish()
    }
}

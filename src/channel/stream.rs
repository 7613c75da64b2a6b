//! Buffered scalar channel.
//!
//! [`StreamChannel`] buffers every sample of a run per step index and supports all
//! channel features: direct, computing and integrating modes, subscriber step
//! selection, header tags and text storage.
//!
//! Buffer layout by frequency:
//!
//! | Frequency  | Stored per step                  | `get_data(Current)`          |
//! |------------|----------------------------------|------------------------------|
//! | continuous | every sample of every scan       | concatenation for that step  |
//! | step       | the latest sample only           | latest value of every step   |
//! | scheduled  | every sample                     | all samples of the run       |

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::rc::{Rc, Weak};

use tracing::{debug, error, warn};

use super::storage::{StreamFile, StreamHeader};
use super::{Channel, Frequency, Hint, Mode, StepSelector, Subscriber, SubscriberRef};
use crate::error::{AppResult, DaqError};

/// Shared handle to a stream channel.
pub type ChannelRef = Rc<RefCell<StreamChannel>>;

type ComputeKernel = Box<dyn Fn(&[f64]) -> anyhow::Result<f64>>;
type IntegrateKernel = Box<dyn Fn(&[&[f64]]) -> anyhow::Result<f64>>;

/// Options applied when a channel is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Display hint.
    pub hint: Hint,
    /// Sampling class.
    pub frequency: Frequency,
    /// Static channels are skipped by measurements.
    pub is_static: bool,
    /// Keep samples in memory. Unbuffered channels only forward to subscribers.
    pub buffering: bool,
    /// Never write storage files.
    pub transient: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            hint: Hint::Waveform,
            frequency: Frequency::Continuous,
            is_static: false,
            buffering: true,
            transient: false,
        }
    }
}

impl ChannelOptions {
    /// Set the display hint.
    pub fn with_hint(mut self, hint: Hint) -> Self {
        self.hint = hint;
        self
    }

    /// Set the sampling class.
    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    /// Mark the channel static.
    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    /// Enable or disable buffering.
    pub fn with_buffering(mut self, buffering: bool) -> Self {
        self.buffering = buffering;
        self
    }

    /// Enable or disable storage for this channel.
    pub fn with_transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }
}

/// Identifies one subscription on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    target: SubscriberRef,
    step: StepSelector,
}

struct Input {
    name: String,
    channel: ChannelRef,
    subscription: Option<SubscriptionId>,
}

enum ModeState {
    Direct,
    Computing {
        kernel: ComputeKernel,
        inputs: Vec<Input>,
        stack: Vec<Option<Vec<f64>>>,
    },
    Integrating {
        kernel: IntegrateKernel,
        inputs: Vec<Input>,
    },
}

/// Feeds samples of one input into a computing channel.
struct ComputingInput {
    target: Weak<RefCell<StreamChannel>>,
    slot: usize,
}

impl Subscriber for ComputingInput {
    fn data_set(&mut self, _data: &[f64]) {}

    fn data_added(&mut self, data: &[f64]) {
        let Some(target) = self.target.upgrade() else {
            return;
        };
        match target.try_borrow_mut() {
            Ok(mut channel) => channel.on_computing_input(self.slot, data),
            Err(_) => warn!(slot = self.slot, "computing channel is busy, input dropped"),
        };
    }

    fn data_cleared(&mut self) {}
}

fn deliver(sub: &Subscription, channel: &str, callback: impl FnOnce(&mut dyn Subscriber)) {
    match sub.target.try_borrow_mut() {
        Ok(mut target) => callback(&mut *target),
        Err(_) => warn!(channel, "subscriber is busy, callback dropped"),
    }
}

/// Buffered channel of scalar samples.
pub struct StreamChannel {
    name: String,
    this: Weak<RefCell<StreamChannel>>,
    mode: ModeState,
    hint: Hint,
    frequency: Frequency,
    is_static: bool,
    buffering: bool,
    transient: bool,
    locked: bool,
    closed: bool,
    data: Vec<Vec<f64>>,
    current_index: Option<usize>,
    step_values: Vec<f64>,
    step_open: bool,
    subscribers: Vec<Subscription>,
    next_subscription: u64,
    header_tags: BTreeMap<String, String>,
    display_arguments: BTreeMap<String, String>,
    storage: Option<StreamFile>,
}

impl StreamChannel {
    /// Create a channel outside of any registry.
    ///
    /// Use [`ChannelRegistry::open`](super::ChannelRegistry::open) for channels that
    /// should be visible by name.
    pub fn shared(name: impl Into<String>, options: ChannelOptions) -> ChannelRef {
        let name = name.into();
        Rc::new_cyclic(|this| {
            RefCell::new(StreamChannel {
                name,
                this: this.clone(),
                mode: ModeState::Direct,
                hint: options.hint,
                frequency: options.frequency,
                is_static: options.is_static,
                buffering: options.buffering,
                transient: options.transient,
                locked: false,
                closed: false,
                data: vec![Vec::new()],
                current_index: Some(0),
                step_values: Vec::new(),
                step_open: false,
                subscribers: Vec::new(),
                next_subscription: 0,
                header_tags: BTreeMap::new(),
                display_arguments: BTreeMap::new(),
                storage: None,
            })
        })
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        match self.mode {
            ModeState::Direct => Mode::Direct,
            ModeState::Computing { .. } => Mode::Computing,
            ModeState::Integrating { .. } => Mode::Integrating,
        }
    }

    /// Sampling class.
    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Display hint.
    pub fn hint(&self) -> Hint {
        self.hint
    }

    /// True between `begin_scan` and `end_scan`.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// True once the channel has been closed through its registry.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether samples are kept in memory.
    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    /// Names of the input channels in computing or integrating mode.
    pub fn inputs(&self) -> Vec<String> {
        match &self.mode {
            ModeState::Direct => Vec::new(),
            ModeState::Computing { inputs, .. } | ModeState::Integrating { inputs, .. } => {
                inputs.iter().map(|input| input.name.clone()).collect()
            }
        }
    }

    /// Index of the active step, if a step has begun in the current scan.
    pub fn current_step(&self) -> Option<usize> {
        self.current_index
    }

    /// Number of step buffers.
    pub fn step_count(&self) -> usize {
        self.data.len()
    }

    /// Point values seen for each step index.
    pub fn step_values(&self) -> &[f64] {
        &self.step_values
    }

    /// Whether the active step holds no samples.
    pub fn is_empty(&self) -> bool {
        !self.buffering || self.data.get(self.index()).map_or(true, Vec::is_empty)
    }

    /// Custom header tags, keys carry the `X-` prefix.
    pub fn header_tags(&self) -> &BTreeMap<String, String> {
        &self.header_tags
    }

    /// Suggested display arguments.
    pub fn display_arguments(&self) -> &BTreeMap<String, String> {
        &self.display_arguments
    }

    /// Path of the open storage file, if in storage mode.
    pub fn storage_path(&self) -> Option<&Path> {
        self.storage.as_ref().map(StreamFile::path)
    }

    /// Change the display hint. Allowed at any time.
    pub fn set_hint(&mut self, hint: Hint) {
        self.hint = hint;
    }

    /// Change the sampling class.
    ///
    /// # Errors
    ///
    /// [`DaqError::ChannelLocked`] while a scan is in progress.
    pub fn set_frequency(&mut self, frequency: Frequency) -> AppResult<()> {
        if self.locked {
            return Err(DaqError::ChannelLocked);
        }
        self.frequency = frequency;
        Ok(())
    }

    /// Set a header tag, stored as `X-<tag>`.
    pub fn set_header_tag(&mut self, tag: &str, value: impl Into<String>) {
        self.header_tags.insert(format!("X-{tag}"), value.into());
    }

    /// Suggest a display argument, `None` removes it.
    pub fn hint_display_argument(&mut self, key: &str, value: Option<String>) {
        match value {
            Some(value) => {
                self.display_arguments.insert(key.to_string(), value);
            }
            None => {
                self.display_arguments.remove(key);
            }
        }
    }

    /// Switch to direct mode, dropping any kernel and input subscriptions.
    pub fn set_direct(&mut self) -> AppResult<()> {
        if self.locked {
            return Err(DaqError::ChannelLocked);
        }
        self.stop_mode();
        Ok(())
    }

    /// Switch to computing mode.
    ///
    /// The kernel receives one value per input. With a single input it runs for every
    /// sample. With several inputs it waits until every input has reported a batch
    /// since the last evaluation, then runs once per sample of the paired batches.
    ///
    /// # Errors
    ///
    /// [`DaqError::ChannelLocked`] mid-scan, [`DaqError::CircularDependency`] if the
    /// channel is its own input, [`DaqError::ChannelClosed`] if an input is closed.
    pub fn set_computing<K>(&mut self, kernel: K, inputs: &[ChannelRef]) -> AppResult<()>
    where
        K: Fn(&[f64]) -> anyhow::Result<f64> + 'static,
    {
        if self.locked {
            return Err(DaqError::ChannelLocked);
        }
        self.reject_self_input(inputs)?;
        self.stop_mode();

        let mut wired: Vec<Input> = Vec::with_capacity(inputs.len());
        for (slot, channel) in inputs.iter().enumerate() {
            let subscriber: SubscriberRef = Rc::new(RefCell::new(ComputingInput {
                target: self.this.clone(),
                slot,
            }));
            let subscribed = channel
                .try_borrow_mut()
                .map_err(|_| DaqError::CircularDependency)
                .and_then(|mut input| {
                    let name = input.name.clone();
                    input.subscribe(subscriber).map(|id| (name, id))
                });

            match subscribed {
                Ok((name, id)) => wired.push(Input {
                    name,
                    channel: channel.clone(),
                    subscription: Some(id),
                }),
                Err(err) => {
                    unsubscribe_inputs(&wired);
                    return Err(err);
                }
            }
        }

        self.mode = ModeState::Computing {
            kernel: Box::new(kernel),
            stack: vec![None; wired.len()],
            inputs: wired,
        };
        Ok(())
    }

    /// Switch to integrating mode and force step frequency.
    ///
    /// At every `end_step` the kernel receives the current step data of each input.
    /// If any input has no data for the step, nothing is emitted.
    pub fn set_integrating<K>(&mut self, kernel: K, inputs: &[ChannelRef]) -> AppResult<()>
    where
        K: Fn(&[&[f64]]) -> anyhow::Result<f64> + 'static,
    {
        if self.locked {
            return Err(DaqError::ChannelLocked);
        }
        self.reject_self_input(inputs)?;
        self.stop_mode();

        let inputs = inputs
            .iter()
            .map(|channel| {
                let name = channel
                    .try_borrow()
                    .map(|input| input.name.clone())
                    .map_err(|_| DaqError::CircularDependency)?;
                Ok(Input {
                    name,
                    channel: channel.clone(),
                    subscription: None,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        self.mode = ModeState::Integrating {
            kernel: Box::new(kernel),
            inputs,
        };
        self.frequency = Frequency::Step;
        Ok(())
    }

    /// Integrate the mean of `input` per step.
    pub fn set_averaging(&mut self, input: &ChannelRef) -> AppResult<()> {
        self.set_integrating(
            |args| {
                let data = args.first().copied().unwrap_or_default();
                if data.is_empty() {
                    anyhow::bail!("cannot average an empty step");
                }
                Ok(data.iter().sum::<f64>() / data.len() as f64)
            },
            std::slice::from_ref(input),
        )
    }

    /// Integrate the sum of `input` per step.
    pub fn set_accumulating(&mut self, input: &ChannelRef) -> AppResult<()> {
        self.set_integrating(
            |args| Ok(args.first().map_or(0.0, |data| data.iter().sum())),
            std::slice::from_ref(input),
        )
    }

    /// Remote mode is reserved.
    ///
    /// # Errors
    ///
    /// Always [`DaqError::RemoteModeReserved`].
    pub fn set_remote(&mut self) -> AppResult<()> {
        Err(DaqError::RemoteModeReserved)
    }

    /// Add a subscriber following the current step.
    ///
    /// The subscriber immediately receives the current content through `data_set`, or
    /// `data_cleared` if there is none.
    pub fn subscribe(&mut self, target: SubscriberRef) -> AppResult<SubscriptionId> {
        if self.closed {
            return Err(DaqError::ChannelClosed(self.name.clone()));
        }

        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push(Subscription {
            id,
            target,
            step: StepSelector::Current,
        });

        if self.buffering {
            self.send_snapshot(id, StepSelector::Current);
        }
        Ok(id)
    }

    /// Remove a subscriber. Returns false for unknown ids.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|sub| sub.id != id);
        self.subscribers.len() != before
    }

    /// Step a subscriber follows.
    pub fn subscribed_step(&self, id: SubscriptionId) -> Option<StepSelector> {
        self.subscribers
            .iter()
            .find(|sub| sub.id == id)
            .map(|sub| sub.step)
    }

    /// Change the step a subscriber follows and send it that step's content.
    pub fn set_subscribed_step(&mut self, id: SubscriptionId, step: StepSelector) -> bool {
        let Some(sub) = self.subscribers.iter_mut().find(|sub| sub.id == id) else {
            return false;
        };
        if sub.step == step {
            return true;
        }
        sub.step = step;

        if self.buffering {
            self.send_snapshot(id, step);
        }
        true
    }

    /// Read buffered samples. `None` if unbuffered or empty.
    pub fn get_data(&self, step: StepSelector) -> Option<Vec<f64>> {
        if !self.buffering {
            return None;
        }

        let values: Vec<f64> = match self.frequency {
            Frequency::Continuous => match step {
                StepSelector::Current => self.data.get(self.index())?.clone(),
                StepSelector::Index(index) => self.data.get(index)?.clone(),
                StepSelector::All => self.data.concat(),
            },
            Frequency::Step => match step {
                StepSelector::Index(index) => {
                    self.data.get(index)?.last().copied().into_iter().collect()
                }
                StepSelector::Current | StepSelector::All => self
                    .data
                    .iter()
                    .filter_map(|samples| samples.last().copied())
                    .collect(),
            },
            Frequency::Scheduled => self.data.concat(),
        };

        (!values.is_empty()).then_some(values)
    }

    /// Replace the content of a step. An empty slice clears it.
    ///
    /// Computing channels downstream are not notified; replacement is not a sample.
    pub fn set_data(&mut self, values: &[f64], step: StepSelector) -> AppResult<()> {
        if values.is_empty() {
            self.clear_data();
            return Ok(());
        }

        let index = match step {
            StepSelector::Index(index) if index >= self.data.len() => {
                return Err(DaqError::StepOutOfRange(index));
            }
            StepSelector::Index(index) => index,
            StepSelector::Current | StepSelector::All => self.index(),
        };

        if self.buffering {
            self.ensure_step(index);
            self.data[index] = values.to_vec();
        }

        let current = self.index();
        let all = self.get_data(StepSelector::All);
        for sub in &self.subscribers {
            match sub.step {
                StepSelector::Current if index == current => {
                    deliver(sub, &self.name, |target| target.data_set(values));
                }
                StepSelector::Index(wanted) if wanted == index => {
                    deliver(sub, &self.name, |target| target.data_set(values));
                }
                StepSelector::All => {
                    if let Some(all) = &all {
                        deliver(sub, &self.name, |target| target.data_set(all));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Append one sample to the active step.
    pub fn add_data(&mut self, value: f64) {
        self.add_samples(std::slice::from_ref(&value));
    }

    /// Append samples to the active step and notify subscribers.
    pub fn add_samples(&mut self, values: &[f64]) {
        if values.is_empty() {
            return;
        }

        let index = self.index();
        if self.buffering {
            self.ensure_step(index);
            let step = &mut self.data[index];
            match self.frequency {
                Frequency::Step => {
                    step.clear();
                    step.extend(values.last());
                }
                Frequency::Continuous | Frequency::Scheduled => step.extend_from_slice(values),
            }
        }

        for sub in &self.subscribers {
            let wanted = match sub.step {
                StepSelector::Current | StepSelector::All => true,
                StepSelector::Index(wanted) => self.current_index == Some(wanted),
            };
            if wanted {
                deliver(sub, &self.name, |target| target.data_added(values));
            }
        }

        if self.step_open || self.frequency == Frequency::Scheduled {
            self.write_storage(|file| file.write_samples(values));
        }
    }

    /// Empty the active step.
    pub fn clear_data(&mut self) {
        let index = self.index();
        if let Some(step) = self.data.get_mut(index) {
            step.clear();
        }

        for sub in &self.subscribers {
            let wanted = match sub.step {
                StepSelector::Current => true,
                StepSelector::Index(wanted) => wanted == index,
                StepSelector::All => false,
            };
            if wanted {
                deliver(sub, &self.name, |target| target.data_cleared());
            }
        }
    }

    pub(crate) fn close(&mut self) {
        self.stop_mode();
        self.close_storage();
        self.closed = true;
    }

    fn index(&self) -> usize {
        self.current_index.unwrap_or(0)
    }

    fn ensure_step(&mut self, index: usize) {
        while self.data.len() <= index {
            self.data.push(Vec::new());
        }
    }

    fn send_snapshot(&self, id: SubscriptionId, step: StepSelector) {
        let Some(sub) = self.subscribers.iter().find(|sub| sub.id == id) else {
            return;
        };
        match self.get_data(step) {
            Some(data) => deliver(sub, &self.name, |target| target.data_set(&data)),
            None => deliver(sub, &self.name, |target| target.data_cleared()),
        }
    }

    fn reject_self_input(&self, inputs: &[ChannelRef]) -> AppResult<()> {
        if inputs
            .iter()
            .any(|input| std::ptr::eq(Rc::as_ptr(input), self.this.as_ptr()))
        {
            return Err(DaqError::CircularDependency);
        }
        Ok(())
    }

    fn stop_mode(&mut self) {
        if let ModeState::Computing { inputs, .. } = &self.mode {
            unsubscribe_inputs(inputs);
        }
        self.mode = ModeState::Direct;
    }

    fn on_computing_input(&mut self, slot: usize, values: &[f64]) {
        let ModeState::Computing { kernel, stack, .. } = &mut self.mode else {
            return;
        };

        let mut outputs = Vec::with_capacity(values.len());
        let mut failures = Vec::new();
        if stack.len() == 1 {
            for &value in values {
                match kernel(&[value]) {
                    Ok(output) => outputs.push(output),
                    Err(err) => failures.push(err),
                }
            }
        } else {
            let Some(entry) = stack.get_mut(slot) else {
                return;
            };
            *entry = Some(values.to_vec());
            if stack.iter().any(Option::is_none) {
                return;
            }

            // Batches are paired sample by sample, surplus samples are dropped.
            let batches: Vec<Vec<f64>> = stack.iter_mut().filter_map(Option::take).collect();
            let len = batches.iter().map(Vec::len).min().unwrap_or(0);
            let mut args = vec![0.0; batches.len()];
            for sample in 0..len {
                for (arg, batch) in args.iter_mut().zip(&batches) {
                    *arg = batch[sample];
                }
                match kernel(&args) {
                    Ok(output) => outputs.push(output),
                    Err(err) => failures.push(err),
                }
            }
        }

        for err in failures {
            error!(channel = %self.name, error = ?err, "computing kernel failed, sample dropped");
        }
        self.add_samples(&outputs);
    }

    fn integrate(&mut self) {
        let ModeState::Integrating { kernel, inputs } = &self.mode else {
            return;
        };

        let mut snapshots = Vec::with_capacity(inputs.len());
        for input in inputs {
            let data = match input.channel.try_borrow() {
                Ok(channel) => channel.get_data(StepSelector::Current),
                Err(_) => {
                    warn!(channel = %self.name, input = %input.name, "input is busy, step not integrated");
                    return;
                }
            };
            match data {
                Some(data) => snapshots.push(data),
                None => return,
            }
        }

        let args: Vec<&[f64]> = snapshots.iter().map(Vec::as_slice).collect();
        match kernel(&args) {
            Ok(value) => self.add_data(value),
            Err(err) => {
                error!(channel = %self.name, error = ?err, "integrating kernel failed, step dropped");
            }
        }
    }

    fn write_storage(&mut self, write: impl FnOnce(&mut StreamFile) -> io::Result<()>) {
        let Some(file) = self.storage.as_mut() else {
            return;
        };
        if let Err(err) = write(file) {
            warn!(channel = %self.name, error = %err, "storage write failed, leaving storage mode");
            self.storage = None;
        }
    }
}

fn unsubscribe_inputs(inputs: &[Input]) {
    for input in inputs {
        let Some(id) = input.subscription else {
            continue;
        };
        match input.channel.try_borrow_mut() {
            Ok(mut channel) => {
                channel.unsubscribe(id);
            }
            Err(_) => warn!(input = %input.name, "input is busy, subscription left in place"),
        }
    }
}

impl Channel for StreamChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn depends_on(&self, other: &str) -> bool {
        match &self.mode {
            ModeState::Direct => false,
            ModeState::Computing { inputs, .. } | ModeState::Integrating { inputs, .. } => {
                inputs.iter().any(|input| input.name == other)
            }
        }
    }

    fn is_static(&self) -> bool {
        self.is_static
    }

    fn begin_scan(&mut self, scan_index: usize) {
        self.locked = true;
        self.add_marker(&format!("SCAN {scan_index}"));
        self.current_index = None;
    }

    fn begin_step(&mut self, step_value: f64) {
        let index = self.current_index.map_or(0, |index| index + 1);
        self.current_index = Some(index);

        match self.step_values.get_mut(index) {
            Some(slot) => *slot = step_value,
            None => self.step_values.push(step_value),
        }
        if self.buffering {
            self.ensure_step(index);
        }

        match self.frequency {
            Frequency::Continuous => {
                self.add_marker(&format!("STEP {index}: {step_value}"));

                let existing = self
                    .data
                    .get(index)
                    .filter(|samples| self.buffering && !samples.is_empty());
                for sub in &self.subscribers {
                    let follows = match sub.step {
                        StepSelector::Current => true,
                        StepSelector::Index(wanted) => wanted == index,
                        StepSelector::All => false,
                    };
                    if !follows {
                        continue;
                    }
                    match existing {
                        Some(samples) => deliver(sub, &self.name, |target| target.data_set(samples)),
                        None => deliver(sub, &self.name, |target| target.data_cleared()),
                    }
                }
            }
            Frequency::Scheduled => self.add_marker(&format!("STEP {index}: {step_value}")),
            Frequency::Step => {}
        }

        self.step_open = true;
    }

    fn end_step(&mut self) {
        self.integrate();
        self.step_open = false;
        self.write_storage(StreamFile::flush);
    }

    fn end_scan(&mut self) {
        self.locked = false;
    }

    fn open_storage(&mut self, base_path: &Path) {
        if self.transient || self.storage.is_some() {
            return;
        }

        let header = StreamHeader {
            name: &self.name,
            hint: self.hint,
            frequency: self.frequency,
            tags: &self.header_tags,
            display: &self.display_arguments,
        };
        match StreamFile::create(base_path, &header) {
            Ok(file) => {
                debug!(channel = %self.name, path = %file.path().display(), "storage opened");
                self.storage = Some(file);
            }
            Err(err) => {
                warn!(channel = %self.name, error = %err, "failed to open storage");
            }
        }
    }

    fn close_storage(&mut self) {
        if let Some(mut file) = self.storage.take() {
            if let Err(err) = file.flush() {
                warn!(channel = %self.name, error = %err, "failed to flush storage on close");
            }
        }
    }

    fn add_marker(&mut self, text: &str) {
        self.write_storage(|file| file.write_marker(text));
    }

    fn reset(&mut self) {
        self.data = vec![Vec::new()];
        self.current_index = Some(0);
        self.step_values.clear();
        self.step_open = false;
        if let ModeState::Computing { stack, .. } = &mut self.mode {
            stack.fill(None);
        }

        for sub in &self.subscribers {
            deliver(sub, &self.name, |target| target.data_cleared());
        }
    }
}

impl fmt::Debug for StreamChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamChannel")
            .field("name", &self.name)
            .field("mode", &self.mode())
            .field("frequency", &self.frequency)
            .field("locked", &self.locked)
            .field("steps", &self.data.len())
            .finish()
    }
}

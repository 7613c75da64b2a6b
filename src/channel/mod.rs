//! Channel data model.
//!
//! A channel is a named data stream driven through scan and step boundaries by the
//! measurement. This module defines the lifecycle contract every channel honors
//! ([`Channel`]), the subscriber contract ([`Subscriber`]), the classification enums
//! ([`Mode`], [`Frequency`], [`Hint`]) and re-exports the concrete pieces:
//!
//! - [`StreamChannel`]: buffered scalar channel supporting direct, computing and
//!   integrating modes plus text storage.
//! - [`ChannelRegistry`]: the table of open channels, keyed by unique name.
//! - [`sort_by_dependency`] / [`sort_channels`]: ordering so that no channel is driven
//!   before a channel it reads from.
//! - [`ChannelAdapter`]: lifecycle-only sink for external consumers.
//!
//! Channels are owned by the orchestrator thread and shared as `Rc<RefCell<_>>`.
//! Subscriber callbacks run synchronously inside the call that produced the data and
//! must not re-enter the channel they are subscribed to.

mod dependency;
mod registry;
mod storage;
mod stream;

pub use dependency::{sort_by_dependency, sort_channels};
pub use registry::{ChannelRegistry, RegistryEvent, WatchId};
pub use storage::{StreamFile, StreamHeader};
pub use stream::{ChannelOptions, ChannelRef, StreamChannel, SubscriptionId};

use crate::error::DaqError;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::str::FromStr;

/// Shared handle to any channel the measurement drives.
pub type SharedChannel = Rc<RefCell<dyn Channel>>;

/// Shared handle to a subscriber.
pub type SubscriberRef = Rc<RefCell<dyn Subscriber>>;

/// Lifecycle contract consumed by the measurement.
///
/// All calls are issued on the orchestrator thread, in dependency order, for every
/// channel and every cycle.
pub trait Channel {
    /// Unique channel name.
    fn name(&self) -> &str;

    /// Whether this channel reads from the channel named `other`.
    fn depends_on(&self, _other: &str) -> bool {
        false
    }

    /// Static channels hold fixed data and are skipped by measurements.
    fn is_static(&self) -> bool {
        false
    }

    /// A scan iteration starts.
    fn begin_scan(&mut self, scan_index: usize);

    /// A step starts at the given point value.
    fn begin_step(&mut self, step_value: f64);

    /// The current step has ended.
    fn end_step(&mut self);

    /// The current scan iteration has ended.
    fn end_scan(&mut self);

    /// Enter storage mode. `base_path` uniquely identifies the run.
    fn open_storage(&mut self, base_path: &Path);

    /// Leave storage mode.
    fn close_storage(&mut self);

    /// Write a free-form annotation to storage, if any.
    fn add_marker(&mut self, text: &str);

    /// Drop all buffered content, keeping mode and frequency.
    fn reset(&mut self);
}

/// Receives data callbacks from a channel.
pub trait Subscriber {
    /// The subscribed content was replaced as a whole.
    fn data_set(&mut self, data: &[f64]);

    /// Samples were appended.
    fn data_added(&mut self, data: &[f64]);

    /// The subscribed content is empty (or about to be refilled).
    fn data_cleared(&mut self);
}

/// How a channel obtains its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// The owner calls `set_data`/`add_data`.
    Direct,
    /// A kernel runs for every input sample.
    Computing,
    /// A kernel runs once per step over the input snapshots.
    Integrating,
    /// Reserved. No wire protocol exists.
    Remote,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Direct => "direct",
            Mode::Computing => "computing",
            Mode::Integrating => "integrating",
            Mode::Remote => "remote",
        };
        f.write_str(s)
    }
}

/// Sampling class of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Any number of samples per step, concatenated across scans.
    #[default]
    Continuous,
    /// One sample per step; the last scan wins.
    Step,
    /// Independent of step boundaries.
    Scheduled,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Frequency::Continuous => "continuous",
            Frequency::Step => "step",
            Frequency::Scheduled => "scheduled",
        };
        f.write_str(s)
    }
}

impl FromStr for Frequency {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "continuous" | "cont" => Ok(Frequency::Continuous),
            "step" => Ok(Frequency::Step),
            "scheduled" | "sched" => Ok(Frequency::Scheduled),
            _ => Err(DaqError::UnknownFrequency(s.to_string())),
        }
    }
}

/// Display hint for consumers of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hint {
    /// Nothing is known about the data.
    Unknown,
    /// Arbitrary data without a preferred display.
    Arbitrary,
    /// A single current value.
    Indicator,
    /// A sequence of samples.
    #[default]
    Waveform,
    /// Binned counts.
    Histogram,
}

impl fmt::Display for Hint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Hint::Unknown => "unknown",
            Hint::Arbitrary => "arbitrary",
            Hint::Indicator => "indicator",
            Hint::Waveform => "waveform",
            Hint::Histogram => "histogram",
        };
        f.write_str(s)
    }
}

impl FromStr for Hint {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unknown" => Ok(Hint::Unknown),
            "arbitrary" => Ok(Hint::Arbitrary),
            "indicator" => Ok(Hint::Indicator),
            "waveform" => Ok(Hint::Waveform),
            "histogram" => Ok(Hint::Histogram),
            _ => Err(DaqError::UnknownHint(s.to_string())),
        }
    }
}

/// Which step a read or a subscription refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepSelector {
    /// Whatever step is currently active.
    #[default]
    Current,
    /// Every step of the run.
    All,
    /// One specific step index.
    Index(usize),
}

/// Lifecycle-only channel that ignores every call.
///
/// Useful as a base for external sinks that only care about a subset of the
/// lifecycle, or as a placeholder in tests.
#[derive(Debug, Clone)]
pub struct ChannelAdapter {
    name: String,
}

impl ChannelAdapter {
    /// Create an adapter with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Channel for ChannelAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn begin_scan(&mut self, _scan_index: usize) {}

    fn begin_step(&mut self, _step_value: f64) {}

    fn end_step(&mut self) {}

    fn end_scan(&mut self) {}

    fn open_storage(&mut self, _base_path: &Path) {}

    fn close_storage(&mut self) {}

    fn add_marker(&mut self, _text: &str) {}

    fn reset(&mut self) {}
}

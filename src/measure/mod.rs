//! Measurement execution.
//!
//! The [`Measurement`] orchestrator plus everything it talks to: the five operator
//! roles ([`PointOperator`], [`ScanOperator`], [`TriggerOperator`], [`LimitOperator`],
//! [`StatusOperator`]), their stock implementations, the [`scanset`] proxy and the
//! signal primitives that carry operator completions back to the measurement.

mod actuators;
mod engine;
mod limits;
mod operators;
mod points;
mod reporting;
mod scanset;
mod signal;
mod status;

pub use actuators::{DelayedScan, DelayedTrigger, ImmediateTrigger, VirtualScan};
pub use engine::{Measurement, MeasurementBuilder, MeasurementHandle, Node, NodeEvents};
pub use limits::{CountLimit, ImmediateLimit, ManualLimit, TimeLimit};
pub use operators::{
    LimitOperator, PointOperator, PreparedLimit, PreparedPoints, PreparedScan, PreparedStatus,
    PreparedTrigger, ScanOperator, StatusOperator, TriggerOperator,
};
pub use points::{ExtendablePoints, FixedPoints, InfinitePoints};
pub use reporting::{HiddenStatus, TracingStatus};
pub use scanset::{scanset, ScansetPoints, ScansetScan};
pub use signal::{LocalSignal, Signal, Slot, SlotId};
pub use status::Status;

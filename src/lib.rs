//! # Measure DAQ Core Library
//!
//! A measurement execution engine for scientific data acquisition. A measurement walks
//! a setup through every point of one or more scans: it asks a point operator for the
//! next point, moves the scan axis there, waits for a trigger, acquires until a limit
//! is reached and drives every data channel through the scan and step boundaries in
//! dependency order. Devices take part as nodes and may hold the shared step gate to
//! delay a boundary until they are done.
//!
//! ## Crate Structure
//!
//! - **`measure`**: the [`measure::Measurement`] orchestrator, the five operator roles
//!   with their stock implementations, the scanset proxy and the signal primitives.
//! - **`channel`**: the channel lifecycle contract, the buffered
//!   [`channel::StreamChannel`] with direct, computing and integrating modes, the
//!   channel registry, dependency sorting and text storage.
//! - **`gate`**: the reference-counted run and step gates.
//! - **`config`**: layered configuration from TOML and `MEASURE_DAQ_*` variables.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`simulation`**: a simulated detector node.
//! - **`error`**: the crate-wide [`error::DaqError`].
//!
//! ## Example
//!
//! ```no_run
//! use measure_daq::channel::{ChannelOptions, ChannelRegistry};
//! use measure_daq::gate::Gates;
//! use measure_daq::measure::{FixedPoints, ManualLimit, MeasurementBuilder};
//!
//! # fn main() -> measure_daq::error::AppResult<()> {
//! let registry = ChannelRegistry::new();
//! let detector = registry.open("detector", ChannelOptions::default())?;
//! let mean = registry.open("mean", ChannelOptions::default())?;
//! mean.borrow_mut().set_averaging(&detector)?;
//!
//! let mut measurement = MeasurementBuilder::new(Gates::new())
//!     .channels(registry.shared())
//!     .point_operator(FixedPoints::linear(0.0, 1.0, 11))
//!     .limit_operator(ManualLimit::new())
//!     .build()?;
//! measurement.run()?;
//! measurement.dispatch_pending();
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod gate;
pub mod logging;
pub mod measure;
pub mod simulation;

pub use error::{AppResult, DaqError};

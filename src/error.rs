//! Custom error types for the measurement engine.
//!
//! This module defines the primary error type, `DaqError`, shared by every part of the
//! crate. Using the `thiserror` crate, it provides a centralized and consistent way to
//! report the failures a measurement setup can run into.
//!
//! ## Error Hierarchy
//!
//! - **Run control**: `RunBlockAcquired`, `AlreadyStarted`, `PauseFlagNotSet` and
//!   `MissingOperator` are raised synchronously by the `Measurement` API. A failed
//!   `run()` leaves the measurement untouched; construct a new one to try again.
//! - **Channel configuration**: `ChannelLocked`, `CircularDependency`, `NameInUse`,
//!   `ChannelClosed`, `UnknownChannel`, `UnknownHint`, `UnknownFrequency`,
//!   `StepOutOfRange` and `RemoteModeReserved` come from the channel model.
//! - **`Config`**: semantic or parse errors in the layered configuration.
//! - **`Io`**: wraps `std::io::Error`, mostly from channel storage files.
//!
//! Kernel failures inside computing and integrating channels are *not* represented here.
//! They are logged and isolated to the channel that raised them; the run continues.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors raised by the measurement engine and the channel model.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Another measurement (or an external party) holds the run gate.
    #[error("run block is acquired")]
    RunBlockAcquired,

    /// `run()` was called on a measurement that has already been started.
    #[error("measurement has already been started")]
    AlreadyStarted,

    /// `resume()` was called without the pause flag being set.
    #[error("pause flag is false")]
    PauseFlagNotSet,

    /// A required operator was not supplied to the builder.
    #[error("no {0} operator supplied")]
    MissingOperator(&'static str),

    /// Mode or frequency change attempted while a scan is in progress.
    #[error("channel is locked")]
    ChannelLocked,

    /// The channel dependency relation contains a cycle.
    #[error("circular channel dependency detected")]
    CircularDependency,

    /// A channel with this name is already open.
    #[error("name \"{0}\" already in use")]
    NameInUse(String),

    /// The channel has been closed and no longer accepts subscribers.
    #[error("channel \"{0}\" is closed")]
    ChannelClosed(String),

    /// No open channel carries this name.
    #[error("no channel named \"{0}\"")]
    UnknownChannel(String),

    /// A hint string did not name a known data hint.
    #[error("unknown hint \"{0}\"")]
    UnknownHint(String),

    /// A frequency string did not name a known frequency class.
    #[error("unknown frequency \"{0}\"")]
    UnknownFrequency(String),

    /// A step index beyond the channel's buffers was addressed.
    #[error("step index {0} out of range")]
    StepOutOfRange(usize),

    /// The remote channel mode is declared but has no wire protocol.
    #[error("remote channel mode is reserved and not implemented")]
    RemoteModeReserved,

    /// Configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error, typically from channel storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaqError {
    /// Whether the error belongs to the setup-time configuration class.
    ///
    /// Configuration errors are fatal for the call that raised them and leave a
    /// measurement unusable; I/O errors may be retried by the caller.
    pub fn is_configuration_error(&self) -> bool {
        !matches!(self, DaqError::Io(_))
    }
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(value.to_string())
    }
}

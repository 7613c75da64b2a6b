//! Layered configuration using Figment.
//!
//! Configuration is merged from, in increasing priority:
//! 1. the built-in defaults,
//! 2. a TOML file (`config/measure.toml` by default),
//! 3. environment variables prefixed with `MEASURE_DAQ_`, nested keys separated by `__`.
//!
//! Example: `MEASURE_DAQ_MEASUREMENT__SCAN_COUNT=3`.
//!
//! ```no_run
//! use measure_daq::config::MeasureConfig;
//!
//! # fn main() -> measure_daq::error::AppResult<()> {
//! let config = MeasureConfig::load("config/measure.toml")?;
//! config.validate().map_err(measure_daq::error::DaqError::Config)?;
//! println!("{} scans", config.measurement.scan_count);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelRef;
use crate::error::{AppResult, DaqError};
use crate::measure::{
    CountLimit, DelayedScan, DelayedTrigger, ExtendablePoints, FixedPoints, ImmediateLimit,
    ImmediateTrigger, InfinitePoints, LimitOperator, ManualLimit, PointOperator, ScanOperator,
    TimeLimit, TriggerOperator, VirtualScan,
};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/measure.toml";

/// Prefix of overriding environment variables.
pub const ENV_PREFIX: &str = "MEASURE_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasureConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Run settings
    #[serde(default)]
    pub measurement: MeasurementConfig,
    /// Simulated detector settings
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Measurement run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// Number of scan iterations
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
    /// Directory for channel storage files, no storage if absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<PathBuf>,
    /// Time a scan move takes, zero for a virtual scan
    #[serde(default, with = "humantime_serde")]
    pub scan_delay: Duration,
    /// Time between arming and firing the trigger, zero for an immediate trigger
    #[serde(default, with = "humantime_serde")]
    pub trigger_delay: Duration,
    /// Point source
    #[serde(default)]
    pub points: PointsConfig,
    /// Acquisition limit per step
    #[serde(default)]
    pub limit: LimitConfig,
}

/// Point source selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PointsConfig {
    /// An explicit list
    Fixed {
        /// Points in visiting order
        values: Vec<f64>,
    },
    /// Evenly spaced points, both ends included
    Linear {
        /// First point
        start: f64,
        /// Last point
        stop: f64,
        /// Number of points
        steps: usize,
    },
    /// The step index, without end
    Infinite,
    /// The step index, one step more for every skipped limit
    Extendable,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self::Linear {
            start: 0.0,
            stop: 1.0,
            steps: 5,
        }
    }
}

impl PointsConfig {
    /// Build the point operator.
    pub fn operator(&self) -> Box<dyn PointOperator> {
        match self {
            Self::Fixed { values } => Box::new(FixedPoints::new(values.clone())),
            Self::Linear { start, stop, steps } => {
                Box::new(FixedPoints::linear(*start, *stop, *steps))
            }
            Self::Infinite => Box::new(InfinitePoints::new()),
            Self::Extendable => Box::new(ExtendablePoints::new()),
        }
    }
}

/// Limit selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LimitConfig {
    /// Reached on start
    Immediate,
    /// Reached only on request
    Manual,
    /// Reached after a number of seconds
    Time {
        /// Seconds per step
        seconds: u64,
    },
    /// Reached after a number of detector samples
    Count {
        /// Samples per step
        rows: u64,
    },
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self::Time { seconds: 1 }
    }
}

impl LimitConfig {
    /// Build the limit operator. Count limits watch `detector`.
    pub fn operator(&self, detector: &ChannelRef) -> Box<dyn LimitOperator> {
        match self {
            Self::Immediate => Box::new(ImmediateLimit::new()),
            Self::Manual => Box::new(ManualLimit::new()),
            Self::Time { seconds } => Box::new(TimeLimit::new(*seconds)),
            Self::Count { rows } => Box::new(CountLimit::new(detector.clone(), *rows)),
        }
    }
}

impl MeasurementConfig {
    /// Scan operator for the configured delay.
    pub fn scan_operator(&self) -> Box<dyn ScanOperator> {
        if self.scan_delay.is_zero() {
            Box::new(VirtualScan::new())
        } else {
            Box::new(DelayedScan::new(self.scan_delay))
        }
    }

    /// Trigger operator for the configured delay.
    pub fn trigger_operator(&self) -> Box<dyn TriggerOperator> {
        if self.trigger_delay.is_zero() {
            Box::new(ImmediateTrigger::new())
        } else {
            Box::new(DelayedTrigger::new(self.trigger_delay))
        }
    }
}

/// Simulated detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Interval between two detector samples
    #[serde(default = "default_sample_interval", with = "humantime_serde")]
    pub sample_interval: Duration,
    /// How long the detector holds the step gate after every step
    #[serde(default, with = "humantime_serde")]
    pub step_hold: Duration,
}

// Default value functions
fn default_name() -> String {
    "measure_daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_scan_count() -> usize {
    1
}

fn default_sample_interval() -> Duration {
    Duration::from_millis(100)
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            scan_count: default_scan_count(),
            storage_root: None,
            scan_delay: Duration::ZERO,
            trigger_delay: Duration::ZERO,
            points: PointsConfig::default(),
            limit: LimitConfig::default(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sample_interval: default_sample_interval(),
            step_hold: Duration::ZERO,
        }
    }
}

impl MeasureConfig {
    /// Load defaults, then `path` if it exists, then `MEASURE_DAQ_*` variables.
    ///
    /// # Errors
    ///
    /// [`DaqError::Config`] if a source does not parse or has the wrong shape.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::figment(path).extract().map_err(DaqError::from)
    }

    /// The provider stack used by [`MeasureConfig::load`].
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(MeasureConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.measurement.scan_count == 0 {
            return Err("scan_count must be at least 1".to_string());
        }

        match &self.measurement.points {
            PointsConfig::Linear { steps: 0, .. } => {
                return Err("linear points need at least 1 step".to_string())
            }
            PointsConfig::Fixed { values } if values.is_empty() => {
                return Err("fixed points need at least 1 value".to_string())
            }
            _ => {}
        }

        if let LimitConfig::Count { rows: 0 } = self.measurement.limit {
            return Err("count limit needs at least 1 row".to_string());
        }

        if self.simulation.sample_interval.is_zero() {
            return Err("sample_interval must be positive".to_string());
        }

        Ok(())
    }

    /// Serialize as TOML, e.g. to write a default file.
    ///
    /// # Errors
    ///
    /// [`DaqError::Config`] if serialization fails.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| DaqError::Config(e.to_string()))
    }
}

//! Measurement status codes.

use serde::{Deserialize, Serialize};

/// Phase of a running measurement.
///
/// ```text
/// Standby ─run─> Preparing ─> EnteringScan ─> EnteringStep ─> Configuring
///                                  ▲            │  ▲   │          │
///                                  │    depleted│  │   ▼          ▼
///                                  │            │  Paused    TriggerArmed
///                                  │            ▼                 │
///                              LeavingScan <── LeavingStep <── Running
///                                  │
///                                  ▼
///                             Finalizing ─> Standby
/// ```
///
/// The numeric codes are stable and reported to status operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Status {
    /// Idle, no run in progress.
    #[default]
    Standby = 0,
    /// Operators prepared, waiting for nodes to get ready.
    Preparing = 1,
    /// A scan iteration begins.
    EnteringScan = 2,
    /// A step begins, a point is being requested.
    EnteringStep = 3,
    /// The scan operator moves to the point.
    Configuring = 4,
    /// Waiting for the trigger.
    TriggerArmed = 5,
    /// Acquiring data until the limit is reached.
    Running = 6,
    /// Acquisition stopped, waiting for nodes.
    LeavingStep = 7,
    /// A scan iteration ends.
    LeavingScan = 8,
    /// Run is over, waiting for nodes before returning to standby.
    Finalizing = 9,
    /// Suspended before a step until resumed.
    Paused = 10,
}

impl Status {
    /// Stable numeric code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether a run is in progress.
    pub fn is_active(self) -> bool {
        self != Status::Standby
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Standby => "STANDBY",
            Status::Preparing => "PREPARING",
            Status::EnteringScan => "ENTERING_SCAN",
            Status::EnteringStep => "ENTERING_STEP",
            Status::Configuring => "CONFIGURING",
            Status::TriggerArmed => "TRIGGER_ARMED",
            Status::Running => "RUNNING",
            Status::LeavingStep => "LEAVING_STEP",
            Status::LeavingScan => "LEAVING_SCAN",
            Status::Finalizing => "FINALIZING",
            Status::Paused => "PAUSED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Status::Standby.code(), 0);
        assert_eq!(Status::Running.code(), 6);
        assert_eq!(Status::Paused.code(), 10);
        assert!(!Status::default().is_active());
    }

    #[test]
    fn serializes_with_display_names() {
        let json = serde_json::to_string(&Status::TriggerArmed).unwrap();
        assert_eq!(json, "\"TRIGGER_ARMED\"");
        assert_eq!(Status::TriggerArmed.to_string(), "TRIGGER_ARMED");
    }
}

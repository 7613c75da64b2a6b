//! Status operators.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use super::operators::{PreparedStatus, StatusOperator};
use super::status::Status;

/// Ignores every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct HiddenStatus;

impl StatusOperator for HiddenStatus {
    fn prepare_status(&mut self, _limit_max: u64) -> PreparedStatus {
        PreparedStatus {
            update_status: Arc::new(|_status: Status| {}),
            update_limit: Arc::new(|_progress: u64| {}),
        }
    }
}

/// Reports status changes and limit progress through `tracing`.
///
/// Status changes are logged at debug level, except the start and end of a run which
/// are logged at info level. Progress is logged at debug level as `progress/max`.
#[derive(Debug, Default)]
pub struct TracingStatus {
    limit_max: Arc<AtomicU64>,
}

impl TracingStatus {
    /// Create the operator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusOperator for TracingStatus {
    fn prepare_status(&mut self, limit_max: u64) -> PreparedStatus {
        self.limit_max.store(limit_max, Ordering::SeqCst);
        let max = self.limit_max.clone();

        PreparedStatus {
            update_status: Arc::new(|status: Status| match status {
                Status::Preparing => info!(%status, "measurement started"),
                Status::Standby => info!(%status, "measurement finished"),
                _ => debug!(%status, code = status.code(), "status changed"),
            }),
            update_limit: Arc::new(move |progress: u64| {
                let max = max.load(Ordering::SeqCst);
                if max > 0 {
                    debug!(progress, max, "limit progress");
                } else {
                    debug!(progress, "limit progress");
                }
            }),
        }
    }

    fn finalize_status(&mut self) {
        debug!("status reporting finalized");
    }
}

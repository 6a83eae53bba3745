use std::time::Duration;

use crate::controls::ControlPolicy;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONCILE_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_ROLLBACK_RECONCILE_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timings and business rules for a [`ControlPanel`](crate::panel::ControlPanel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelConfig {
    /// Period of the status poll for each mounted VM. Zero disables polling.
    pub poll_interval: Duration,
    /// One-shot status poll after a successful lifecycle action.
    pub reconcile_delay: Option<Duration>,
    /// One-shot status poll after a successful snapshot rollback.
    pub rollback_reconcile_delay: Option<Duration>,
    /// Upper bound for any single backend request.
    pub request_timeout: Option<Duration>,
    pub controls: ControlPolicy,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconcile_delay: Some(DEFAULT_RECONCILE_DELAY),
            rollback_reconcile_delay: Some(DEFAULT_ROLLBACK_RECONCILE_DELAY),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            controls: ControlPolicy::default(),
        }
    }
}

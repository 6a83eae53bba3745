use std::future::Future;
use std::time::Duration;
use tokio::time::error::Elapsed;

use crate::board::BoardError;
use crate::models::VmState;

pub(crate) const CONNECTIVITY_ERROR: &str = "Could not contact the server.";
pub(crate) const TIMEOUT_ERROR: &str = "The server did not respond in time.";
pub(crate) const UNKNOWN_ERROR: &str = "An unknown error occurred.";
pub(crate) const BUSY_MESSAGE: &str = "Another operation is already in progress for this VM.";

/// Result of a user-triggered operation after it has been surfaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The server accepted the operation. `new_state` is set when the
    /// response declared one and it was applied.
    Succeeded { new_state: Option<VmState> },
    /// Well-formed response with `success = false`; carries the server text.
    Rejected(String),
    /// No usable response.
    Unreachable(String),
    TimedOut,
    /// Another operation holds the VM's action lock. No request was made.
    Busy,
    /// The confirmation prompt was declined. No request was made.
    Declined,
    /// Local validation failed. No request was made.
    Invalid(String),
    NotTracked,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Succeeded { .. })
    }

    /// Whether a request reached (or tried to reach) the backend.
    pub fn issued_request(&self) -> bool {
        matches!(
            self,
            ActionOutcome::Succeeded { .. }
                | ActionOutcome::Rejected(_)
                | ActionOutcome::Unreachable(_)
                | ActionOutcome::TimedOut
        )
    }
}

impl From<BoardError> for ActionOutcome {
    fn from(e: BoardError) -> Self {
        match e {
            BoardError::Busy(_) => ActionOutcome::Busy,
            BoardError::NotTracked(_) => ActionOutcome::NotTracked,
        }
    }
}

/// Await `fut`, giving up after `limit` when one is set.
pub(crate) async fn bounded<F: Future>(
    limit: Option<Duration>,
    fut: F,
) -> Result<F::Output, Elapsed> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await,
        None => Ok(fut.await),
    }
}

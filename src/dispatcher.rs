use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::board::{ActionLock, VmBoard};
use crate::client::VmBackend;
use crate::config::PanelConfig;
use crate::confirm::{self, ConfirmGate};
use crate::models::{ActionResponse, VmAction};
use crate::notify::{Notifier, Severity};
use crate::outcome::{
    ActionOutcome, BUSY_MESSAGE, CONNECTIVITY_ERROR, TIMEOUT_ERROR, UNKNOWN_ERROR, bounded,
};
use crate::poller::PollerRegistry;

/// Sends lifecycle actions for single VMs, one at a time per VM.
pub struct ActionDispatcher {
    board: Arc<VmBoard>,
    backend: Arc<dyn VmBackend>,
    notifier: Arc<dyn Notifier>,
    confirm: Arc<dyn ConfirmGate>,
    pollers: PollerRegistry,
    request_timeout: Option<Duration>,
    reconcile_delay: Option<Duration>,
}

impl ActionDispatcher {
    pub fn new(
        board: Arc<VmBoard>,
        backend: Arc<dyn VmBackend>,
        notifier: Arc<dyn Notifier>,
        confirm: Arc<dyn ConfirmGate>,
        pollers: PollerRegistry,
        config: &PanelConfig,
    ) -> Self {
        Self {
            board,
            backend,
            notifier,
            confirm,
            pollers,
            request_timeout: config.request_timeout,
            reconcile_delay: config.reconcile_delay,
        }
    }

    /// User-facing entry point: stop and restart are confirmed before they
    /// are dispatched.
    pub async fn invoke(&self, vm_id: &str, action: VmAction) -> ActionOutcome {
        if self.board.is_locked(vm_id) {
            return self.busy(vm_id, action);
        }

        if action.requires_confirmation() {
            let (title, message) = confirm::action_prompt(action);
            if !self.confirm.confirm(title, &message).await {
                debug!(vm_id, %action, "action declined");
                return ActionOutcome::Declined;
            }
        }

        self.dispatch(vm_id, action).await
    }

    /// Send `action` for `vm_id`.
    ///
    /// Rejected with [`ActionOutcome::Busy`] and no request while another
    /// operation holds the VM's lock. Otherwise exactly one request is made
    /// and the lock is released once, whichever way it resolves.
    pub async fn dispatch(&self, vm_id: &str, action: VmAction) -> ActionOutcome {
        let lock = match self.board.try_lock(vm_id, action.into()) {
            Ok(lock) => lock,
            Err(e) => {
                let outcome = ActionOutcome::from(e);
                if outcome == ActionOutcome::Busy {
                    return self.busy(vm_id, action);
                }
                warn!(vm_id, %action, "dispatch for untracked VM");
                return outcome;
            }
        };

        debug!(vm_id, %action, "dispatching action");
        let result = bounded(self.request_timeout, self.backend.perform(vm_id, action)).await;

        let outcome = match result {
            Ok(Ok(response)) if response.success => self.apply_success(&lock, action, response),
            Ok(Ok(response)) => {
                let error = response
                    .error
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                info!(vm_id, %action, %error, "action rejected by server");
                self.notifier
                    .notify(Severity::Error, "VM Action Failed", &error);
                ActionOutcome::Rejected(error)
            }
            Ok(Err(e)) => {
                warn!(vm_id, %action, error = %e, "action request failed");
                self.notifier
                    .notify(Severity::Error, "VM Action Error", CONNECTIVITY_ERROR);
                ActionOutcome::Unreachable(e.to_string())
            }
            Err(_) => {
                warn!(vm_id, %action, "action request timed out");
                self.notifier
                    .notify(Severity::Error, "VM Action Error", TIMEOUT_ERROR);
                ActionOutcome::TimedOut
            }
        };

        drop(lock);
        outcome
    }

    fn apply_success(
        &self,
        lock: &ActionLock,
        action: VmAction,
        response: ActionResponse,
    ) -> ActionOutcome {
        let vm_id = lock.vm_id();
        let new_state = response.new_state;
        let current = self
            .board
            .apply_action_result(lock, new_state.clone(), response.state_text);
        if !current {
            debug!(vm_id, %action, "VM unmounted before the action resolved");
        }

        match &new_state {
            Some(state) => info!(vm_id, %action, %state, "action applied"),
            None => info!(vm_id, %action, "action accepted without a declared state"),
        }

        let message = response
            .message
            .unwrap_or_else(|| "Operation completed successfully.".to_string());
        self.notifier.notify(Severity::Success, "VM Action", &message);

        if let (true, Some(delay)) = (current, self.reconcile_delay) {
            self.pollers.schedule_refresh(vm_id, delay);
        }

        ActionOutcome::Succeeded { new_state }
    }

    fn busy(&self, vm_id: &str, action: VmAction) -> ActionOutcome {
        debug!(vm_id, %action, "action rejected, another operation in flight");
        self.notifier.notify(Severity::Warning, "VM Busy", BUSY_MESSAGE);
        ActionOutcome::Busy
    }
}

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::VmBackend;
use crate::config::PanelConfig;
use crate::confirm::{self, ConfirmGate};
use crate::models::VmAction;
use crate::notify::{Notifier, Severity};
use crate::outcome::{ActionOutcome, CONNECTIVITY_ERROR, TIMEOUT_ERROR, UNKNOWN_ERROR, bounded};
use crate::poller::PollerRegistry;

/// Applies one lifecycle action to a selection of VMs as a single request.
pub struct BulkActionCoordinator {
    backend: Arc<dyn VmBackend>,
    notifier: Arc<dyn Notifier>,
    confirm: Arc<dyn ConfirmGate>,
    pollers: PollerRegistry,
    request_timeout: Option<Duration>,
}

impl BulkActionCoordinator {
    pub fn new(
        backend: Arc<dyn VmBackend>,
        notifier: Arc<dyn Notifier>,
        confirm: Arc<dyn ConfirmGate>,
        pollers: PollerRegistry,
        config: &PanelConfig,
    ) -> Self {
        Self {
            backend,
            notifier,
            confirm,
            pollers,
            request_timeout: config.request_timeout,
        }
    }

    /// The response is all-or-nothing. On success every mounted VM is
    /// re-polled, since several states changed at once.
    pub async fn apply(&self, action: VmAction, vm_ids: &[String]) -> ActionOutcome {
        if vm_ids.is_empty() {
            let reason = "Please select at least one VM".to_string();
            self.notifier.notify(Severity::Warning, "Bulk Action", &reason);
            return ActionOutcome::Invalid(reason);
        }

        let (title, message) = confirm::bulk_prompt(action, vm_ids.len());
        if !self.confirm.confirm(title, &message).await {
            debug!(%action, count = vm_ids.len(), "bulk action declined");
            return ActionOutcome::Declined;
        }

        debug!(%action, count = vm_ids.len(), "dispatching bulk action");
        let result = bounded(self.request_timeout, self.backend.bulk_action(action, vm_ids)).await;

        match result {
            Ok(Ok(response)) if response.success => {
                let message = response.message.unwrap_or_else(|| {
                    format!("{} requested for {} VM(s)", action, vm_ids.len())
                });
                info!(%action, count = vm_ids.len(), "bulk action accepted");
                self.notifier.notify(Severity::Success, "Bulk Action", &message);
                self.pollers.refresh_all().await;
                ActionOutcome::Succeeded { new_state: None }
            }
            Ok(Ok(response)) => {
                let error = response.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                info!(%action, %error, "bulk action rejected by server");
                self.notifier
                    .notify(Severity::Error, "Bulk Action Failed", &error);
                ActionOutcome::Rejected(error)
            }
            Ok(Err(e)) => {
                warn!(%action, error = %e, "bulk action request failed");
                self.notifier
                    .notify(Severity::Error, "Bulk Action Error", CONNECTIVITY_ERROR);
                ActionOutcome::Unreachable(e.to_string())
            }
            Err(_) => {
                warn!(%action, "bulk action request timed out");
                self.notifier
                    .notify(Severity::Error, "Bulk Action Error", TIMEOUT_ERROR);
                ActionOutcome::TimedOut
            }
        }
    }
}

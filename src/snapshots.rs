use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::board::{VmBoard, VmView};
use crate::client::{ClientError, VmBackend};
use crate::config::PanelConfig;
use crate::confirm::{self, ConfirmGate};
use crate::controls::Controls;
use crate::models::{Snapshot, SnapshotResponse, Verb};
use crate::notify::{Notifier, Severity};
use crate::outcome::{
    ActionOutcome, BUSY_MESSAGE, CONNECTIVITY_ERROR, TIMEOUT_ERROR, UNKNOWN_ERROR, bounded,
};
use crate::poller::PollerRegistry;
use tokio::time::error::Elapsed;

/// Create, rollback and delete for the snapshot set of mounted VMs.
///
/// Each operation holds the VM's action lock while its request is in
/// flight, and is refused locally while the VM's snapshot control is
/// disabled. Rollback and delete are confirmed first; declining makes no
/// request and changes nothing.
pub struct SnapshotManager {
    board: Arc<VmBoard>,
    backend: Arc<dyn VmBackend>,
    notifier: Arc<dyn Notifier>,
    confirm: Arc<dyn ConfirmGate>,
    pollers: PollerRegistry,
    request_timeout: Option<Duration>,
    rollback_reconcile_delay: Option<Duration>,
}

/// Titles used when surfacing one snapshot operation.
struct Titles {
    failed: &'static str,
    error: &'static str,
}

impl SnapshotManager {
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
            rollback_reconcile_delay: config.rollback_reconcile_delay,
        }
    }

    pub fn list(&self, vm_id: &str) -> Option<Vec<Snapshot>> {
        self.board.get(vm_id).map(|view| view.snapshots)
    }

    /// Re-fetch the snapshot list of `vm_id` and replace the tracked one.
    /// Returns the new number of entries, or `None` when the list could not
    /// be fetched (the tracked list is then left as it was).
    pub async fn refresh(&self, vm_id: &str) -> Option<usize> {
        let response = match bounded(self.request_timeout, self.backend.list_snapshots(vm_id)).await {
            Ok(Ok(response)) if response.success => response,
            Ok(Ok(response)) => {
                let error = response.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                warn!(vm_id, %error, "snapshot list rejected");
                self.notifier
                    .notify(Severity::Warning, "Snapshots", &error);
                return None;
            }
            Ok(Err(e)) => {
                warn!(vm_id, error = %e, "snapshot list request failed");
                self.notifier
                    .notify(Severity::Warning, "Snapshots", CONNECTIVITY_ERROR);
                return None;
            }
            Err(_) => {
                warn!(vm_id, "snapshot list request timed out");
                self.notifier
                    .notify(Severity::Warning, "Snapshots", TIMEOUT_ERROR);
                return None;
            }
        };

        let snapshots: Vec<Snapshot> = response
            .snapshots
            .into_iter()
            .map(|record| Snapshot::from_record(vm_id, record))
            .collect();
        let count = snapshots.len();

        if !self.board.replace_snapshots(vm_id, snapshots) {
            debug!(vm_id, "snapshot list fetched for an unmounted VM");
            return None;
        }
        debug!(vm_id, count, "snapshot list refreshed");
        Some(count)
    }

    /// Create a snapshot named `name`. The list is re-fetched on success
    /// since the new entry's position is only known to the server.
    pub async fn create(&self, vm_id: &str, name: &str, description: &str) -> ActionOutcome {
        let name = name.trim();
        if name.is_empty() {
            let reason = "Snapshot name is required.".to_string();
            self.notifier.notify(Severity::Warning, "Snapshot", &reason);
            return ActionOutcome::Invalid(reason);
        }
        if let Err(outcome) = self.available(vm_id) {
            return outcome;
        }

        let lock = match self.board.try_lock(vm_id, Verb::CreateSnapshot) {
            Ok(lock) => lock,
            Err(e) => return self.lock_refused(ActionOutcome::from(e)),
        };

        debug!(vm_id, name, "creating snapshot");
        let result = bounded(
            self.request_timeout,
            self.backend.create_snapshot(vm_id, name, description.trim()),
        )
        .await;

        let titles = Titles {
            failed: "Snapshot Failed",
            error: "Snapshot Error",
        };
        let outcome = self.classify(vm_id, Verb::CreateSnapshot, result, &titles);
        if outcome.is_success() {
            info!(vm_id, name, "snapshot created");
            self.notifier.notify(
                Severity::Success,
                "Snapshot Created",
                &format!("Snapshot \"{}\" created successfully", name),
            );
            if lock.is_current() {
                self.refresh(vm_id).await;
            }
        }

        drop(lock);
        outcome
    }

    /// Revert `vm_id` to the snapshot addressed by `snapshot_ref` (its
    /// hypervisor reference, id or name). The VM restarts; its new state is
    /// picked up by a deferred poll.
    pub async fn rollback(&self, vm_id: &str, snapshot_ref: &str) -> ActionOutcome {
        let (reference, label) = match self.resolve(vm_id, snapshot_ref) {
            Ok(resolved) => resolved,
            Err(outcome) => return outcome,
        };

        let (title, message) = confirm::rollback_prompt(&label);
        if !self.confirm.confirm(title, &message).await {
            debug!(vm_id, snapshot = %reference, "rollback declined");
            return ActionOutcome::Declined;
        }

        let lock = match self.board.try_lock(vm_id, Verb::RollbackSnapshot) {
            Ok(lock) => lock,
            Err(e) => return self.lock_refused(ActionOutcome::from(e)),
        };

        debug!(vm_id, snapshot = %reference, "rolling back snapshot");
        let result = bounded(
            self.request_timeout,
            self.backend.rollback_snapshot(vm_id, &reference),
        )
        .await;

        let titles = Titles {
            failed: "Rollback Failed",
            error: "Rollback Error",
        };
        let outcome = self.classify(vm_id, Verb::RollbackSnapshot, result, &titles);
        if outcome.is_success() {
            info!(vm_id, snapshot = %reference, "rollback started");
            self.notifier.notify(
                Severity::Success,
                "Snapshot Restored",
                "Rollback started successfully! The VM will now restart.",
            );
            if let (true, Some(delay)) = (lock.is_current(), self.rollback_reconcile_delay) {
                self.pollers.schedule_refresh(vm_id, delay);
            }
        }

        drop(lock);
        outcome
    }

    /// Delete the snapshot addressed by `snapshot_ref`. On success exactly
    /// that entry leaves the tracked list.
    pub async fn delete(&self, vm_id: &str, snapshot_ref: &str) -> ActionOutcome {
        let (reference, label) = match self.resolve(vm_id, snapshot_ref) {
            Ok(resolved) => resolved,
            Err(outcome) => return outcome,
        };

        let (title, message) = confirm::delete_prompt(&label);
        if !self.confirm.confirm(title, &message).await {
            debug!(vm_id, snapshot = %reference, "delete declined");
            return ActionOutcome::Declined;
        }

        let lock = match self.board.try_lock(vm_id, Verb::DeleteSnapshot) {
            Ok(lock) => lock,
            Err(e) => return self.lock_refused(ActionOutcome::from(e)),
        };

        debug!(vm_id, snapshot = %reference, "deleting snapshot");
        let result = bounded(
            self.request_timeout,
            self.backend.delete_snapshot(vm_id, &reference),
        )
        .await;

        let titles = Titles {
            failed: "Delete Failed",
            error: "Delete Error",
        };
        let outcome = self.classify(vm_id, Verb::DeleteSnapshot, result, &titles);
        if outcome.is_success() {
            match self.board.remove_snapshot(&lock, &reference) {
                Some(removed) => info!(vm_id, snapshot = %removed.proxmox_name, "snapshot deleted"),
                None => debug!(vm_id, snapshot = %reference, "deleted snapshot was not tracked"),
            }
            self.notifier.notify(
                Severity::Success,
                "Snapshot Deleted",
                "Snapshot deleted successfully",
            );
        }

        drop(lock);
        outcome
    }

    /// The view of `vm_id` if a snapshot operation may start on it now.
    fn available(&self, vm_id: &str) -> Result<VmView, ActionOutcome> {
        let Some(view) = self.board.get(vm_id) else {
            return Err(ActionOutcome::NotTracked);
        };
        if view.action_lock() {
            return Err(self.lock_refused(ActionOutcome::Busy));
        }
        if !Controls::for_state(&view.state, self.board.policy()).snapshot {
            let reason = format!("Snapshots are not available while the VM is {}.", view.label());
            debug!(vm_id, state = %view.state, "snapshot operation refused");
            self.notifier.notify(Severity::Warning, "Snapshot", &reason);
            return Err(ActionOutcome::Invalid(reason));
        }
        Ok(view)
    }

    /// Map a user-supplied reference to the hypervisor reference and a label
    /// for the confirmation prompt. Refuses early when the VM is busy or its
    /// snapshot control is off, so the user is not asked to confirm something
    /// that cannot run.
    fn resolve(&self, vm_id: &str, snapshot_ref: &str) -> Result<(String, String), ActionOutcome> {
        let view = self.available(vm_id)?;

        Ok(match view.find_snapshot(snapshot_ref) {
            Some(snapshot) => (snapshot.proxmox_name.clone(), snapshot.name.clone()),
            None => (snapshot_ref.to_string(), snapshot_ref.to_string()),
        })
    }

    fn classify(
        &self,
        vm_id: &str,
        verb: Verb,
        result: Result<Result<SnapshotResponse, ClientError>, Elapsed>,
        titles: &Titles,
    ) -> ActionOutcome {
        match result {
            Ok(Ok(response)) if response.success => ActionOutcome::Succeeded { new_state: None },
            Ok(Ok(response)) => {
                let error = response.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                info!(vm_id, %verb, %error, "snapshot operation rejected by server");
                self.notifier.notify(Severity::Error, titles.failed, &error);
                ActionOutcome::Rejected(error)
            }
            Ok(Err(e)) => {
                warn!(vm_id, %verb, error = %e, "snapshot request failed");
                self.notifier
                    .notify(Severity::Error, titles.error, CONNECTIVITY_ERROR);
                ActionOutcome::Unreachable(e.to_string())
            }
            Err(_) => {
                warn!(vm_id, %verb, "snapshot request timed out");
                self.notifier
                    .notify(Severity::Error, titles.error, TIMEOUT_ERROR);
                ActionOutcome::TimedOut
            }
        }
    }

    fn lock_refused(&self, outcome: ActionOutcome) -> ActionOutcome {
        if outcome == ActionOutcome::Busy {
            self.notifier.notify(Severity::Warning, "VM Busy", BUSY_MESSAGE);
        }
        outcome
    }
}

//! Yes/no gate placed in front of destructive operations.
//!
//! Callers issue the guarded request only when [`ConfirmGate::confirm`]
//! resolves to `true`. The gate is async so a non-blocking UI can resolve it
//! later; the terminal implementation answers immediately.

use async_trait::async_trait;

use crate::models::VmAction;

#[async_trait]
pub trait ConfirmGate: Send + Sync {
    async fn confirm(&self, title: &str, message: &str) -> bool;
}

/// Title and message for confirming a single-VM lifecycle action.
pub fn action_prompt(action: VmAction) -> (&'static str, String) {
    match action {
        VmAction::Start => (
            "Start VM",
            "Are you sure you want to start this virtual machine?".to_string(),
        ),
        VmAction::Stop => (
            "Stop VM",
            "Are you sure you want to stop this virtual machine?".to_string(),
        ),
        VmAction::Restart => (
            "Restart VM",
            "Are you sure you want to restart this virtual machine?".to_string(),
        ),
    }
}

pub fn rollback_prompt(snapshot_name: &str) -> (&'static str, String) {
    (
        "Restore Snapshot",
        format!(
            "Are you sure you want to rollback to snapshot \"{}\"? This will revert the VM to \
             the state of this snapshot and restart it. This CANNOT be undone.",
            snapshot_name
        ),
    )
}

pub fn delete_prompt(snapshot_name: &str) -> (&'static str, String) {
    (
        "Delete Snapshot",
        format!(
            "Are you sure you want to delete snapshot \"{}\"? This CANNOT be undone.",
            snapshot_name
        ),
    )
}

pub fn bulk_prompt(action: VmAction, count: usize) -> (&'static str, String) {
    (
        "Bulk Action",
        format!("Are you sure you want to {} {} VM(s)?", action, count),
    )
}

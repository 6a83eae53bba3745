mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use vm_rental_portal::ActionOutcome;
use vm_rental_portal::controls::{ControlPolicy, Controls};
use vm_rental_portal::models::{ActionResponse, Verb, VmAction, VmState};
use vm_rental_portal::notify::Severity;

// ============================================================================
// Successful Dispatch Tests
// ============================================================================

#[tokio::test]
async fn test_stop_running_vm_applies_declared_state() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "active"));
    h.backend.push_perform(Reply::Ok(action_ok("stopped")));

    let outcome = h.panel.dispatcher().dispatch("42", VmAction::Stop).await;

    assert_eq!(
        outcome,
        ActionOutcome::Succeeded {
            new_state: Some(VmState::Stopped)
        }
    );
    let view = h.panel.view("42").unwrap();
    assert_eq!(view.state, VmState::Stopped);
    assert_eq!(view.label(), "Stopped");
    assert!(!view.action_lock());

    let controls = h.panel.controls("42").unwrap();
    assert!(controls.start);
    assert!(!controls.stop);
    assert!(!controls.restart);
    assert!(!controls.console);

    assert_eq!(h.backend.calls(), vec![Call::Perform("42".into(), VmAction::Stop)]);
    let (severity, title, _) = h.notifier.last().unwrap();
    assert_eq!(severity, Severity::Success);
    assert_eq!(title, "VM Action");
}

#[tokio::test]
async fn test_success_without_declared_state_keeps_state() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "stopped"));
    h.backend.push_perform(Reply::Ok(ActionResponse {
        success: true,
        message: Some("Start requested".into()),
        ..Default::default()
    }));

    let outcome = h.panel.dispatcher().dispatch("42", VmAction::Start).await;

    assert_eq!(outcome, ActionOutcome::Succeeded { new_state: None });
    assert_eq!(h.panel.view("42").unwrap().state, VmState::Stopped);
    assert_eq!(
        h.notifier.last().unwrap().2,
        "Start requested".to_string()
    );
}

#[tokio::test]
async fn test_state_text_overrides_label_until_next_status() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "stopped"));
    h.backend.push_perform(Reply::Ok(ActionResponse {
        success: true,
        new_state: Some(VmState::Active),
        state_text: Some("Booting".into()),
        ..Default::default()
    }));

    h.panel.dispatcher().dispatch("42", VmAction::Start).await;
    assert_eq!(h.panel.view("42").unwrap().label(), "Booting");

    h.backend.push_status(Reply::Ok(status_ok("running")));
    h.panel.refresh("42").await;
    assert_eq!(h.panel.view("42").unwrap().label(), "Running");
}

// ============================================================================
// Action Lock Tests
// ============================================================================

#[tokio::test]
async fn test_dispatch_while_locked_makes_no_request() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "active"));

    let lock = h.panel.board().try_lock("42", Verb::Restart).unwrap();
    let outcome = h.panel.dispatcher().dispatch("42", VmAction::Stop).await;
    drop(lock);

    assert_eq!(outcome, ActionOutcome::Busy);
    assert!(!outcome.issued_request());
    assert_eq!(h.backend.perform_calls(), 0);
    assert_eq!(h.notifier.last().unwrap().0, Severity::Warning);
    assert!(!h.panel.board().is_locked("42"));
}

#[tokio::test]
async fn test_second_dispatch_during_first_is_rejected() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "active"));

    let gate = Arc::new(Notify::new());
    h.backend
        .push_perform(Reply::Gated(gate.clone(), action_ok("stopped")));

    let first = h.panel.dispatcher().dispatch("42", VmAction::Stop);
    let second = async {
        tokio::task::yield_now().await;
        let outcome = h.panel.dispatcher().dispatch("42", VmAction::Restart).await;
        gate.notify_one();
        outcome
    };
    let (first, second) = tokio::join!(first, second);

    assert!(first.is_success());
    assert_eq!(second, ActionOutcome::Busy);
    assert_eq!(h.backend.perform_calls(), 1);
    assert!(!h.panel.board().is_locked("42"));
}

#[tokio::test]
async fn test_lock_is_held_while_request_in_flight() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "active"));

    let gate = Arc::new(Notify::new());
    h.backend
        .push_perform(Reply::Gated(gate.clone(), action_ok("stopped")));

    let dispatch = h.panel.dispatcher().dispatch("42", VmAction::Stop);
    let observe = async {
        tokio::task::yield_now().await;
        let view = h.panel.view("42").unwrap();
        let controls = h.panel.controls("42").unwrap();
        gate.notify_one();
        (view, controls)
    };
    let (outcome, (view, controls)) = tokio::join!(dispatch, observe);

    assert!(outcome.is_success());
    assert_eq!(view.in_flight, Some(Verb::Stop));
    assert_eq!(view.pending_message(), Some("Stopping VM..."));
    assert_eq!(
        controls,
        Controls::for_state(&VmState::Active, ControlPolicy::default()).locked()
    );
}

#[tokio::test]
async fn test_dropped_dispatch_releases_lock() {
    let config = vm_rental_portal::config::PanelConfig {
        request_timeout: None,
        ..quiet_config()
    };
    let h = harness(config, ScriptedConfirm::accept());
    h.panel.mount(seed("42", "active"));
    h.backend.push_perform(Reply::Hang);

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        h.panel.dispatcher().dispatch("42", VmAction::Stop),
    )
    .await;

    assert!(cancelled.is_err());
    assert!(!h.panel.board().is_locked("42"));
    assert_eq!(h.panel.view("42").unwrap().state, VmState::Active);
}

#[tokio::test]
async fn test_dispatch_for_unmounted_vm() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());

    let outcome = h.panel.dispatcher().dispatch("404", VmAction::Start).await;

    assert_eq!(outcome, ActionOutcome::NotTracked);
    assert!(h.backend.calls().is_empty());
}

// ============================================================================
// Failed Dispatch Tests
// ============================================================================

#[tokio::test]
async fn test_rejected_action_leaves_view_unchanged() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "active"));
    let before = h.panel.view("42").unwrap();
    h.backend
        .push_perform(Reply::Ok(action_failed("Quota exceeded for this VM")));

    let outcome = h.panel.dispatcher().dispatch("42", VmAction::Stop).await;

    assert_eq!(
        outcome,
        ActionOutcome::Rejected("Quota exceeded for this VM".into())
    );
    assert_eq!(h.panel.view("42").unwrap(), before);
    let (severity, title, message) = h.notifier.last().unwrap();
    assert_eq!(severity, Severity::Error);
    assert_eq!(title, "VM Action Failed");
    assert_eq!(message, "Quota exceeded for this VM");
}

#[tokio::test]
async fn test_rejected_action_without_error_text() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "active"));
    h.backend.push_perform(Reply::Ok(ActionResponse::default()));

    let outcome = h.panel.dispatcher().dispatch("42", VmAction::Stop).await;

    assert_eq!(
        outcome,
        ActionOutcome::Rejected("An unknown error occurred.".into())
    );
}

#[tokio::test]
async fn test_unreachable_server_leaves_view_unchanged() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "active"));
    let before = h.panel.view("42").unwrap();
    h.backend.push_perform(Reply::Fail);

    let outcome = h.panel.dispatcher().dispatch("42", VmAction::Restart).await;

    assert!(matches!(outcome, ActionOutcome::Unreachable(_)));
    assert_eq!(h.panel.view("42").unwrap(), before);
    let (_, title, message) = h.notifier.last().unwrap();
    assert_eq!(title, "VM Action Error");
    assert_eq!(message, "Could not contact the server.");
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_action_releases_lock() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "active"));
    let before = h.panel.view("42").unwrap();
    h.backend.push_perform(Reply::Hang);

    let outcome = h.panel.dispatcher().dispatch("42", VmAction::Stop).await;

    assert_eq!(outcome, ActionOutcome::TimedOut);
    assert_eq!(h.panel.view("42").unwrap(), before);
    assert_eq!(
        h.notifier.last().unwrap().2,
        "The server did not respond in time."
    );
}

#[tokio::test]
async fn test_vm_usable_again_after_failure() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "active"));
    h.backend.push_perform(Reply::Fail);
    h.backend.push_perform(Reply::Ok(action_ok("stopped")));

    let first = h.panel.dispatcher().dispatch("42", VmAction::Stop).await;
    let second = h.panel.dispatcher().dispatch("42", VmAction::Stop).await;

    assert!(matches!(first, ActionOutcome::Unreachable(_)));
    assert!(second.is_success());
    assert_eq!(h.backend.perform_calls(), 2);
}

// ============================================================================
// Confirmation Tests
// ============================================================================

#[tokio::test]
async fn test_declined_stop_makes_no_request() {
    let h = harness(quiet_config(), ScriptedConfirm::decline());
    h.panel.mount(seed("42", "active"));

    let outcome = h.panel.dispatcher().invoke("42", VmAction::Stop).await;

    assert_eq!(outcome, ActionOutcome::Declined);
    assert!(h.backend.calls().is_empty());
    assert_eq!(h.confirm.prompts().len(), 1);
    assert_eq!(h.confirm.prompts()[0].0, "Stop VM");
    assert_eq!(h.panel.view("42").unwrap().state, VmState::Active);
}

#[tokio::test]
async fn test_start_is_not_confirmed() {
    let h = harness(quiet_config(), ScriptedConfirm::decline());
    h.panel.mount(seed("42", "stopped"));
    h.backend.push_perform(Reply::Ok(action_ok("active")));

    let outcome = h.panel.dispatcher().invoke("42", VmAction::Start).await;

    assert!(outcome.is_success());
    assert!(h.confirm.prompts().is_empty());
}

#[tokio::test]
async fn test_invoke_on_busy_vm_does_not_prompt() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "active"));

    let _lock = h.panel.board().try_lock("42", Verb::CreateSnapshot).unwrap();
    let outcome = h.panel.dispatcher().invoke("42", VmAction::Restart).await;

    assert_eq!(outcome, ActionOutcome::Busy);
    assert!(h.confirm.prompts().is_empty());
    assert!(h.backend.calls().is_empty());
}

// ============================================================================
// Reconciliation Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_successful_action_schedules_follow_up_poll() {
    let config = vm_rental_portal::config::PanelConfig {
        reconcile_delay: Some(Duration::from_secs(2)),
        ..quiet_config()
    };
    let h = harness(config, ScriptedConfirm::accept());
    h.panel.mount(seed("42", "stopped"));
    h.backend.push_perform(Reply::Ok(ActionResponse {
        success: true,
        ..Default::default()
    }));
    h.backend.push_status(Reply::Ok(status_ok("running")));

    h.panel.dispatcher().dispatch("42", VmAction::Start).await;
    assert_eq!(h.panel.view("42").unwrap().state, VmState::Stopped);
    assert_eq!(h.backend.status_calls(), 0);

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(h.backend.status_calls(), 1);
    assert_eq!(h.panel.view("42").unwrap().state, VmState::Running);
}

#[tokio::test(start_paused = true)]
async fn test_failed_action_schedules_nothing() {
    let config = vm_rental_portal::config::PanelConfig {
        reconcile_delay: Some(Duration::from_secs(2)),
        ..quiet_config()
    };
    let h = harness(config, ScriptedConfirm::accept());
    h.panel.mount(seed("42", "stopped"));
    h.backend.push_perform(Reply::Ok(action_failed("no capacity")));

    h.panel.dispatcher().dispatch("42", VmAction::Start).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(h.backend.status_calls(), 0);
}

#[tokio::test]
async fn test_declared_label_without_state_is_ignored() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "stopped"));
    h.backend.push_perform(Reply::Ok(ActionResponse {
        success: true,
        state_text: Some("Running".into()),
        ..Default::default()
    }));

    h.panel.dispatcher().dispatch("42", VmAction::Start).await;

    let view = h.panel.view("42").unwrap();
    assert_eq!(view.label(), "Stopped");
    assert_eq!(view.state_text, None);
    assert!(h.panel.controls("42").unwrap().start);
}

// ============================================================================
// Mount Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_stale_action_after_remount_keeps_new_lock() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "active"));

    let gate = Arc::new(Notify::new());
    h.backend
        .push_perform(Reply::Gated(gate.clone(), action_ok("stopped")));

    let stale = h.panel.dispatcher().dispatch("42", VmAction::Stop);
    let remount = async {
        tokio::task::yield_now().await;
        h.panel.unmount("42");
        h.panel.mount(seed("42", "active"));
        let current = h.panel.board().try_lock("42", Verb::Restart).unwrap();
        gate.notify_one();
        current
    };
    let (_, current) = tokio::join!(stale, remount);

    // The old request finished; the new mount's operation still owns the VM.
    let view = h.panel.view("42").unwrap();
    assert!(view.action_lock());
    assert_eq!(view.in_flight, Some(Verb::Restart));
    assert_eq!(view.state, VmState::Active);

    let third = h.panel.dispatcher().dispatch("42", VmAction::Start).await;
    assert_eq!(third, ActionOutcome::Busy);
    assert_eq!(h.backend.perform_calls(), 1);

    drop(current);
    assert!(!h.panel.board().is_locked("42"));
}

#[tokio::test]
async fn test_unmount_during_action_does_not_resurrect_view() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "active"));

    let gate = Arc::new(Notify::new());
    h.backend
        .push_perform(Reply::Gated(gate.clone(), action_ok("stopped")));

    let dispatch = h.panel.dispatcher().dispatch("42", VmAction::Stop);
    let unmount = async {
        tokio::task::yield_now().await;
        assert!(h.panel.unmount("42"));
        gate.notify_one();
    };
    let (outcome, ()) = tokio::join!(dispatch, unmount);

    assert!(outcome.is_success());
    assert!(h.panel.view("42").is_none());
    assert!(!h.panel.board().is_tracked("42"));
    assert_eq!(h.panel.pollers().active(), 0);
}

#[tokio::test]
async fn test_remount_without_unmount_keeps_lock() {
    let h = harness(quiet_config(), ScriptedConfirm::accept());
    h.panel.mount(seed("42", "active"));

    let lock = h.panel.board().try_lock("42", Verb::Stop).unwrap();
    h.panel.mount(seed("42", "active"));
    assert!(h.panel.board().is_locked("42"));
    assert!(lock.is_current());

    drop(lock);
    assert!(!h.panel.board().is_locked("42"));
}

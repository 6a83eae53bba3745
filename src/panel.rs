use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::board::{VmBoard, VmView};
use crate::bulk::BulkActionCoordinator;
use crate::client::{ClientError, VmBackend};
use crate::config::PanelConfig;
use crate::confirm::ConfirmGate;
use crate::controls::Controls;
use crate::dispatcher::ActionDispatcher;
use crate::models::{Snapshot, VmSeed, VmState};
use crate::notify::Notifier;
use crate::outcome::bounded;
use crate::poller::{PollResult, PollerRegistry};
use crate::snapshots::SnapshotManager;

#[derive(Error, Debug)]
pub enum PanelError {
    #[error("VM not tracked: {0}")]
    NotTracked(String),

    #[error("Console is not available while the VM is {0}")]
    ConsoleUnavailable(String),

    #[error("{0}")]
    Rejected(String),

    #[error("Request timed out")]
    TimedOut,

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// The VM control surface: tracked views, their pollers and the components
/// that mutate them. Collaborators are injected; nothing here knows how the
/// result is rendered.
pub struct ControlPanel {
    config: PanelConfig,
    board: Arc<VmBoard>,
    backend: Arc<dyn VmBackend>,
    pollers: PollerRegistry,
    dispatcher: ActionDispatcher,
    snapshots: SnapshotManager,
    bulk: BulkActionCoordinator,
}

impl ControlPanel {
    pub fn new(
        config: PanelConfig,
        backend: Arc<dyn VmBackend>,
        notifier: Arc<dyn Notifier>,
        confirm: Arc<dyn ConfirmGate>,
    ) -> Self {
        let board = VmBoard::new(config.controls);
        let pollers = PollerRegistry::new(Arc::clone(&board), Arc::clone(&backend), &config);

        let dispatcher = ActionDispatcher::new(
            Arc::clone(&board),
            Arc::clone(&backend),
            Arc::clone(&notifier),
            Arc::clone(&confirm),
            pollers.clone(),
            &config,
        );
        let snapshots = SnapshotManager::new(
            Arc::clone(&board),
            Arc::clone(&backend),
            Arc::clone(&notifier),
            Arc::clone(&confirm),
            pollers.clone(),
            &config,
        );
        let bulk = BulkActionCoordinator::new(
            Arc::clone(&backend),
            notifier,
            confirm,
            pollers.clone(),
            &config,
        );

        Self {
            config,
            board,
            backend,
            pollers,
            dispatcher,
            snapshots,
            bulk,
        }
    }

    /// Track a VM from its server-rendered state and start its poller.
    pub fn mount(&self, seed: VmSeed) {
        let vm_id = seed.id.clone();
        self.board.track(seed);
        self.pollers.start(&vm_id);
        info!(%vm_id, "control view mounted");
    }

    /// Build the seed from a live status read and the snapshot list, then
    /// mount. Used when no server-rendered state is at hand.
    pub async fn mount_remote(&self, vm_id: &str) -> Result<VmView, PanelError> {
        let status = bounded(self.config.request_timeout, self.backend.status(vm_id))
            .await
            .map_err(|_| PanelError::TimedOut)??;
        if !status.success {
            return Err(PanelError::Rejected(
                status.error.unwrap_or_else(|| format!("VM {} not available", vm_id)),
            ));
        }

        let mut seed = VmSeed::new(vm_id, status.state.unwrap_or(VmState::Unknown));
        seed.uptime = status.uptime;
        self.mount(seed);
        self.snapshots.refresh(vm_id).await;

        self.board
            .get(vm_id)
            .ok_or_else(|| PanelError::NotTracked(vm_id.to_string()))
    }

    /// Stop tracking a VM and cancel its timers. Returns whether it was mounted.
    pub fn unmount(&self, vm_id: &str) -> bool {
        self.pollers.stop(vm_id);
        let was_tracked = self.board.untrack(vm_id).is_some();
        if was_tracked {
            info!(vm_id, "control view unmounted");
        }
        was_tracked
    }

    pub fn view(&self, vm_id: &str) -> Option<VmView> {
        self.board.get(vm_id)
    }

    pub fn views(&self) -> Vec<VmView> {
        self.board.list()
    }

    pub fn controls(&self, vm_id: &str) -> Option<Controls> {
        self.board.controls(vm_id)
    }

    pub fn snapshot_list(&self, vm_id: &str) -> Option<Vec<Snapshot>> {
        self.snapshots.list(vm_id)
    }

    /// Console URL for `vm_id`, provided the console control is enabled.
    pub fn console_url(&self, vm_id: &str) -> Result<String, PanelError> {
        let view = self
            .board
            .get(vm_id)
            .ok_or_else(|| PanelError::NotTracked(vm_id.to_string()))?;
        if !view.controls(self.board.policy()).console {
            return Err(PanelError::ConsoleUnavailable(view.label().to_string()));
        }
        Ok(self.backend.console_url(vm_id))
    }

    /// Manual status refresh through the same path as the poller.
    pub async fn refresh(&self, vm_id: &str) -> PollResult {
        self.pollers.refresh(vm_id).await
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn bulk(&self) -> &BulkActionCoordinator {
        &self.bulk
    }

    pub fn pollers(&self) -> &PollerRegistry {
        &self.pollers
    }

    pub fn board(&self) -> &Arc<VmBoard> {
        &self.board
    }
}

impl Drop for ControlPanel {
    fn drop(&mut self) {
        self.pollers.shutdown();
    }
}

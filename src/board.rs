use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

use crate::controls::{ControlPolicy, Controls};
use crate::models::{Snapshot, Verb, VmSeed, VmState};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    #[error("VM not tracked: {0}")]
    NotTracked(String),

    #[error("An operation is already in progress for VM {0}")]
    Busy(String),
}

/// Displayed state of one mounted VM control view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmView {
    pub id: String,
    pub name: String,
    pub state: VmState,
    /// Label supplied by the server alongside the last applied action result.
    pub state_text: Option<String>,
    pub uptime: Option<String>,
    pub snapshots: Vec<Snapshot>,
    /// Verb currently in flight; `Some` means the action lock is held.
    pub in_flight: Option<Verb>,
}

impl VmView {
    fn from_seed(seed: VmSeed) -> Self {
        Self {
            id: seed.id,
            name: seed.name,
            state: seed.state,
            state_text: None,
            uptime: seed.uptime,
            snapshots: seed.snapshots,
            in_flight: None,
        }
    }

    pub fn action_lock(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn label(&self) -> &str {
        self.state_text
            .as_deref()
            .unwrap_or_else(|| self.state.display())
    }

    pub fn controls(&self, policy: ControlPolicy) -> Controls {
        let controls = Controls::for_state(&self.state, policy);
        if self.action_lock() {
            controls.locked()
        } else {
            controls
        }
    }

    pub fn pending_message(&self) -> Option<&'static str> {
        self.in_flight.map(|verb| verb.pending_message())
    }

    pub fn find_snapshot(&self, key: &str) -> Option<&Snapshot> {
        self.snapshots
            .iter()
            .find(|s| s.proxmox_name == key)
            .or_else(|| self.snapshots.iter().find(|s| s.id == key))
            .or_else(|| self.snapshots.iter().find(|s| s.name == key))
    }
}

/// What happened to a status reading handed to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusApplied {
    Applied,
    /// An action is in flight; its own result is authoritative.
    SkippedLocked,
    NotTracked,
}

/// A tracked view and the mount it belongs to. A fresh mount after an
/// unmount gets a new epoch, so guards taken under the old mount go stale.
#[derive(Debug)]
struct Entry {
    view: VmView,
    epoch: u64,
}

/// All VM views currently mounted, keyed by VM id.
///
/// Critical sections are short and never span an `.await`.
pub struct VmBoard {
    views: Mutex<HashMap<String, Entry>>,
    next_epoch: AtomicU64,
    policy: ControlPolicy,
}

impl VmBoard {
    pub fn new(policy: ControlPolicy) -> Arc<Self> {
        Arc::new(Self {
            views: Mutex::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
            policy,
        })
    }

    fn views(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.views.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> ControlPolicy {
        self.policy
    }

    /// Start tracking a VM. Remounting an already tracked VM refreshes its
    /// seeded fields but keeps its epoch and any in-flight operation.
    pub fn track(&self, seed: VmSeed) {
        let mut views = self.views();
        let mut view = VmView::from_seed(seed);
        let epoch = match views.get(&view.id) {
            Some(entry) => {
                view.in_flight = entry.view.in_flight;
                entry.epoch
            }
            None => self.next_epoch.fetch_add(1, Ordering::Relaxed),
        };
        debug!(vm_id = %view.id, state = %view.state, epoch, "tracking VM");
        views.insert(view.id.clone(), Entry { view, epoch });
    }

    pub fn untrack(&self, vm_id: &str) -> Option<VmView> {
        self.views().remove(vm_id).map(|entry| entry.view)
    }

    pub fn is_tracked(&self, vm_id: &str) -> bool {
        self.views().contains_key(vm_id)
    }

    pub fn is_locked(&self, vm_id: &str) -> bool {
        self.views().get(vm_id).is_some_and(|e| e.view.action_lock())
    }

    pub fn get(&self, vm_id: &str) -> Option<VmView> {
        self.views().get(vm_id).map(|e| e.view.clone())
    }

    pub fn list(&self) -> Vec<VmView> {
        let mut views: Vec<VmView> = self.views().values().map(|e| e.view.clone()).collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.views().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn controls(&self, vm_id: &str) -> Option<Controls> {
        self.views().get(vm_id).map(|e| e.view.controls(self.policy))
    }

    /// Take the per-VM action lock. The lock is released when the returned
    /// guard is dropped.
    pub fn try_lock(self: &Arc<Self>, vm_id: &str, verb: Verb) -> Result<ActionLock, BoardError> {
        let mut views = self.views();
        let entry = views
            .get_mut(vm_id)
            .ok_or_else(|| BoardError::NotTracked(vm_id.to_string()))?;

        if entry.view.in_flight.is_some() {
            return Err(BoardError::Busy(vm_id.to_string()));
        }

        entry.view.in_flight = Some(verb);
        debug!(vm_id, %verb, epoch = entry.epoch, "action lock taken");

        Ok(ActionLock {
            board: Arc::clone(self),
            vm_id: vm_id.to_string(),
            verb,
            epoch: entry.epoch,
        })
    }

    /// The view `lock` was taken on, if that mount is still the tracked one.
    fn held<'a>(
        views: &'a mut HashMap<String, Entry>,
        lock: &ActionLock,
    ) -> Option<&'a mut VmView> {
        views
            .get_mut(&lock.vm_id)
            .filter(|entry| entry.epoch == lock.epoch)
            .map(|entry| &mut entry.view)
    }

    fn release(&self, lock: &ActionLock) {
        if let Some(view) = Self::held(&mut self.views(), lock) {
            view.in_flight = None;
        }
    }

    /// Apply the state declared by a successful action response. A label
    /// without a state is ignored so it cannot disagree with the controls.
    /// Returns `false` when the mount `lock` belongs to is gone.
    pub fn apply_action_result(
        &self,
        lock: &ActionLock,
        new_state: Option<VmState>,
        state_text: Option<String>,
    ) -> bool {
        let mut views = self.views();
        let Some(view) = Self::held(&mut views, lock) else {
            return false;
        };

        if let Some(state) = new_state {
            view.state = state;
            view.state_text = state_text;
        }
        true
    }

    /// Apply a status reading unless an action is in flight for the VM.
    pub fn apply_status(
        &self,
        vm_id: &str,
        state: VmState,
        uptime: Option<String>,
    ) -> StatusApplied {
        let mut views = self.views();
        let Some(view) = views.get_mut(vm_id).map(|entry| &mut entry.view) else {
            return StatusApplied::NotTracked;
        };

        if view.action_lock() {
            return StatusApplied::SkippedLocked;
        }

        view.state = state;
        view.state_text = None;
        if uptime.is_some() {
            view.uptime = uptime;
        }
        StatusApplied::Applied
    }

    pub fn replace_snapshots(&self, vm_id: &str, snapshots: Vec<Snapshot>) -> bool {
        match self.views().get_mut(vm_id) {
            Some(entry) => {
                entry.view.snapshots = snapshots;
                true
            }
            None => false,
        }
    }

    /// Remove the one snapshot addressed by `snapshot_ref` from the mount
    /// `lock` was taken on.
    pub fn remove_snapshot(&self, lock: &ActionLock, snapshot_ref: &str) -> Option<Snapshot> {
        let mut views = self.views();
        let view = Self::held(&mut views, lock)?;
        let index = view
            .snapshots
            .iter()
            .position(|s| s.proxmox_name == snapshot_ref)?;
        Some(view.snapshots.remove(index))
    }
}

/// Held for the duration of one mutating operation on a VM.
#[derive(Debug)]
pub struct ActionLock {
    board: Arc<VmBoard>,
    vm_id: String,
    verb: Verb,
    epoch: u64,
}

impl ActionLock {
    pub fn vm_id(&self) -> &str {
        &self.vm_id
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Whether the VM is still tracked under the mount this lock was taken on.
    pub fn is_current(&self) -> bool {
        VmBoard::held(&mut self.board.views(), self).is_some()
    }
}

impl Drop for ActionLock {
    fn drop(&mut self) {
        self.board.release(self);
        debug!(vm_id = %self.vm_id, verb = %self.verb, "action lock released");
    }
}

impl std::fmt::Debug for VmBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmBoard")
            .field("tracked", &self.views().len())
            .field("policy", &self.policy)
            .finish()
    }
}

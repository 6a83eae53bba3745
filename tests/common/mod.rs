#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use vm_rental_portal::ControlPanel;
use vm_rental_portal::client::{ClientError, VmBackend};
use vm_rental_portal::config::PanelConfig;
use vm_rental_portal::confirm::ConfirmGate;
use vm_rental_portal::models::{
    ActionResponse, BulkResponse, Snapshot, SnapshotListResponse, SnapshotRecord,
    SnapshotResponse, StatusResponse, VmAction, VmSeed, VmState,
};
use vm_rental_portal::notify::{Notifier, Severity};

/// How the fake backend answers one call.
#[derive(Clone)]
pub enum Reply<T> {
    Ok(T),
    /// Transport-class failure: no usable response.
    Fail,
    /// Never resolves.
    Hang,
    /// Resolves with the value once the gate is notified.
    Gated(Arc<Notify>, T),
}

async fn resolve<T>(reply: Reply<T>) -> Result<T, ClientError> {
    match reply {
        Reply::Ok(value) => Ok(value),
        Reply::Fail => Err(ClientError::Status(reqwest::StatusCode::BAD_GATEWAY)),
        Reply::Hang => std::future::pending().await,
        Reply::Gated(gate, value) => {
            gate.notified().await;
            Ok(value)
        }
    }
}

/// Queue of replies; the fallback answers once the queue is drained.
struct Script<T> {
    queue: VecDeque<Reply<T>>,
    fallback: Reply<T>,
}

impl<T: Clone> Script<T> {
    fn new(fallback: Reply<T>) -> Self {
        Self {
            queue: VecDeque::new(),
            fallback,
        }
    }

    fn next(&mut self) -> Reply<T> {
        self.queue
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Perform(String, VmAction),
    Status(String),
    ListSnapshots(String),
    CreateSnapshot(String, String, String),
    RollbackSnapshot(String, String),
    DeleteSnapshot(String, String),
    Bulk(VmAction, Vec<String>),
}

/// In-memory backend with scripted replies and a call log.
pub struct FakeBackend {
    calls: Mutex<Vec<Call>>,
    perform: Mutex<Script<ActionResponse>>,
    status: Mutex<Script<StatusResponse>>,
    snapshot_lists: Mutex<Script<SnapshotListResponse>>,
    snapshot_ops: Mutex<Script<SnapshotResponse>>,
    bulk: Mutex<Script<BulkResponse>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            perform: Mutex::new(Script::new(Reply::Ok(ActionResponse {
                success: true,
                ..Default::default()
            }))),
            status: Mutex::new(Script::new(Reply::Ok(status_ok("active")))),
            snapshot_lists: Mutex::new(Script::new(Reply::Ok(SnapshotListResponse {
                success: true,
                ..Default::default()
            }))),
            snapshot_ops: Mutex::new(Script::new(Reply::Ok(SnapshotResponse {
                success: true,
                ..Default::default()
            }))),
            bulk: Mutex::new(Script::new(Reply::Ok(BulkResponse {
                success: true,
                ..Default::default()
            }))),
        })
    }

    pub fn push_perform(&self, reply: Reply<ActionResponse>) {
        self.perform.lock().unwrap().queue.push_back(reply);
    }

    pub fn push_status(&self, reply: Reply<StatusResponse>) {
        self.status.lock().unwrap().queue.push_back(reply);
    }

    pub fn set_status_fallback(&self, reply: Reply<StatusResponse>) {
        self.status.lock().unwrap().fallback = reply;
    }

    pub fn push_snapshot_list(&self, reply: Reply<SnapshotListResponse>) {
        self.snapshot_lists.lock().unwrap().queue.push_back(reply);
    }

    pub fn push_snapshot_op(&self, reply: Reply<SnapshotResponse>) {
        self.snapshot_ops.lock().unwrap().queue.push_back(reply);
    }

    pub fn push_bulk(&self, reply: Reply<BulkResponse>) {
        self.bulk.lock().unwrap().queue.push_back(reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Status(_)))
            .count()
    }

    pub fn perform_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Perform(..)))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl VmBackend for FakeBackend {
    async fn perform(&self, vm_id: &str, action: VmAction) -> Result<ActionResponse, ClientError> {
        self.record(Call::Perform(vm_id.to_string(), action));
        let reply = self.perform.lock().unwrap().next();
        resolve(reply).await
    }

    async fn status(&self, vm_id: &str) -> Result<StatusResponse, ClientError> {
        self.record(Call::Status(vm_id.to_string()));
        let reply = self.status.lock().unwrap().next();
        resolve(reply).await
    }

    async fn list_snapshots(&self, vm_id: &str) -> Result<SnapshotListResponse, ClientError> {
        self.record(Call::ListSnapshots(vm_id.to_string()));
        let reply = self.snapshot_lists.lock().unwrap().next();
        resolve(reply).await
    }

    async fn create_snapshot(
        &self,
        vm_id: &str,
        name: &str,
        description: &str,
    ) -> Result<SnapshotResponse, ClientError> {
        self.record(Call::CreateSnapshot(
            vm_id.to_string(),
            name.to_string(),
            description.to_string(),
        ));
        let reply = self.snapshot_ops.lock().unwrap().next();
        resolve(reply).await
    }

    async fn rollback_snapshot(
        &self,
        vm_id: &str,
        snapshot_ref: &str,
    ) -> Result<SnapshotResponse, ClientError> {
        self.record(Call::RollbackSnapshot(
            vm_id.to_string(),
            snapshot_ref.to_string(),
        ));
        let reply = self.snapshot_ops.lock().unwrap().next();
        resolve(reply).await
    }

    async fn delete_snapshot(
        &self,
        vm_id: &str,
        snapshot_ref: &str,
    ) -> Result<SnapshotResponse, ClientError> {
        self.record(Call::DeleteSnapshot(
            vm_id.to_string(),
            snapshot_ref.to_string(),
        ));
        let reply = self.snapshot_ops.lock().unwrap().next();
        resolve(reply).await
    }

    async fn bulk_action(
        &self,
        action: VmAction,
        vm_ids: &[String],
    ) -> Result<BulkResponse, ClientError> {
        self.record(Call::Bulk(action, vm_ids.to_vec()));
        let reply = self.bulk.lock().unwrap().next();
        resolve(reply).await
    }

    fn console_url(&self, vm_id: &str) -> String {
        format!("http://portal.test/my/vm/{}/console", vm_id)
    }
}

/// Notification sink that keeps every message.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(Severity, String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<(Severity, String, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<(Severity, String, String)> {
        self.messages.lock().unwrap().last().cloned()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, severity: Severity, title: &str, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((severity, title.to_string(), message.to_string()));
    }
}

/// Confirm gate answering with a canned value and remembering what it was asked.
pub struct ScriptedConfirm {
    answer: bool,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedConfirm {
    pub fn accept() -> Arc<Self> {
        Arc::new(Self {
            answer: true,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn decline() -> Arc<Self> {
        Arc::new(Self {
            answer: false,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfirmGate for ScriptedConfirm {
    async fn confirm(&self, title: &str, message: &str) -> bool {
        self.prompts
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
        self.answer
    }
}

/// Test fixture: a panel wired to fakes.
pub struct Harness {
    pub panel: ControlPanel,
    pub backend: Arc<FakeBackend>,
    pub notifier: Arc<RecordingNotifier>,
    pub confirm: Arc<ScriptedConfirm>,
}

/// Config with no follow-up polls, so call counts only reflect the test.
pub fn quiet_config() -> PanelConfig {
    PanelConfig {
        poll_interval: Duration::from_secs(30),
        reconcile_delay: None,
        rollback_reconcile_delay: None,
        request_timeout: Some(Duration::from_secs(10)),
        ..PanelConfig::default()
    }
}

pub fn harness(config: PanelConfig, confirm: Arc<ScriptedConfirm>) -> Harness {
    let backend = FakeBackend::new();
    let notifier = RecordingNotifier::new();
    let panel = ControlPanel::new(
        config,
        backend.clone(),
        notifier.clone(),
        confirm.clone(),
    );
    Harness {
        panel,
        backend,
        notifier,
        confirm,
    }
}

pub fn status_ok(state: &str) -> StatusResponse {
    StatusResponse {
        success: true,
        state: Some(VmState::from(state)),
        uptime: None,
        error: None,
    }
}

pub fn action_ok(new_state: &str) -> ActionResponse {
    ActionResponse {
        success: true,
        new_state: Some(VmState::from(new_state)),
        ..Default::default()
    }
}

pub fn action_failed(error: &str) -> ActionResponse {
    ActionResponse {
        success: false,
        error: Some(error.to_string()),
        ..Default::default()
    }
}

pub fn snapshot_failed(error: &str) -> SnapshotResponse {
    SnapshotResponse {
        success: false,
        error: Some(error.to_string()),
        ..Default::default()
    }
}

pub fn snapshot(vm_id: &str, n: u32) -> Snapshot {
    Snapshot {
        id: n.to_string(),
        name: format!("snap-{}", n),
        description: String::new(),
        proxmox_name: format!("snap_{}", n),
        vm_id: vm_id.to_string(),
    }
}

pub fn snapshot_record(n: u32) -> SnapshotRecord {
    SnapshotRecord {
        id: n.to_string(),
        name: format!("snap-{}", n),
        description: None,
        proxmox_name: format!("snap_{}", n),
    }
}

pub fn seed(vm_id: &str, state: &str) -> VmSeed {
    VmSeed::new(vm_id, VmState::from(state))
}

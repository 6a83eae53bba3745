use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state as reported by the portal backend.
///
/// Parsing never fails: anything outside the known set is kept verbatim in
/// [`VmState::Other`] so it can still be displayed, and it maps to the
/// fully-disabled control row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VmState {
    Provisioning,
    Pending,
    Active,
    Running,
    Stopped,
    Suspended,
    Unknown,
    Other(String),
}

impl VmState {
    pub fn as_str(&self) -> &str {
        match self {
            VmState::Provisioning => "provisioning",
            VmState::Pending => "pending",
            VmState::Active => "active",
            VmState::Running => "running",
            VmState::Stopped => "stopped",
            VmState::Suspended => "suspended",
            VmState::Unknown => "unknown",
            VmState::Other(raw) => raw,
        }
    }

    /// Human readable label used when the server does not supply one.
    pub fn display(&self) -> &str {
        match self {
            VmState::Active | VmState::Running => "Running",
            VmState::Stopped => "Stopped",
            VmState::Suspended => "Suspended",
            VmState::Pending => "Pending",
            VmState::Provisioning => "Provisioning",
            VmState::Other(raw) if !raw.trim().is_empty() => raw,
            VmState::Unknown | VmState::Other(_) => "Unknown",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, VmState::Active | VmState::Running)
    }
}

impl From<&str> for VmState {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "provisioning" => VmState::Provisioning,
            "pending" => VmState::Pending,
            "active" => VmState::Active,
            "running" => VmState::Running,
            "stopped" => VmState::Stopped,
            "suspended" => VmState::Suspended,
            "unknown" | "" => VmState::Unknown,
            _ => VmState::Other(raw.to_string()),
        }
    }
}

impl From<String> for VmState {
    fn from(raw: String) -> Self {
        VmState::from(raw.as_str())
    }
}

impl From<VmState> for String {
    fn from(state: VmState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle actions a user can dispatch against a single VM or a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmAction {
    Start,
    Stop,
    Restart,
}

impl VmAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmAction::Start => "start",
            VmAction::Stop => "stop",
            VmAction::Restart => "restart",
        }
    }

    /// Stop and restart interrupt a running guest and are confirmed first.
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, VmAction::Stop | VmAction::Restart)
    }
}

impl fmt::Display for VmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for VmAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(VmAction::Start),
            "stop" => Ok(VmAction::Stop),
            "restart" | "reboot" => Ok(VmAction::Restart),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// Every mutating verb the client can put in flight for a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Start,
    Stop,
    Restart,
    CreateSnapshot,
    RollbackSnapshot,
    DeleteSnapshot,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Start => "start",
            Verb::Stop => "stop",
            Verb::Restart => "restart",
            Verb::CreateSnapshot => "create_snapshot",
            Verb::RollbackSnapshot => "rollback_snapshot",
            Verb::DeleteSnapshot => "delete_snapshot",
        }
    }

    /// Text shown next to the pending indicator while the verb is in flight.
    pub fn pending_message(&self) -> &'static str {
        match self {
            Verb::Start => "Starting VM...",
            Verb::Stop => "Stopping VM...",
            Verb::Restart => "Restarting VM...",
            Verb::CreateSnapshot => "Creating snapshot...",
            Verb::RollbackSnapshot => "Restoring snapshot...",
            Verb::DeleteSnapshot => "Deleting snapshot...",
        }
    }
}

impl From<VmAction> for Verb {
    fn from(action: VmAction) -> Self {
        match action {
            VmAction::Start => Verb::Start,
            VmAction::Stop => Verb::Stop,
            VmAction::Restart => Verb::Restart,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A snapshot tracked for one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Reference understood by the hypervisor; used to address rollback/delete.
    pub proxmox_name: String,
    pub vm_id: String,
}

impl Snapshot {
    pub fn from_record(vm_id: &str, record: SnapshotRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            description: record.description.unwrap_or_default(),
            proxmox_name: record.proxmox_name,
            vm_id: vm_id.to_string(),
        }
    }
}

/// Initial state rendered by the server when a control view mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSeed {
    pub id: String,
    pub name: String,
    pub state: VmState,
    pub uptime: Option<String>,
    pub snapshots: Vec<Snapshot>,
}

impl VmSeed {
    pub fn new(id: impl Into<String>, state: VmState) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            state,
            uptime: None,
            snapshots: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_snapshots(mut self, snapshots: Vec<Snapshot>) -> Self {
        self.snapshots = snapshots;
        self
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_state: Option<VmState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<VmState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of snapshot create, rollback and delete calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(alias = "proxmoxName")]
    pub proxmox_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotListResponse {
    pub success: bool,
    #[serde(default)]
    pub snapshots: Vec<SnapshotRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSnapshotParams {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkActionParams {
    pub action: VmAction,
    pub vm_ids: Vec<String>,
}

/// Record ids arrive as integers from the portal but are handled as strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

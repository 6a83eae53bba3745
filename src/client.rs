use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, InvalidHeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

use crate::models::{
    ActionResponse, BulkActionParams, BulkResponse, CreateSnapshotParams, SnapshotListResponse,
    SnapshotResponse, StatusResponse, VmAction,
};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Server returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Invalid session cookie: {0}")]
    InvalidSession(#[from] InvalidHeaderValue),

    #[error("Invalid portal URL {0}")]
    InvalidUrl(String),
}

/// Every endpoint the control surface talks to. Paths come from this table
/// only; nothing is derived from presentation markup. Ids and snapshot
/// references are single path segments and are percent-encoded as such.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Action { vm_id: &'a str, action: VmAction },
    Status { vm_id: &'a str },
    Snapshots { vm_id: &'a str },
    CreateSnapshot { vm_id: &'a str },
    RollbackSnapshot { vm_id: &'a str, snapshot_ref: &'a str },
    DeleteSnapshot { vm_id: &'a str, snapshot_ref: &'a str },
    Bulk,
    Console { vm_id: &'a str },
}

impl<'a> Route<'a> {
    /// Unencoded path segments, appended to the portal base URL.
    pub fn segments(&self) -> Vec<&'a str> {
        match *self {
            Route::Action { vm_id, action } => {
                let verb = match action {
                    VmAction::Start => "start",
                    VmAction::Stop => "stop",
                    VmAction::Restart => "reboot",
                };
                vec!["vm", verb, vm_id]
            }
            Route::Status { vm_id } => vec!["my", "vm", vm_id, "status"],
            Route::Snapshots { vm_id } => vec!["my", "vm", vm_id, "snapshots"],
            Route::CreateSnapshot { vm_id } => vec!["vm", vm_id, "snapshot", "create"],
            Route::RollbackSnapshot {
                vm_id,
                snapshot_ref,
            } => vec!["vm", vm_id, "snapshot", snapshot_ref, "rollback"],
            Route::DeleteSnapshot {
                vm_id,
                snapshot_ref,
            } => vec!["vm", vm_id, "snapshot", snapshot_ref, "delete"],
            Route::Bulk => vec!["my", "vms", "bulk_action"],
            Route::Console { vm_id } => vec!["my", "vm", vm_id, "console"],
        }
    }
}

/// Backend the control surface issues requests to.
///
/// `Err` means no usable response (transport failure). A well-formed
/// response with `success = false` is returned as `Ok`.
#[async_trait]
pub trait VmBackend: Send + Sync {
    async fn perform(&self, vm_id: &str, action: VmAction) -> Result<ActionResponse, ClientError>;

    async fn status(&self, vm_id: &str) -> Result<StatusResponse, ClientError>;

    async fn list_snapshots(&self, vm_id: &str) -> Result<SnapshotListResponse, ClientError>;

    async fn create_snapshot(
        &self,
        vm_id: &str,
        name: &str,
        description: &str,
    ) -> Result<SnapshotResponse, ClientError>;

    async fn rollback_snapshot(
        &self,
        vm_id: &str,
        snapshot_ref: &str,
    ) -> Result<SnapshotResponse, ClientError>;

    async fn delete_snapshot(
        &self,
        vm_id: &str,
        snapshot_ref: &str,
    ) -> Result<SnapshotResponse, ClientError>;

    async fn bulk_action(
        &self,
        action: VmAction,
        vm_ids: &[String],
    ) -> Result<BulkResponse, ClientError>;

    /// Browser URL of the VM console. Not requested by the client itself.
    fn console_url(&self, vm_id: &str) -> String;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    method: &'static str,
    params: &'a P,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    message: String,
    #[serde(default)]
    data: Option<RpcErrorData>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorData {
    #[serde(default)]
    message: Option<String>,
}

impl RpcErrorBody {
    fn into_message(self) -> String {
        self.data.and_then(|d| d.message).unwrap_or(self.message)
    }
}

#[derive(Debug, Serialize)]
struct NoParams {}

/// JSON-RPC client for the rental portal.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    next_id: AtomicU64,
}

impl HttpBackend {
    pub fn new(base_url: &str, session: Option<&str>) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }

        let mut headers = HeaderMap::new();
        if let Some(session) = session {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(&format!("session_id={}", session))?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, route: Route<'_>) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`: the base URL can take path segments.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(route.segments());
        }
        url
    }

    async fn call<P, R>(&self, route: Route<'_>, params: &P) -> Result<R, ClientError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.endpoint(route);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(%url, id, "rpc call");

        let request = RpcRequest {
            jsonrpc: "2.0",
            method: "call",
            params,
            id,
        };

        let resp = self
            .client
            .post(url.clone())
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ClientError::Status(resp.status()));
        }

        let envelope: RpcResponse<R> = resp.json().await?;
        if let Some(error) = envelope.error {
            return Err(ClientError::Rpc(error.into_message()));
        }

        envelope
            .result
            .ok_or_else(|| ClientError::Decode(format!("{} returned no result", url.path())))
    }
}

#[async_trait]
impl VmBackend for HttpBackend {
    async fn perform(&self, vm_id: &str, action: VmAction) -> Result<ActionResponse, ClientError> {
        self.call(Route::Action { vm_id, action }, &NoParams {})
            .await
    }

    async fn status(&self, vm_id: &str) -> Result<StatusResponse, ClientError> {
        self.call(Route::Status { vm_id }, &NoParams {}).await
    }

    async fn list_snapshots(&self, vm_id: &str) -> Result<SnapshotListResponse, ClientError> {
        self.call(Route::Snapshots { vm_id }, &NoParams {}).await
    }

    async fn create_snapshot(
        &self,
        vm_id: &str,
        name: &str,
        description: &str,
    ) -> Result<SnapshotResponse, ClientError> {
        let params = CreateSnapshotParams {
            name: name.to_string(),
            description: description.to_string(),
        };
        self.call(Route::CreateSnapshot { vm_id }, &params).await
    }

    async fn rollback_snapshot(
        &self,
        vm_id: &str,
        snapshot_ref: &str,
    ) -> Result<SnapshotResponse, ClientError> {
        self.call(
            Route::RollbackSnapshot {
                vm_id,
                snapshot_ref,
            },
            &NoParams {},
        )
        .await
    }

    async fn delete_snapshot(
        &self,
        vm_id: &str,
        snapshot_ref: &str,
    ) -> Result<SnapshotResponse, ClientError> {
        self.call(
            Route::DeleteSnapshot {
                vm_id,
                snapshot_ref,
            },
            &NoParams {},
        )
        .await
    }

    async fn bulk_action(
        &self,
        action: VmAction,
        vm_ids: &[String],
    ) -> Result<BulkResponse, ClientError> {
        let params = BulkActionParams {
            action,
            vm_ids: vm_ids.to_vec(),
        };
        self.call(Route::Bulk, &params).await
    }

    fn console_url(&self, vm_id: &str) -> String {
        self.endpoint(Route::Console { vm_id }).to_string()
    }
}

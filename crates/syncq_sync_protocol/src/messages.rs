//! Protocol messages for the five sync endpoints.
//!
//! All bodies are JSON. Every request that touches node-scoped state
//! carries `nodeId` and `apikey`; the HTTP layer also accepts the key in
//! an `X-Api-Key` header.

use crate::error::{ProtocolError, ProtocolResult};
use crate::event::{EventType, ItemStatus};
use crate::payload::EventPayload;
use crate::update::{UpdateAction, UpdateType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Endpoint paths, relative to the hub base URL.
pub mod endpoints {
    /// Status check.
    pub const STATUS: &str = "/sync/status";
    /// Node self-registration.
    pub const REGISTER: &str = "/sync/register";
    /// Batch upload of queue items.
    pub const UPLOAD: &str = "/sync/upload";
    /// Batch download of distribution updates.
    pub const DOWNLOAD: &str = "/sync/download";
    /// Audit report.
    pub const REPORT: &str = "/sync/report";
    /// Prefix of the artifact streaming path; the artifact name follows.
    pub const ARTIFACT_PREFIX: &str = "/sync/artifact/";
    /// Header carrying the API key.
    pub const API_KEY_HEADER: &str = "x-api-key";
    /// Header carrying the node id on artifact downloads.
    pub const NODE_ID_HEADER: &str = "x-node-id";
}

macro_rules! json_codec {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $ty {
                /// Encodes to JSON.
                pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
                    serde_json::to_vec(self).map_err(ProtocolError::encode)
                }

                /// Decodes from JSON.
                pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
                    serde_json::from_slice(bytes).map_err(ProtocolError::decode)
                }
            }
        )+
    };
}

json_codec!(
    StatusRequest,
    StatusResponse,
    RegisterRequest,
    RegisterResponse,
    UploadRequest,
    UploadResponse,
    DownloadRequest,
    DownloadResponse,
    ReportRequest,
    ReportResponse,
    ErrorBody,
);

/// Top-level status of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The request was handled.
    Ok,
    /// The request was refused.
    Error,
}

/// Status check request. An empty `node_id` is a plain availability ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    /// Calling node.
    #[serde(default)]
    pub node_id: String,
    /// API key; when present it is verified.
    #[serde(default)]
    pub apikey: Option<String>,
}

/// Status check response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Ok when the node may sync.
    pub status: ResponseStatus,
    /// Human-readable explanation.
    pub message: String,
    /// Whether the node id is registered.
    #[serde(default)]
    pub registered: bool,
    /// Whether the node is active.
    #[serde(default)]
    pub active: bool,
    /// Display name of the node.
    #[serde(default)]
    pub node_name: Option<String>,
    /// Last successful upload.
    #[serde(default)]
    pub last_synced_at: Option<i64>,
    /// Hub clock.
    pub server_time: i64,
}

impl StatusResponse {
    /// Builds an error status.
    pub fn error(message: impl Into<String>, registered: bool, server_time: i64) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            registered,
            active: false,
            node_name: None,
            last_synced_at: None,
            server_time,
        }
    }

    /// Whether the node may upload and download.
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

/// Registration request from a new leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Requested node id.
    pub node_id: String,
    /// Display name.
    pub name: String,
    /// Shared provisioning passphrase, distinct from any API key.
    pub secret: String,
    /// Contact address.
    #[serde(default)]
    pub contact_email: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Registration response. `apikey` is only non-empty on success and is
/// never retrievable again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// Outcome.
    pub status: ResponseStatus,
    /// Human-readable explanation.
    pub message: String,
    /// One-time API key.
    pub apikey: String,
}

impl RegisterResponse {
    /// Builds a success response carrying the new key.
    pub fn success(apikey: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            message: "Node registered".into(),
            apikey: apikey.into(),
        }
    }

    /// Builds an error response with an empty key.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            apikey: String::new(),
        }
    }
}

/// One queue item as uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadItem {
    /// Leaf queue item id, echoed back in the result.
    pub id: u64,
    /// Event category.
    pub event_type: EventType,
    /// Fully-qualified event name.
    pub event_name: String,
    /// Table of the changed object.
    #[serde(default)]
    pub object_table: Option<String>,
    /// Leaf-local id of the changed object.
    #[serde(default)]
    pub object_id: Option<i64>,
    /// Queue priority.
    pub priority: u8,
    /// Captured payload.
    pub payload: EventPayload,
    /// Content digest of the payload.
    pub payload_hash: String,
    /// Queue insertion time on the leaf.
    pub time_created: i64,
}

/// Batch upload request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    /// Calling node.
    pub node_id: String,
    /// API key.
    #[serde(default)]
    pub apikey: String,
    /// Items to apply.
    pub items: Vec<UploadItem>,
}

/// Per-item outcome of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    /// Leaf queue item id.
    pub id: u64,
    /// Outcome.
    pub status: ItemStatus,
    /// Human-readable detail.
    pub message: String,
    /// Hub id of the affected row, when known.
    #[serde(default)]
    pub hub_id: Option<i64>,
}

impl ItemResult {
    /// The item was applied.
    pub fn success(id: u64, hub_id: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            id,
            status: ItemStatus::Success,
            message: message.into(),
            hub_id,
        }
    }

    /// The hub copy was newer.
    pub fn conflict(id: u64, hub_id: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            status: ItemStatus::Conflict,
            message: message.into(),
            hub_id: Some(hub_id),
        }
    }

    /// The item could not be applied.
    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            status: ItemStatus::Error,
            message: message.into(),
            hub_id: None,
        }
    }
}

/// Batch upload response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// Always ok; item failures are reported per item.
    pub status: ResponseStatus,
    /// Items seen.
    pub processed: u32,
    /// Items applied.
    pub success: u32,
    /// Items that errored.
    pub failed: u32,
    /// Items that lost a conflict.
    #[serde(default)]
    pub conflicts: u32,
    /// Per-item outcomes.
    pub results: Vec<ItemResult>,
}

impl UploadResponse {
    /// Builds a response and its counters from per-item results.
    pub fn from_results(results: Vec<ItemResult>) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count() as u32;
        let success = count(ItemStatus::Success);
        let failed = count(ItemStatus::Error);
        let conflicts = count(ItemStatus::Conflict);
        Self {
            status: ResponseStatus::Ok,
            processed: results.len() as u32,
            success,
            failed,
            conflicts,
            results,
        }
    }
}

/// Batch download request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    /// Calling node.
    pub node_id: String,
    /// API key.
    #[serde(default)]
    pub apikey: String,
    /// Only updates created strictly after this time are returned.
    #[serde(default)]
    pub since: i64,
    /// Maximum number of updates; the hub caps it.
    pub limit: u32,
}

/// One distribution update as delivered to a leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUpdate {
    /// Hub update id.
    pub id: u64,
    /// Object kind.
    #[serde(rename = "type")]
    pub update_type: UpdateType,
    /// Create, update or delete.
    pub action: UpdateAction,
    /// Distribution priority.
    #[serde(default)]
    pub priority: u8,
    /// Creation time on the hub.
    pub timestamp: i64,
    /// Type-specific payload.
    pub data: serde_json::Value,
}

impl WireUpdate {
    /// Decodes the payload as the given data type.
    pub fn data_as<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        T::deserialize(&self.data).map_err(ProtocolError::decode)
    }
}

/// Batch download response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    /// Number of updates returned.
    pub count: u32,
    /// Echo of the request watermark.
    pub since: i64,
    /// Hub clock.
    pub server_time: i64,
    /// Updates, ordered by priority then creation time.
    pub updates: Vec<WireUpdate>,
}

/// Direction of a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Leaf to hub.
    Upload,
    /// Hub to leaf.
    Download,
}

/// Summary of one pass, sent as an audit report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// Pass direction.
    pub direction: SyncDirection,
    /// Items handled.
    pub item_count: u32,
    /// Items applied.
    pub success_count: u32,
    /// Items that failed.
    pub fail_count: u32,
    /// Items that lost a conflict.
    pub conflict_count: u32,
    /// `success`, `partial` or `failed`.
    pub status: String,
    /// Free-form detail, e.g. a transport error.
    #[serde(default)]
    pub details: Option<String>,
}

impl SyncSummary {
    /// Builds a summary and derives its status from the counts.
    pub fn new(direction: SyncDirection, success: u32, failed: u32, conflicts: u32) -> Self {
        let status = if failed == 0 && conflicts == 0 {
            "success"
        } else if success > 0 {
            "partial"
        } else {
            "failed"
        };
        Self {
            direction,
            item_count: success + failed + conflicts,
            success_count: success,
            fail_count: failed,
            conflict_count: conflicts,
            status: status.into(),
            details: None,
        }
    }

    /// Attaches details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Audit report request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    /// Calling node.
    pub node_id: String,
    /// API key.
    #[serde(default)]
    pub apikey: String,
    /// Pass summary.
    pub summary: SyncSummary,
}

/// Audit report response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    /// Outcome.
    pub status: ResponseStatus,
    /// Human-readable explanation.
    pub message: String,
    /// Hub clock.
    pub server_time: i64,
}

/// Body of a failed request. Its presence in a response marks an
/// application-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Exception class, e.g. `sync_exception`.
    pub exception: String,
    /// Stable machine-readable code.
    pub errorcode: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Creates an error body.
    pub fn new(errorcode: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception: "sync_exception".into(),
            errorcode: errorcode.into(),
            message: message.into(),
        }
    }

    /// Returns the error body if `bytes` is one.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
        value.get("exception")?;
        serde_json::from_value(value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_response_counts_outcomes() {
        let response = UploadResponse::from_results(vec![
            ItemResult::success(1, Some(42), "Grade created"),
            ItemResult::conflict(2, 43, "Hub copy is newer"),
            ItemResult::error(3, "Unknown event type: badge"),
            ItemResult::success(4, None, "Logged"),
        ]);
        assert_eq!(response.processed, 4);
        assert_eq!(response.success, 2);
        assert_eq!(response.failed, 1);
        assert_eq!(response.conflicts, 1);
    }

    #[test]
    fn item_result_uses_camel_case() {
        let json = serde_json::to_value(ItemResult::success(7, Some(99), "ok")).unwrap();
        assert_eq!(json["hubId"], 99);
        assert_eq!(json["status"], "success");
    }

    #[test]
    fn wire_update_decodes_typed_data() {
        let update = WireUpdate {
            id: 1,
            update_type: UpdateType::Course,
            action: UpdateAction::Create,
            priority: 2,
            timestamp: 10,
            data: serde_json::json!({"id": 5, "fullname": "Algebra", "shortname": "ALG"}),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "course");
        let course: crate::CourseData = update.data_as().unwrap();
        assert_eq!(course.shortname, "ALG");
    }

    #[test]
    fn error_body_detection() {
        let body = ErrorBody::new("invalidapikey", "Invalid API key").encode().unwrap();
        assert_eq!(ErrorBody::detect(&body).unwrap().errorcode, "invalidapikey");

        let ok = StatusResponse::error("School is suspended", true, 0).encode().unwrap();
        assert!(ErrorBody::detect(&ok).is_none());
    }

    #[test]
    fn summary_status_from_counts() {
        assert_eq!(SyncSummary::new(SyncDirection::Upload, 3, 0, 0).status, "success");
        assert_eq!(SyncSummary::new(SyncDirection::Upload, 3, 1, 0).status, "partial");
        assert_eq!(SyncSummary::new(SyncDirection::Download, 0, 2, 0).status, "failed");
        assert_eq!(SyncSummary::new(SyncDirection::Upload, 0, 0, 0).status, "success");
    }

    #[test]
    fn status_request_defaults() {
        let request = StatusRequest::decode(b"{}").unwrap();
        assert!(request.node_id.is_empty());
        assert!(request.apikey.is_none());
    }
}

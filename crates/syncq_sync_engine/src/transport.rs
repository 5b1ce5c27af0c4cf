//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use syncq_sync_protocol::{
    DownloadRequest, DownloadResponse, ItemResult, RegisterRequest, RegisterResponse,
    ReportRequest, ReportResponse, ResponseStatus, StatusRequest, StatusResponse, UploadRequest,
    UploadResponse,
};

/// A sync transport handles communication with the hub.
///
/// Every call is bounded by the transport's timeout. Implementations
/// surface connectivity, protocol and authentication failures as distinct
/// [`SyncError`] variants.
pub trait SyncTransport: Send + Sync {
    /// Checks node registration and activity.
    fn check_status(&self, request: &StatusRequest) -> SyncResult<StatusResponse>;

    /// Registers this node with the hub.
    fn register(&self, request: &RegisterRequest) -> SyncResult<RegisterResponse>;

    /// Uploads a batch of queue items.
    fn upload(&self, request: &UploadRequest) -> SyncResult<UploadResponse>;

    /// Downloads pending distribution updates.
    ///
    /// The hub marks every returned update delivered.
    fn download(&self, request: &DownloadRequest) -> SyncResult<DownloadResponse>;

    /// Sends an audit report.
    fn report(&self, request: &ReportRequest) -> SyncResult<ReportResponse>;

    /// Streams an artifact into `sink` and returns the bytes written.
    fn fetch_artifact(
        &self,
        node_id: &str,
        api_key: &str,
        name: &str,
        sink: &mut dyn Write,
    ) -> SyncResult<u64>;
}

/// A mock transport for testing.
///
/// Uploads are accepted item by item unless a response is set. Downloads
/// pop queued responses and return an empty batch once they run out.
#[derive(Debug, Default)]
pub struct MockTransport {
    offline: AtomicBool,
    uploads_failing: AtomicBool,
    status_response: Mutex<Option<StatusResponse>>,
    upload_response: Mutex<Option<UploadResponse>>,
    download_responses: Mutex<VecDeque<DownloadResponse>>,
    artifacts: Mutex<HashMap<String, Vec<u8>>>,
    uploads: Mutex<Vec<UploadRequest>>,
    downloads: Mutex<Vec<DownloadRequest>>,
    reports: Mutex<Vec<ReportRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock whose status check reports an active node.
    pub fn active() -> Self {
        let transport = Self::new();
        transport.set_status_response(StatusResponse {
            status: ResponseStatus::Ok,
            message: "Node active".into(),
            registered: true,
            active: true,
            node_name: Some("Mock leaf".into()),
            last_synced_at: None,
            server_time: 0,
        });
        transport
    }

    /// Sets the status response.
    pub fn set_status_response(&self, response: StatusResponse) {
        *self.status_response.lock() = Some(response);
    }

    /// Sets a fixed upload response.
    pub fn set_upload_response(&self, response: UploadResponse) {
        *self.upload_response.lock() = Some(response);
    }

    /// Queues a download response.
    pub fn push_download_response(&self, response: DownloadResponse) {
        self.download_responses.lock().push_back(response);
    }

    /// Adds an artifact.
    pub fn add_artifact(&self, name: impl Into<String>, bytes: Vec<u8>) {
        self.artifacts.lock().insert(name.into(), bytes);
    }

    /// Simulates losing or regaining the network.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes uploads time out while status checks still succeed.
    pub fn set_uploads_failing(&self, failing: bool) {
        self.uploads_failing.store(failing, Ordering::SeqCst);
    }

    /// Upload requests received so far.
    pub fn uploads(&self) -> Vec<UploadRequest> {
        self.uploads.lock().clone()
    }

    /// Download requests received so far.
    pub fn downloads(&self) -> Vec<DownloadRequest> {
        self.downloads.lock().clone()
    }

    /// Reports received so far.
    pub fn reports(&self) -> Vec<ReportRequest> {
        self.reports.lock().clone()
    }

    fn check_online(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(SyncError::connectivity("connection refused"))
        } else {
            Ok(())
        }
    }
}

impl SyncTransport for MockTransport {
    fn check_status(&self, _request: &StatusRequest) -> SyncResult<StatusResponse> {
        self.check_online()?;
        self.status_response
            .lock()
            .clone()
            .ok_or_else(|| SyncError::protocol("No mock status response set"))
    }

    fn register(&self, request: &RegisterRequest) -> SyncResult<RegisterResponse> {
        self.check_online()?;
        Ok(RegisterResponse::success(format!("mock-key-{}", request.node_id)))
    }

    fn upload(&self, request: &UploadRequest) -> SyncResult<UploadResponse> {
        self.check_online()?;
        self.uploads.lock().push(request.clone());
        if self.uploads_failing.load(Ordering::SeqCst) {
            return Err(SyncError::connectivity("timeout: upload did not complete"));
        }
        if let Some(response) = self.upload_response.lock().clone() {
            return Ok(response);
        }
        let results = request
            .items
            .iter()
            .map(|item| ItemResult::success(item.id, None, "Accepted"))
            .collect();
        Ok(UploadResponse::from_results(results))
    }

    fn download(&self, request: &DownloadRequest) -> SyncResult<DownloadResponse> {
        self.check_online()?;
        self.downloads.lock().push(request.clone());
        Ok(self
            .download_responses
            .lock()
            .pop_front()
            .unwrap_or(DownloadResponse {
                count: 0,
                since: request.since,
                server_time: 0,
                updates: Vec::new(),
            }))
    }

    fn report(&self, request: &ReportRequest) -> SyncResult<ReportResponse> {
        self.check_online()?;
        self.reports.lock().push(request.clone());
        Ok(ReportResponse {
            status: ResponseStatus::Ok,
            message: "Report recorded".into(),
            server_time: 0,
        })
    }

    fn fetch_artifact(
        &self,
        _node_id: &str,
        _api_key: &str,
        name: &str,
        sink: &mut dyn Write,
    ) -> SyncResult<u64> {
        self.check_online()?;
        let artifacts = self.artifacts.lock();
        let bytes = artifacts
            .get(name)
            .ok_or_else(|| SyncError::http_status(404, format!("artifact not found: {name}")))?;
        sink.write_all(bytes)
            .map_err(|e| SyncError::connectivity(e.to_string()))?;
        Ok(bytes.len() as u64)
    }
}

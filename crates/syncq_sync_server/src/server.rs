//! Main sync server.

use crate::config::ServerConfig;
use crate::directory::HubDirectory;
use crate::distribution::DistributionManager;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::registry::NodeRegistry;
use crate::stores::HubStores;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use syncq_core::{MappingStore, SharedClock, SyncLog, SystemClock};
use syncq_sync_protocol::{
    endpoints, DownloadRequest, DownloadResponse, ErrorBody, RegisterRequest, RegisterResponse,
    ReportRequest, ReportResponse, StatusRequest, StatusResponse, UploadRequest, UploadResponse,
};

/// Rows removed by [`SyncServer::cleanup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Fully delivered distribution updates removed.
    pub updates: usize,
    /// Sync log entries removed.
    pub log_entries: usize,
}

/// The hub sync server.
///
/// Transport-independent: the HTTP router and the in-process loopback
/// client both go through [`SyncServer::dispatch`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use syncq_sync_server::{MemoryHubDirectory, ServerConfig, SyncServer};
///
/// let config = ServerConfig::default().with_registration("provision-me");
/// let server = SyncServer::new(config, Arc::new(MemoryHubDirectory::new()));
/// let key = server.registry().register("leaf-a", "Leaf A", None, None).unwrap();
/// assert_eq!(key.len(), 64);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a server with in-memory state and the system clock.
    pub fn new(config: ServerConfig, directory: Arc<dyn HubDirectory>) -> Self {
        let clock: SharedClock = Arc::new(SystemClock);
        let stores = HubStores::in_memory(clock.clone());
        Self::with_stores(config, stores, directory, clock)
    }

    /// Creates a server over existing stores.
    pub fn with_stores(
        config: ServerConfig,
        stores: HubStores,
        directory: Arc<dyn HubDirectory>,
        clock: SharedClock,
    ) -> Self {
        let context = Arc::new(HandlerContext::new(config, stores, directory, clock));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Handles a status check.
    pub fn handle_status(
        &self,
        request: StatusRequest,
        header_key: Option<&str>,
    ) -> Result<StatusResponse, String> {
        self.handler
            .handle_status(request, header_key)
            .map_err(|e| e.to_string())
    }

    /// Handles a registration.
    pub fn handle_register(&self, request: RegisterRequest) -> Result<RegisterResponse, String> {
        self.handler
            .handle_register(request)
            .map_err(|e| e.to_string())
    }

    /// Handles an upload.
    pub fn handle_upload(
        &self,
        request: UploadRequest,
        header_key: Option<&str>,
    ) -> Result<UploadResponse, String> {
        self.handler
            .handle_upload(request, header_key)
            .map_err(|e| e.to_string())
    }

    /// Handles a download.
    pub fn handle_download(
        &self,
        request: DownloadRequest,
        header_key: Option<&str>,
    ) -> Result<DownloadResponse, String> {
        self.handler
            .handle_download(request, header_key)
            .map_err(|e| e.to_string())
    }

    /// Handles a report.
    pub fn handle_report(
        &self,
        request: ReportRequest,
        header_key: Option<&str>,
    ) -> Result<ReportResponse, String> {
        self.handler
            .handle_report(request, header_key)
            .map_err(|e| e.to_string())
    }

    /// Routes a raw JSON request to its handler.
    ///
    /// Returns the HTTP status and the JSON body. Failures carry an
    /// [`ErrorBody`].
    pub fn dispatch(&self, path: &str, api_key: Option<&str>, body: &[u8]) -> (u16, Vec<u8>) {
        let result = match path {
            endpoints::STATUS => {
                respond(decode::<StatusRequest>(body), |r| self.handler.handle_status(r, api_key))
            }
            endpoints::REGISTER => {
                respond(decode::<RegisterRequest>(body), |r| self.handler.handle_register(r))
            }
            endpoints::UPLOAD => {
                respond(decode::<UploadRequest>(body), |r| self.handler.handle_upload(r, api_key))
            }
            endpoints::DOWNLOAD => respond(decode::<DownloadRequest>(body), |r| {
                self.handler.handle_download(r, api_key)
            }),
            endpoints::REPORT => {
                respond(decode::<ReportRequest>(body), |r| self.handler.handle_report(r, api_key))
            }
            _ => {
                let body = ErrorBody::new("invalidendpoint", format!("Unknown endpoint: {path}"));
                return (404, to_json(&body));
            }
        };

        match result {
            Ok(bytes) => (200, bytes),
            Err(e) => {
                if e.is_server_error() {
                    tracing::error!(path, error = %e, "request failed");
                } else {
                    tracing::debug!(path, error = %e, "request refused");
                }
                (e.status_code(), to_json(&e.to_body()))
            }
        }
    }

    /// Authorizes an artifact download and returns its path.
    pub fn artifact_path(&self, node_id: &str, api_key: &str, name: &str) -> ServerResult<PathBuf> {
        self.handler.artifact_path(node_id, api_key, name)
    }

    /// Authorizes an artifact download and opens the file.
    pub fn open_artifact(&self, node_id: &str, api_key: &str, name: &str) -> ServerResult<File> {
        let path = self.artifact_path(node_id, api_key, name)?;
        Ok(File::open(path)?)
    }

    /// Removes delivered updates and old sync log entries.
    pub fn cleanup(&self) -> ServerResult<CleanupReport> {
        let config = &self.context.config;
        let stores = &self.context.stores;
        let active = stores.registry.active_ids();
        Ok(CleanupReport {
            updates: stores
                .distribution
                .cleanup(config.distribution_retention, &active)?,
            log_entries: stores.sync_log.cleanup(config.log_retention)?,
        })
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Node registry.
    pub fn registry(&self) -> &NodeRegistry {
        &self.context.stores.registry
    }

    /// Distribution manager.
    pub fn distribution(&self) -> &DistributionManager {
        &self.context.stores.distribution
    }

    /// Identity mappings recorded by uploads.
    pub fn mappings(&self) -> &MappingStore {
        &self.context.stores.mappings
    }

    /// Reported sync passes.
    pub fn sync_log(&self) -> &SyncLog {
        &self.context.stores.sync_log
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> ServerResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| ServerError::InvalidRequest(format!("malformed request: {e}")))
}

fn respond<Req, Resp, F>(request: ServerResult<Req>, handle: F) -> ServerResult<Vec<u8>>
where
    Resp: Serialize,
    F: FnOnce(Req) -> ServerResult<Resp>,
{
    let response = handle(request?)?;
    serde_json::to_vec(&response).map_err(|e| ServerError::Internal(e.to_string()))
}

fn to_json(body: &ErrorBody) -> Vec<u8> {
    serde_json::to_vec(body).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryHubDirectory;
    use crate::distribution::Target;
    use syncq_core::ManualClock;
    use syncq_sync_protocol::{CourseData, ItemStatus, UpdateAction};

    fn server() -> SyncServer {
        let clock = Arc::new(ManualClock::new(1_000));
        let directory = Arc::new(MemoryHubDirectory::new());
        directory.add_user("jdoe", "jdoe@example.org", "S-100");
        let course = directory.add_course("MATH101", "M101");
        directory.add_grade_item(course, "FE-1", "Final exam");
        SyncServer::with_stores(
            ServerConfig::default().with_registration("provision-me"),
            HubStores::in_memory(clock.clone()),
            directory,
            clock,
        )
    }

    #[test]
    fn register_then_status_over_dispatch() {
        let server = server();
        let body = br#"{"nodeId":"leaf-a","name":"Leaf A","secret":"provision-me"}"#;
        let (status, bytes) = server.dispatch(endpoints::REGISTER, None, body);
        assert_eq!(status, 200);
        let key = RegisterResponse::decode(&bytes).unwrap().apikey;

        let body = br#"{"nodeId":"leaf-a"}"#;
        let (status, bytes) = server.dispatch(endpoints::STATUS, Some(&key), body);
        assert_eq!(status, 200);
        let response = StatusResponse::decode(&bytes).unwrap();
        assert!(response.is_ok());
        assert_eq!(response.node_name.as_deref(), Some("Leaf A"));
    }

    #[test]
    fn failures_carry_error_body() {
        let server = server();
        let body = br#"{"nodeId":"ghost","apikey":"x","since":0,"limit":10}"#;
        let (status, bytes) = server.dispatch(endpoints::DOWNLOAD, None, body);
        assert_eq!(status, 401);
        let error = ErrorBody::detect(&bytes).unwrap();
        assert_eq!(error.errorcode, "nodenotregistered");

        let (status, bytes) = server.dispatch(endpoints::UPLOAD, None, b"not json");
        assert_eq!(status, 400);
        assert_eq!(ErrorBody::detect(&bytes).unwrap().errorcode, "invalidrequest");

        let (status, _) = server.dispatch("/sync/nope", None, b"{}");
        assert_eq!(status, 404);
    }

    #[test]
    fn upload_applies_items() {
        let server = server();
        let key = server.registry().register("leaf-a", "Leaf A", None, None).unwrap();
        let payload = syncq_testkit::grade_payload("leaf-a", 17, 80.0, 900);
        let request = UploadRequest {
            node_id: "leaf-a".into(),
            apikey: key,
            items: vec![syncq_testkit::upload_item(1, payload)],
        };
        let response = server.handle_upload(request, None).unwrap();
        assert_eq!(response.success, 1);
        assert_eq!(response.results[0].status, ItemStatus::Success);
        assert!(server
            .mappings()
            .mapper("leaf-a")
            .resolve("grade_grades", 17)
            .is_some());
    }

    #[test]
    fn cleanup_removes_delivered_updates() {
        let server = server();
        let key = server.registry().register("leaf-a", "Leaf A", None, None).unwrap();
        server
            .distribution()
            .publish_course(
                Target::Broadcast,
                UpdateAction::Create,
                &CourseData {
                    id: 1,
                    ..CourseData::default()
                },
            )
            .unwrap();
        let request = DownloadRequest {
            node_id: "leaf-a".into(),
            apikey: key,
            since: 0,
            limit: 10,
        };
        assert_eq!(server.handle_download(request, None).unwrap().count, 1);

        // retention has not elapsed on the manual clock
        assert_eq!(server.cleanup().unwrap(), CleanupReport::default());
    }
}
